use std::{
    collections::BTreeSet,
    fs,
    marker::PhantomData,
    path::Path,
    sync::Arc,
};

use anyhow::anyhow;
use data_model::{Document, ObjectId};
use rocksdb::{
    BoundColumnFamily,
    ColumnFamilyDescriptor,
    IteratorMode,
    Options,
    TransactionDB,
    TransactionDBOptions,
    DB,
};
use tracing::{debug, info};

pub mod scanner;
pub mod serializer;

pub use scanner::Cursor;
use serializer::{JsonEncode, JsonEncoder};

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no document with id {id} in collection {collection}")]
    NotFound { collection: String, id: ObjectId },

    #[error("store failure: {source}")]
    StoreFailure {
        #[from]
        source: anyhow::Error,
    },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Self::StoreFailure {
            source: anyhow!("rocksdb error: {}", e),
        }
    }
}

/// A RocksDB database where each column family is a collection of JSON
/// documents keyed by the raw bytes of their [`ObjectId`].
pub struct DocumentStore {
    db: Arc<TransactionDB>,
    database: String,
}

impl DocumentStore {
    pub fn open(path: &Path, database: &str, collections: &[&str]) -> anyhow::Result<Arc<Self>> {
        let db_path = path.join(database);
        fs::create_dir_all(&db_path)
            .map_err(|e| anyhow!("failed to create document store dir {:?}: {}", db_path, e))?;

        // Every column family already on disk has to be opened too, otherwise
        // RocksDB refuses to open the database.
        let mut names: BTreeSet<String> = DB::list_cf(&Options::default(), &db_path)
            .unwrap_or_default()
            .into_iter()
            .collect();
        names.extend(collections.iter().map(|c| c.to_string()));

        let column_families = names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let mut db_opts = Options::default();
        db_opts.create_missing_column_families(true);
        db_opts.create_if_missing(true);
        let db = TransactionDB::open_cf_descriptors(
            &db_opts,
            &TransactionDBOptions::default(),
            &db_path,
            column_families,
        )
        .map_err(|e| anyhow!("failed to open document store {:?}: {}", db_path, e))?;

        info!(
            database = database,
            path = %db_path.display(),
            "opened document store with collections {:?}",
            names
        );
        Ok(Arc::new(Self {
            db: Arc::new(db),
            database: database.to_string(),
        }))
    }

    pub fn collection<T: Document>(&self, name: &str) -> Result<Collection<T>, Error> {
        if self.db.cf_handle(name).is_none() {
            return Err(anyhow!(
                "collection {} does not exist in database {}",
                name,
                self.database
            )
            .into());
        }
        Ok(Collection {
            db: self.db.clone(),
            name: name.to_string(),
            _marker: PhantomData,
        })
    }
}

/// Typed handle to one collection. Cheap to clone, safe to share across
/// requests.
pub struct Collection<T> {
    db: Arc<TransactionDB>,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Document> Collection<T> {
    fn cf(&self) -> Result<Arc<BoundColumnFamily<'_>>, Error> {
        column_family(&self.db, &self.name)
    }

    fn not_found(&self, id: ObjectId) -> Error {
        Error::NotFound {
            collection: self.name.clone(),
            id,
        }
    }

    /// Stores `doc` under a freshly minted id, replacing any id it carried.
    pub fn insert(&self, mut doc: T) -> Result<ObjectId, Error> {
        let id = ObjectId::new();
        doc.set_id(id);
        let serialized = JsonEncoder::encode(&doc)?;

        let cf = self.cf()?;
        let txn = self.db.transaction();
        if txn.get_for_update_cf(&cf, id.bytes(), true)?.is_some() {
            return Err(anyhow!("duplicate id {} in collection {}", id, self.name).into());
        }
        txn.put_cf(&cf, id.bytes(), serialized)?;
        txn.commit()?;

        debug!(collection = %self.name, %id, "inserted document");
        Ok(id)
    }

    pub fn find_by_id(&self, id: &ObjectId) -> Result<T, Error> {
        let cf = self.cf()?;
        match self.db.get_cf(&cf, id.bytes())? {
            Some(value) => Ok(JsonEncoder::decode(&value)?),
            None => Err(self.not_found(*id)),
        }
    }

    /// Removes exactly one document keyed by `id`.
    pub fn delete_by_id(&self, id: &ObjectId) -> Result<(), Error> {
        let cf = self.cf()?;
        let txn = self.db.transaction();
        if txn.get_for_update_cf(&cf, id.bytes(), true)?.is_none() {
            return Err(self.not_found(*id));
        }
        txn.delete_cf(&cf, id.bytes())?;
        txn.commit()?;

        debug!(collection = %self.name, %id, "deleted document");
        Ok(())
    }

    /// Starts a fresh scan over the whole collection. Documents are read in
    /// batches as the cursor is advanced.
    pub fn list_all(&self) -> Cursor<T> {
        Cursor::new(self.db.clone(), &self.name, DEFAULT_BATCH_SIZE)
    }

    pub fn count(&self) -> Result<usize, Error> {
        let cf = self.cf()?;
        let mut count = 0;
        for kv in self.db.iterator_cf(&cf, IteratorMode::Start) {
            kv?;
            count += 1;
        }
        Ok(count)
    }

    pub fn find_all_by<F>(&self, predicate: F) -> Result<Vec<T>, Error>
    where
        F: Fn(&T) -> bool,
    {
        self.list_all()
            .filter(|item| item.as_ref().map_or(true, &predicate))
            .collect()
    }

    pub fn find_one_by<F>(&self, predicate: F) -> Result<Option<T>, Error>
    where
        F: Fn(&T) -> bool,
    {
        for item in self.list_all() {
            let item = item?;
            if predicate(&item) {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }
}

pub(crate) fn column_family<'a>(
    db: &'a TransactionDB,
    name: &str,
) -> Result<Arc<BoundColumnFamily<'a>>, Error> {
    db.cf_handle(name).ok_or_else(|| {
        Error::StoreFailure {
            source: anyhow!("failed to get column family {}", name),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use anyhow::Result;
    use data_model::{
        test_objects::tests::{mock_image_file, mock_user, TEST_USERS_COLLECTION},
        ImageFile,
        User,
    };

    use super::*;

    fn open_store(dir: &Path) -> Result<Arc<DocumentStore>> {
        DocumentStore::open(dir, "testdb", &[TEST_USERS_COLLECTION, "fs.files"])
    }

    #[test]
    fn test_insert_then_find_returns_same_document() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = open_store(dir.path())?;
        let users = store.collection::<User>(TEST_USERS_COLLECTION)?;

        let user = User::new("alice", "a@x.com");
        let id = users.insert(user.clone())?;

        let found = users.find_by_id(&id)?;
        assert_eq!(found.id, Some(id));
        assert_eq!(found.username, "alice");
        assert_eq!(found.email, "a@x.com");
        Ok(())
    }

    #[test]
    fn test_insert_ignores_caller_supplied_id() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = open_store(dir.path())?;
        let users = store.collection::<User>(TEST_USERS_COLLECTION)?;

        let existing = users.insert(mock_user())?;
        let mut user = mock_user();
        user.id = Some(existing);
        let id = users.insert(user)?;

        assert_ne!(id, existing);
        assert_eq!(users.count()?, 2);
        Ok(())
    }

    #[test]
    fn test_missing_ids_are_not_found() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = open_store(dir.path())?;
        let users = store.collection::<User>(TEST_USERS_COLLECTION)?;
        users.insert(mock_user())?;

        let missing = ObjectId::new();
        assert!(users.find_by_id(&missing).unwrap_err().is_not_found());
        assert!(users.delete_by_id(&missing).unwrap_err().is_not_found());
        assert_eq!(users.count()?, 1);
        Ok(())
    }

    #[test]
    fn test_delete_removes_exactly_one_document() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = open_store(dir.path())?;
        let users = store.collection::<User>(TEST_USERS_COLLECTION)?;

        let first = users.insert(mock_user())?;
        let second = users.insert(mock_user())?;
        users.delete_by_id(&first)?;

        assert!(users.find_by_id(&first).unwrap_err().is_not_found());
        assert!(users.find_by_id(&second).is_ok());
        assert_eq!(users.count()?, 1);
        assert!(users.delete_by_id(&first).unwrap_err().is_not_found());
        Ok(())
    }

    #[test]
    fn test_list_all_spans_batches() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = open_store(dir.path())?;
        let users = store.collection::<User>(TEST_USERS_COLLECTION)?;

        let mut inserted = HashSet::new();
        for _ in 0..10 {
            inserted.insert(users.insert(mock_user())?);
        }

        let listed = users
            .list_all()
            .with_batch_size(3)
            .map(|user| user.map(|u| u.id))
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(listed.len(), 10);
        let listed: HashSet<ObjectId> = listed.into_iter().flatten().collect();
        assert_eq!(listed, inserted);

        // Each call is a fresh scan.
        assert_eq!(users.list_all().count(), 10);
        Ok(())
    }

    #[test]
    fn test_collections_are_isolated() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = open_store(dir.path())?;
        let users = store.collection::<User>(TEST_USERS_COLLECTION)?;
        let files = store.collection::<ImageFile>("fs.files")?;

        users.insert(mock_user())?;
        files.insert(mock_image_file("a.png"))?;
        files.insert(mock_image_file("b.png"))?;

        assert_eq!(users.count()?, 1);
        assert_eq!(files.count()?, 2);
        let pngs = files.find_all_by(|f| f.filename == "a.png")?;
        assert_eq!(pngs.len(), 1);
        assert!(files.find_one_by(|f| f.filename == "c.png")?.is_none());
        Ok(())
    }

    #[test]
    fn test_unknown_collection_is_a_store_failure() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = open_store(dir.path())?;
        let err = store.collection::<User>("missing").err().unwrap();
        assert!(matches!(err, Error::StoreFailure { .. }));
        Ok(())
    }

    #[test]
    fn test_reopen_keeps_documents_and_old_collections() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let id = {
            let store = open_store(dir.path())?;
            let users = store.collection::<User>(TEST_USERS_COLLECTION)?;
            users.insert(User::new("bob", "b@x.com"))?
        };

        // Reopening with fewer collections must still succeed.
        let store = DocumentStore::open(dir.path(), "testdb", &[TEST_USERS_COLLECTION])?;
        let users = store.collection::<User>(TEST_USERS_COLLECTION)?;
        assert_eq!(users.find_by_id(&id)?.username, "bob");
        assert!(store.collection::<ImageFile>("fs.files").is_ok());
        Ok(())
    }
}
