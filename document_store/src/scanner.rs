use std::{collections::VecDeque, marker::PhantomData, sync::Arc};

use data_model::Document;
use rocksdb::{Direction, IteratorMode, ReadOptions, TransactionDB};

use crate::{
    column_family,
    serializer::{JsonEncode, JsonEncoder},
    Error,
};

/// Lazy scan over a collection.
///
/// Each batch opens a new RocksDB iterator starting right after the last key
/// returned, so no iterator is held between batches and the cursor can be
/// moved across threads and await points.
pub struct Cursor<T> {
    db: Arc<TransactionDB>,
    collection: String,
    batch_size: usize,
    resume_key: Option<Vec<u8>>,
    buffer: VecDeque<T>,
    exhausted: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Document> Cursor<T> {
    pub(crate) fn new(db: Arc<TransactionDB>, collection: &str, batch_size: usize) -> Self {
        Self {
            db,
            collection: collection.to_string(),
            batch_size: batch_size.max(1),
            resume_key: None,
            buffer: VecDeque::new(),
            exhausted: false,
            _marker: PhantomData,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Returns the next batch of documents, or `None` once the scan is done.
    pub fn next_batch(&mut self) -> Result<Option<Vec<T>>, Error> {
        if !self.buffer.is_empty() {
            return Ok(Some(self.buffer.drain(..).collect()));
        }
        if self.exhausted {
            return Ok(None);
        }

        let cf = column_family(&self.db, &self.collection)?;
        let mut read_options = ReadOptions::default();
        read_options.set_readahead_size(4_194_304);
        let iterator_mode = match &self.resume_key {
            Some(resume_key) => IteratorMode::From(resume_key, Direction::Forward),
            None => IteratorMode::Start,
        };

        let mut items = Vec::with_capacity(self.batch_size);
        let mut last_key = None;
        for kv in self.db.iterator_cf_opt(&cf, read_options, iterator_mode) {
            if items.len() == self.batch_size {
                break;
            }
            let (key, value) = kv?;
            items.push(JsonEncoder::decode(&value)?);
            last_key = Some(key);
        }

        if items.len() < self.batch_size {
            self.exhausted = true;
        }
        if let Some(key) = last_key {
            // Smallest key strictly greater than the last one seen.
            let mut next = key.to_vec();
            next.push(0);
            self.resume_key = Some(next);
        }

        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(items))
    }
}

impl<T: Document> Iterator for Cursor<T> {
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(item) = self.buffer.pop_front() {
            return Some(Ok(item));
        }
        match self.next_batch() {
            Ok(Some(batch)) => {
                self.buffer.extend(batch);
                self.buffer.pop_front().map(Ok)
            }
            Ok(None) => None,
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}
