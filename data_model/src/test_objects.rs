pub mod tests {
    use rand::{distr::Alphanumeric, Rng};

    use crate::{get_epoch_time_in_ms, ImageFile, User};

    pub const TEST_USERS_COLLECTION: &str = "users";
    pub const TEST_BUCKET: &str = "fs";
    pub const TEST_PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0x0d];

    pub fn random_name(len: usize) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    pub fn mock_user() -> User {
        let name = random_name(8).to_lowercase();
        User::new(&name, &format!("{}@example.com", name))
    }

    pub fn mock_image_file(filename: &str) -> ImageFile {
        ImageFile {
            id: None,
            filename: filename.to_string(),
            mime_type: "image/png".to_string(),
            length: TEST_PNG_BYTES.len() as u64,
            sha256: String::new(),
            upload_date: get_epoch_time_in_ms(),
            blob_url: format!("{}/{}", TEST_BUCKET, filename),
        }
    }
}
