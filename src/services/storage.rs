use std::path::PathBuf;

use uuid::Uuid;

/// Local-disk image store.
///
/// Keys are opaque handles issued by `save_bytes`; a key never encodes a
/// path, and anything that looks like one is rejected on read.
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Persist uploaded bytes under a fresh key. The original filename only
    /// contributes a sanitized suffix for debuggability.
    pub async fn save_bytes(&self, filename: &str, data: &[u8]) -> Result<String, StorageError> {
        let key = format!("{}-{}", Uuid::new_v4(), sanitize_filename(filename));
        tokio::fs::write(self.root.join(&key), data).await?;
        Ok(key)
    }

    /// Resolve an image key to its raw bytes.
    pub async fn read_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        if !is_safe_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        match tokio::fs::read(self.root.join(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a stored image.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        if !is_safe_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        tokio::fs::remove_file(self.root.join(key)).await?;
        Ok(())
    }
}

fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        "upload.bin".to_string()
    } else {
        cleaned
    }
}

fn is_safe_key(key: &str) -> bool {
    !key.is_empty() && !key.contains('/') && !key.contains('\\') && !key.contains("..")
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("image key not found: {0}")]
    NotFound(String),

    #[error("invalid image key: {0}")]
    InvalidKey(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> LocalImageStore {
        let dir = std::env::temp_dir().join(format!("mealscan-uploads-{}", Uuid::new_v4()));
        LocalImageStore::new(dir).expect("create test store")
    }

    #[tokio::test]
    async fn save_and_read_roundtrip() {
        let store = test_store();
        let key = store.save_bytes("lunch.jpg", b"fake jpeg bytes").await.unwrap();
        assert!(key.ends_with("lunch.jpg"));

        let bytes = store.read_bytes(&key).await.unwrap();
        assert_eq!(bytes, b"fake jpeg bytes");
    }

    #[tokio::test]
    async fn path_like_keys_are_rejected() {
        let store = test_store();
        for key in ["../etc/passwd", "a/b", "a\\b", ""] {
            let err = store.read_bytes(key).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)), "accepted {key:?}");
        }
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let store = test_store();
        let err = store.read_bytes("no-such-key.jpg").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_removes_the_stored_image() {
        let store = test_store();
        let key = store.save_bytes("lunch.jpg", b"bytes").await.unwrap();

        store.delete(&key).await.unwrap();
        assert!(matches!(
            store.read_bytes(&key).await.unwrap_err(),
            StorageError::NotFound(_)
        ));
        assert!(store.delete("../nope").await.is_err());
    }

    #[tokio::test]
    async fn hostile_filenames_are_sanitized() {
        let store = test_store();
        let key = store.save_bytes("../../sneaky name.png", b"x").await.unwrap();
        assert!(!key.contains('/'));
        assert!(store.read_bytes(&key).await.is_ok());
    }
}
