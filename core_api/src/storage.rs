use std::{collections::BTreeMap, sync::RwLock};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage backend failure: {0}")]
    Backend(String),

    #[error("Poisoned storage lock")]
    Poisoned,
}

/// Minimal contract a durable key-value backend must provide: string keys,
/// JSON string values, and a prefix scan.
///
/// Durable implementations are supplied by the outer client;
/// [`MemoryKvStorage`] covers tests and examples.
pub trait KeyValueStorage: Send + Sync + 'static {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Writes are expected to be durable once this returns.
    fn set_raw(&self, key: &str, value: String) -> Result<(), StorageError>;

    fn delete_raw(&self, key: &str) -> Result<(), StorageError>;

    /// Returns all keys starting with `prefix`.
    fn scan(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// In-memory [`KeyValueStorage`] backend.
#[derive(Debug, Default)]
pub struct MemoryKvStorage {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryKvStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryKvStorage {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| StorageError::Poisoned)?
            .get(key)
            .cloned())
    }

    fn set_raw(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.entries
            .write()
            .map_err(|_| StorageError::Poisoned)?
            .insert(key.to_owned(), value);

        Ok(())
    }

    fn delete_raw(&self, key: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .map_err(|_| StorageError::Poisoned)?
            .remove(key);

        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| StorageError::Poisoned)?
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_is_prefix_bound() {
        let storage = MemoryKvStorage::new();

        storage.set_raw("a:1", "1".into()).unwrap();
        storage.set_raw("a:2", "2".into()).unwrap();
        storage.set_raw("b:1", "3".into()).unwrap();

        assert_eq!(storage.scan("a:").unwrap(), vec!["a:1", "a:2"]);
        assert_eq!(storage.scan("b:").unwrap(), vec!["b:1"]);
        assert!(storage.scan("c:").unwrap().is_empty());
    }
}
