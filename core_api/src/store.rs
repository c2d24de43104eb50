use {
    crate::{
        error::{Error, Result},
        storage::KeyValueStorage,
    },
    serde::{de::DeserializeOwned, Serialize},
    serde_json::Value,
    std::{marker::PhantomData, sync::Arc},
    tracing::debug,
};

/// Storage prefix shared by every store of the core client.
pub const STORAGE_PREFIX: &str = "wc@2:core";

/// Typed persistent map over a [`KeyValueStorage`] backend.
///
/// Records are persisted as JSON objects and partial updates merge at the
/// JSON level, so fields written by a newer client survive a round-trip
/// through an older one.
#[derive(Clone)]
pub struct Store<T> {
    name: String,
    storage: Arc<dyn KeyValueStorage>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Store<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(name: &str, storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            name: name.to_owned(),
            storage,
            _marker: PhantomData,
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{STORAGE_PREFIX}:{}:{key}", self.name)
    }

    fn prefix(&self) -> String {
        format!("{STORAGE_PREFIX}:{}:", self.name)
    }

    /// Inserts or replaces a record.
    pub fn set(&self, key: &str, value: &T) -> Result<()> {
        let serialized = serde_json::to_string(value)?;
        self.storage.set_raw(&self.storage_key(key), serialized)?;

        Ok(())
    }

    /// Inserts a record, failing with [`Error::AlreadyExists`] when the key
    /// is already present.
    pub fn create(&self, key: &str, value: &T) -> Result<()> {
        if self.contains(key)? {
            return Err(Error::AlreadyExists(key.to_owned()));
        }

        self.set(key, value)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.storage.get_raw(&self.storage_key(key))?.is_some())
    }

    pub fn get(&self, key: &str) -> Result<T> {
        self.try_get(key)?
            .ok_or_else(|| Error::NoMatchingKey(key.to_owned()))
    }

    pub fn try_get(&self, key: &str) -> Result<Option<T>> {
        match self.storage.get_raw(&self.storage_key(key))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Shallow-merges `partial` into the stored record. Fields absent from
    /// `partial` keep their persisted value, including fields unknown to
    /// `T`.
    pub fn update(&self, key: &str, partial: Value) -> Result<T> {
        let storage_key = self.storage_key(key);

        let raw = self
            .storage
            .get_raw(&storage_key)?
            .ok_or_else(|| Error::NoMatchingKey(key.to_owned()))?;

        let mut stored: Value = serde_json::from_str(&raw)?;

        match (stored.as_object_mut(), partial) {
            (Some(fields), Value::Object(partial)) => {
                for (field, value) in partial {
                    fields.insert(field, value);
                }
            }

            (_, partial) => stored = partial,
        }

        let updated = serde_json::from_value(stored.clone())?;
        self.storage
            .set_raw(&storage_key, serde_json::to_string(&stored)?)?;

        Ok(updated)
    }

    /// Removes a record. Fails with [`Error::NoMatchingKey`] when absent.
    pub fn delete(&self, key: &str, reason: &str) -> Result<()> {
        if !self.contains(key)? {
            return Err(Error::NoMatchingKey(key.to_owned()));
        }

        debug!("deleting {} record {key}: {reason}", self.name);
        self.storage.delete_raw(&self.storage_key(key))?;

        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        let prefix = self.prefix();

        Ok(self
            .storage
            .scan(&prefix)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_owned))
            .collect())
    }

    pub fn values(&self) -> Result<Vec<T>> {
        self.get_all(|_| true)
    }

    /// Returns all records matching the predicate.
    pub fn get_all(&self, predicate: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        let mut records = Vec::new();

        for key in self.keys()? {
            if let Some(record) = self.try_get(&key)? {
                if predicate(&record) {
                    records.push(record);
                }
            }
        }

        Ok(records)
    }
}
