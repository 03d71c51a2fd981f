//! Live values bound to a table.
//!
//! A [`SyncedValue`] holds a typed copy of one table. Every mutation updates
//! the copy first, notifies subscribers and then hands the transformed value
//! to the store, which debounces the file write.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use log::{error, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::{Result, StoreError};
use crate::table_store::TableStore;

/// Converts between a typed value and the table value handed to the codec.
/// `load` receives `Value::Null` for a missing table and must not fail.
pub trait PersistTransform: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    fn load(&self, raw: Value) -> Self::Value;
    fn save(&self, value: &Self::Value) -> Value;
}

/// Transform for serde records. Missing fields take their serde defaults;
/// a value of the wrong shape falls back to `T::default()`.
pub struct SerdeTransform<T> {
    _record: PhantomData<fn() -> T>,
}

impl<T> SerdeTransform<T> {
    pub fn new() -> Self {
        Self {
            _record: PhantomData,
        }
    }
}

impl<T> Default for SerdeTransform<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PersistTransform for SerdeTransform<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static,
{
    type Value = T;

    fn load(&self, raw: Value) -> T {
        if raw.is_null() {
            return T::default();
        }
        match serde_json::from_value(raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    "Persisted value has unexpected shape, using defaults. type={} error={}",
                    std::any::type_name::<T>(),
                    err
                );
                T::default()
            }
        }
    }

    fn save(&self, value: &T) -> Value {
        serde_json::to_value(value).unwrap_or_else(|err| {
            error!(
                "Failed to serialize value. type={} error={}",
                std::any::type_name::<T>(),
                err
            );
            Value::Null
        })
    }
}

pub struct SyncedValue<T> {
    store: TableStore,
    table: String,
    transform: Box<dyn PersistTransform<Value = T>>,
    value: RwLock<T>,
    read_only: AtomicBool,
    revision: watch::Sender<u64>,
}

impl<T: Clone + Send + Sync + 'static> SyncedValue<T> {
    /// Loads `table` from `store` through `transform`.
    pub async fn open<X>(store: TableStore, table: impl Into<String>, transform: X) -> Self
    where
        X: PersistTransform<Value = T>,
    {
        let table = table.into();
        let raw = store.get_table(&table, Value::Null).await;
        let value = transform.load(raw);
        let (revision, _) = watch::channel(0);
        Self {
            store,
            table,
            transform: Box::new(transform),
            value: RwLock::new(value),
            read_only: AtomicBool::new(false),
            revision,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn get(&self) -> T {
        self.value.read().expect("synced value lock poisoned").clone()
    }

    /// Reads the current value without cloning it.
    pub fn with<R>(&self, read: impl FnOnce(&T) -> R) -> R {
        read(&self.value.read().expect("synced value lock poisoned"))
    }

    pub async fn set(&self, value: T) -> Result<()> {
        self.update(|current| *current = value).await
    }

    /// Mutates the value in place and schedules it for persistence.
    pub async fn update(&self, mutate: impl FnOnce(&mut T)) -> Result<()> {
        if self.is_read_only() {
            return Err(StoreError::ReadOnly(self.table.clone()));
        }
        let persisted = {
            let mut value = self.value.write().expect("synced value lock poisoned");
            mutate(&mut value);
            self.transform.save(&value)
        };
        self.revision.send_modify(|revision| *revision += 1);
        self.store.set_value(&self.table, persisted).await;
        Ok(())
    }

    /// Receives the revision counter, bumped after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    pub async fn flush(&self) {
        self.store.flush(&self.table).await;
    }
}

impl<T> SyncedValue<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static,
{
    pub async fn open_serde(store: TableStore, table: impl Into<String>) -> Self {
        Self::open(store, table, SerdeTransform::<T>::new()).await
    }
}
