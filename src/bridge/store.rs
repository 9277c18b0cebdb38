// Session storage backends
//
// - ChromeSessionStore: `chrome.storage.session`, cleared by the browser on restart
// - MemoryStore: in-process map, used by tests and as a reference backend

use std::cell::RefCell;

use async_trait::async_trait;
use js_sys::{Array, Function, Promise, Reflect};
use serde::Serialize;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;

use super::session::StoredSession;
use crate::error::{ChameleonError, Result};
use crate::profile::Profile;

/// Session-scoped key-value store owned by the privileged context.
#[async_trait(?Send)]
pub trait SessionStore {
    /// Read the stored record. Missing keys come back as `None` fields.
    async fn load(&self) -> Result<StoredSession>;

    /// Replace the whole record.
    async fn save(&self, record: &StoredSession) -> Result<()>;

    /// Write `profile` and `timestamp`, leaving the seed untouched.
    async fn save_profile(&self, profile: &Profile, timestamp: u64) -> Result<()>;

    /// Drop every key.
    async fn clear(&self) -> Result<()>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: RefCell<StoredSession>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `record`, as after a service-worker restart.
    pub fn with_record(record: StoredSession) -> Self {
        Self {
            record: RefCell::new(record),
        }
    }

    pub fn snapshot(&self) -> StoredSession {
        self.record.borrow().clone()
    }
}

#[async_trait(?Send)]
impl SessionStore for MemoryStore {
    async fn load(&self) -> Result<StoredSession> {
        Ok(self.snapshot())
    }

    async fn save(&self, record: &StoredSession) -> Result<()> {
        *self.record.borrow_mut() = record.clone();
        Ok(())
    }

    async fn save_profile(&self, profile: &Profile, timestamp: u64) -> Result<()> {
        let mut record = self.record.borrow_mut();
        record.profile = Some(profile.clone());
        record.timestamp = Some(timestamp);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.record.borrow_mut() = StoredSession::default();
        Ok(())
    }
}

/// `chrome.storage.session`
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromeSessionStore;

#[derive(Serialize)]
struct ProfileWrite<'a> {
    profile: &'a Profile,
    timestamp: u64,
}

impl ChromeSessionStore {
    pub fn new() -> Self {
        Self
    }

    /// Whether `chrome.storage.session` exists in this scope.
    pub fn is_available() -> bool {
        Self::area().is_ok()
    }

    fn area() -> Result<JsValue> {
        let mut node: JsValue = js_sys::global().into();
        for key in ["chrome", "storage", "session"] {
            node = Reflect::get(&node, &key.into()).map_err(storage_error)?;
            if node.is_undefined() || node.is_null() {
                return Err(ChameleonError::StorageUnavailable(format!("{} is undefined", key)));
            }
        }
        Ok(node)
    }

    async fn call(method: &str, args: &Array) -> Result<JsValue> {
        let area = Self::area()?;
        let f: Function = Reflect::get(&area, &method.into())
            .map_err(storage_error)?
            .dyn_into()
            .map_err(|_| ChameleonError::StorageUnavailable(format!("{} is not a function", method)))?;
        let promise: Promise = Reflect::apply(&f, &area, args)
            .map_err(storage_error)?
            .dyn_into()
            .map_err(|_| ChameleonError::StorageUnavailable(format!("{} did not return a promise", method)))?;
        JsFuture::from(promise).await.map_err(storage_error)
    }

    fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue> {
        let serializer = serde_wasm_bindgen::Serializer::json_compatible();
        Ok(value.serialize(&serializer)?)
    }
}

#[async_trait(?Send)]
impl SessionStore for ChromeSessionStore {
    async fn load(&self) -> Result<StoredSession> {
        let keys: Array = StoredSession::KEYS.iter().map(|k| JsValue::from_str(k)).collect();
        let items = Self::call("get", &Array::of1(&keys)).await?;
        Ok(serde_wasm_bindgen::from_value(items)?)
    }

    async fn save(&self, record: &StoredSession) -> Result<()> {
        let items = Self::to_js(record)?;
        Self::call("set", &Array::of1(&items)).await?;
        Ok(())
    }

    async fn save_profile(&self, profile: &Profile, timestamp: u64) -> Result<()> {
        let items = Self::to_js(&ProfileWrite { profile, timestamp })?;
        Self::call("set", &Array::of1(&items)).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Self::call("clear", &Array::new()).await?;
        Ok(())
    }
}

fn storage_error(e: JsValue) -> ChameleonError {
    let reason = e
        .dyn_ref::<js_sys::Error>()
        .map(|err| String::from(err.message()))
        .or_else(|| e.as_string())
        .unwrap_or_else(|| format!("{:?}", e));
    ChameleonError::StorageUnavailable(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::Seed;
    use futures::executor::block_on;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let record = StoredSession {
            session_seed: Some(Seed::from_bytes([3; 32])),
            session_start_time: Some(10),
            profile: None,
            timestamp: Some(10),
        };
        block_on(store.save(&record)).unwrap();
        assert_eq!(block_on(store.load()).unwrap(), record);

        block_on(store.clear()).unwrap();
        assert_eq!(block_on(store.load()).unwrap(), StoredSession::default());
    }

    #[test]
    fn test_save_profile_keeps_seed() {
        let seed = Seed::from_bytes([5; 32]);
        let store = MemoryStore::with_record(StoredSession {
            session_seed: Some(seed.clone()),
            ..Default::default()
        });
        let profile = crate::profile::synthesize(&seed).unwrap();
        block_on(store.save_profile(&profile, 99)).unwrap();

        let record = store.snapshot();
        assert_eq!(record.session_seed, Some(seed));
        assert_eq!(record.profile, Some(profile));
        assert_eq!(record.timestamp, Some(99));
    }
}
