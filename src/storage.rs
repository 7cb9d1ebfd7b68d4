use std::{collections::HashMap, fmt::Debug, sync::Mutex};

/// Storage key of the generated device id.
pub const DEVICE_ID_KEY: &str = "device_id";

/// Small key-value store the host can back with persistent storage.
pub trait KeyValueStorage: Debug + Send + Sync {
    /// Stored value for `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`.
    fn set(&self, key: &str, value: &str);
}

/// Storage that lives as long as the pipeline. Used when the host does not provide one.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl KeyValueStorage for InMemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
    }
}

/// Read the device id from storage, generating and storing one if missing.
pub(crate) fn device_id(storage: &dyn KeyValueStorage) -> String {
    match storage.get(DEVICE_ID_KEY) {
        Some(id) if !id.is_empty() => id,
        _ => {
            let id = uuid::Uuid::new_v4().to_string();
            storage.set(DEVICE_ID_KEY, &id);
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_is_stable() {
        let storage = InMemoryStorage::default();
        let first = device_id(&storage);
        assert_eq!(Some(first.clone()), storage.get(DEVICE_ID_KEY));
        assert_eq!(first, device_id(&storage));
    }

    #[test]
    fn stored_device_id_is_used() {
        let storage = InMemoryStorage::default();
        storage.set(DEVICE_ID_KEY, "my-device");
        assert_eq!("my-device", device_id(&storage));
    }
}
