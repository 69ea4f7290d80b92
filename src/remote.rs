use crate::db::Database;
use crate::errors::AppResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Backend table of named settings holding opaque string values.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> AppResult<()>;
    async fn delete(&self, key: &str) -> AppResult<bool>;
}

#[async_trait]
impl SettingsStore for Database {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.get_system_setting(key)
    }

    async fn put(&self, key: &str, value: &str) -> AppResult<()> {
        self.put_system_setting(key, value)
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        self.delete_system_setting(key)
    }
}

/// Best-effort accessor: backend failures are logged and reported as
/// "not found" or "save failed", never returned to the caller.
#[derive(Clone)]
pub struct RemoteSettings {
    store: Arc<dyn SettingsStore>,
}

impl RemoteSettings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn SettingsStore> {
        self.store.clone()
    }

    pub async fn load(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "remote setting load failed");
                None
            }
        }
    }

    pub async fn save(&self, key: &str, value: &str) -> bool {
        match self.store.put(key, value).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "remote setting save failed");
                false
            }
        }
    }

    pub async fn remove(&self, key: &str) -> bool {
        match self.store.delete(key).await {
            Ok(removed) => removed,
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "remote setting delete failed");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::SettingsStore;
    use crate::errors::{AppError, AppResult};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// In-memory settings table that can be switched into a failing state.
    #[derive(Default)]
    pub struct FakeSettingsStore {
        values: Mutex<HashMap<String, String>>,
        offline: AtomicBool,
    }

    impl FakeSettingsStore {
        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        pub fn value(&self, key: &str) -> Option<String> {
            self.values.lock().expect("fake settings lock").get(key).cloned()
        }

        fn check_online(&self) -> AppResult<()> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(AppError::Remote("backend unreachable".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SettingsStore for FakeSettingsStore {
        async fn get(&self, key: &str) -> AppResult<Option<String>> {
            self.check_online()?;
            Ok(self.value(key))
        }

        async fn put(&self, key: &str, value: &str) -> AppResult<()> {
            self.check_online()?;
            self.values
                .lock()
                .expect("fake settings lock")
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn delete(&self, key: &str) -> AppResult<bool> {
            self.check_online()?;
            Ok(self.values.lock().expect("fake settings lock").remove(key).is_some())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeSettingsStore;
    use super::RemoteSettings;
    use crate::db::Database;
    use std::sync::Arc;

    #[tokio::test]
    async fn database_backed_accessor_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("state.sqlite")).expect("db"));
        let remote = RemoteSettings::new(db);

        assert_eq!(remote.load("system_checkpoint").await, None);
        assert!(remote.save("system_checkpoint", "{\"a\":1}").await);
        assert_eq!(remote.load("system_checkpoint").await.as_deref(), Some("{\"a\":1}"));
        assert!(remote.remove("system_checkpoint").await);
        assert_eq!(remote.load("system_checkpoint").await, None);
    }

    #[tokio::test]
    async fn backend_failures_degrade_to_absent_and_failed() {
        let store = Arc::new(FakeSettingsStore::default());
        let remote = RemoteSettings::new(store.clone());
        assert!(remote.save("key", "value").await);

        store.set_offline(true);
        assert_eq!(remote.load("key").await, None);
        assert!(!remote.save("key", "other").await);
        assert!(!remote.remove("key").await);

        store.set_offline(false);
        assert_eq!(remote.load("key").await.as_deref(), Some("value"));
    }
}
