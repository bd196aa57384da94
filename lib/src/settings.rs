//! Persisted key-value settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;

use crate::errors::*;
use crate::util::*;

make_log_macro!(debug, "settings");
make_log_macro!(warn, "settings");

pub type ObserverId = u64;

/// Called with the key whose value changed.
pub type SettingObserver = Arc<dyn Fn(&str) + Send + Sync>;

pub trait SettingsStore: Send + Sync {
    fn get_int(&self, key: &str) -> Result<Option<i64>>;

    fn put_int(&self, key: &str, value: i64) -> Result<()>;

    fn register_observer(&self, key: &str, observer: SettingObserver) -> Result<ObserverId>;

    fn unregister_observer(&self, id: ObserverId) -> Result<()>;

    /// Resolves once every earlier `put_int` reached storage. `None` when
    /// writes are not deferred.
    fn flush(&self) -> Option<oneshot::Receiver<()>> {
        None
    }
}

/// Registration of a [`SettingObserver`], unregistered when dropped.
pub struct ObserverHandle {
    id: ObserverId,
    store: Arc<dyn SettingsStore>,
}

impl ObserverHandle {
    pub fn register(
        store: &Arc<dyn SettingsStore>,
        key: &str,
        observer: SettingObserver,
    ) -> Result<Self> {
        let id = store.register_observer(key, observer)?;
        debug!("observer {id} registered for {key}");
        Ok(Self {
            id,
            store: Arc::clone(store),
        })
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Err(e) = self.store.unregister_observer(self.id) {
            warn!("unregister observer {} failed: {e}", self.id);
        }
    }
}

#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<BTreeMap<String, i64>>,
    observers: Mutex<Vec<(ObserverId, String, SettingObserver)>>,
    next_id: AtomicU64,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<K: Into<String>>(values: impl IntoIterator<Item = (K, i64)>) -> Self {
        let settings = Self::default();
        *lock(&settings.values) = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        settings
    }

    pub fn values(&self) -> BTreeMap<String, i64> {
        lock(&self.values).clone()
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }

    /// Stores the value, returns whether it changed.
    fn store(&self, key: &str, value: i64) -> bool {
        lock(&self.values).insert(key.to_string(), value) != Some(value)
    }

    fn notify(&self, key: &str) {
        let observers: Vec<SettingObserver> = lock(&self.observers)
            .iter()
            .filter(|(_, observed, _)| observed == key)
            .map(|(_, _, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer(key);
        }
    }
}

impl SettingsStore for MemorySettings {
    fn get_int(&self, key: &str) -> Result<Option<i64>> {
        Ok(lock(&self.values).get(key).copied())
    }

    fn put_int(&self, key: &str, value: i64) -> Result<()> {
        if self.store(key, value) {
            self.notify(key);
        }
        Ok(())
    }

    fn register_observer(&self, key: &str, observer: SettingObserver) -> Result<ObserverId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.observers).push((id, key.to_string(), observer));
        Ok(id)
    }

    fn unregister_observer(&self, id: ObserverId) -> Result<()> {
        let mut observers = lock(&self.observers);
        let count = observers.len();
        observers.retain(|(observer_id, _, _)| *observer_id != id);
        if observers.len() == count {
            return Err(LumenError::Other(format!("no observer with id {id}")));
        }
        Ok(())
    }
}

enum SettingsWrite {
    Contents(String),
    Flush(oneshot::Sender<()>),
}

async fn write_settings_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

/// Writes snapshots of the settings in the order they were taken.
async fn serve_writes(path: PathBuf, mut rx: UnboundedReceiver<SettingsWrite>) {
    while let Some(request) = rx.recv().await {
        match request {
            SettingsWrite::Contents(contents) => {
                if let Err(e) = write_settings_file(&path, &contents).await {
                    warn!("could not write {}: {e}", path.display());
                }
            }
            SettingsWrite::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("{}: writer released", path.display());
}

/// Settings kept in a TOML file, rewritten on every change.
///
/// Writes are handed to a task on the current tokio runtime, so changes never
/// wait for the file system; [`SettingsStore::flush`] waits for them.
pub struct TomlSettings {
    path: PathBuf,
    inner: MemorySettings,
    writer: UnboundedSender<SettingsWrite>,
}

impl TomlSettings {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values: BTreeMap<String, i64> = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => deserialize_toml(&path, &contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("loaded {} settings from {}", values.len(), path.display());
        let (writer, rx) = unbounded_channel();
        tokio::spawn(serve_writes(path.clone(), rx));
        Ok(Self {
            path,
            inner: MemorySettings::with_values(values),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        let contents = toml::to_string(&self.inner.values())?;
        self.writer
            .send(SettingsWrite::Contents(contents))
            .map_err(|_| LumenError::Other("settings writer stopped".into()))
    }
}

impl SettingsStore for TomlSettings {
    fn get_int(&self, key: &str) -> Result<Option<i64>> {
        self.inner.get_int(key)
    }

    fn put_int(&self, key: &str, value: i64) -> Result<()> {
        if self.inner.store(key, value) {
            self.persist()?;
            self.inner.notify(key);
        }
        Ok(())
    }

    fn register_observer(&self, key: &str, observer: SettingObserver) -> Result<ObserverId> {
        self.inner.register_observer(key, observer)
    }

    fn unregister_observer(&self, id: ObserverId) -> Result<()> {
        self.inner.unregister_observer(id)
    }

    fn flush(&self) -> Option<oneshot::Receiver<()>> {
        let (done, rx) = oneshot::channel();
        self.writer.send(SettingsWrite::Flush(done)).ok()?;
        Some(rx)
    }
}
