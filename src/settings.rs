use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::login::{LoginId, LoginRecord, Recency, SettingValue};

/// A store as configured by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, SettingValue>,
}

/// Foreign-origin fill decisions for one host.
///
/// A bare `false` is a blanket denial for the host; otherwise decisions are
/// kept per embedded origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostForeignFills {
    Blanket(bool),
    PerOrigin(BTreeMap<String, bool>),
}

/// Persisted settings, stored as `settings.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub auto_submit: bool,
    #[serde(default)]
    pub gpg_path: Option<String>,
    #[serde(default)]
    pub stores: BTreeMap<String, StoreConfig>,
    #[serde(default)]
    pub foreign_fills: BTreeMap<String, HostForeignFills>,
    #[serde(default)]
    pub recent: BTreeMap<String, Recency>,
}

impl Settings {
    /// True when foreign-origin filling is denied outright for `host`.
    pub fn foreign_fill_blocked(&self, host: &str) -> bool {
        matches!(
            self.foreign_fills.get(host),
            Some(HostForeignFills::Blanket(false))
        )
    }

    /// Per-origin decisions recorded for `host`.
    pub fn foreign_decisions(&self, host: &str) -> BTreeMap<String, bool> {
        match self.foreign_fills.get(host) {
            Some(HostForeignFills::PerOrigin(decisions)) => decisions.clone(),
            _ => BTreeMap::new(),
        }
    }

    pub fn record_foreign_decision(&mut self, host: &str, origin: &str, allowed: bool) {
        let entry = self
            .foreign_fills
            .entry(host.to_string())
            .or_insert_with(|| HostForeignFills::PerOrigin(BTreeMap::new()));
        match entry {
            HostForeignFills::PerOrigin(decisions) => {
                decisions.insert(origin.to_string(), allowed);
            }
            HostForeignFills::Blanket(_) => {
                let mut decisions = BTreeMap::new();
                decisions.insert(origin.to_string(), allowed);
                *entry = HostForeignFills::PerOrigin(decisions);
            }
        }
    }

    pub fn forget_foreign_decisions(&mut self, host: &str) -> bool {
        self.foreign_fills.remove(host).is_some()
    }

    pub fn recency(&self, host: &str, id: &LoginId) -> Recency {
        self.recent
            .get(&recency_key(host, id))
            .copied()
            .unwrap_or_default()
    }

    /// Bump the usage counter for `id` on `host`.
    pub fn touch_recency(&mut self, host: &str, id: &LoginId, now: i64) -> Recency {
        let entry = self.recent.entry(recency_key(host, id)).or_default();
        entry.when = now;
        entry.count += 1;
        *entry
    }

    /// Store-level value for `key`, if configured.
    pub fn store_setting(&self, store_id: &str, key: &str) -> Option<&SettingValue> {
        self.stores
            .get(store_id)
            .and_then(|store| lookup_setting(&store.settings, key))
    }

    /// Resolve auto-submit for a login: file, then store, then global.
    pub fn auto_submit_for(&self, record: &LoginRecord) -> bool {
        if let Some(value) = record.auto_submit() {
            return value;
        }
        match self.store_setting(&record.identity().store_id, "autosubmit") {
            Some(SettingValue::Bool(value)) => *value,
            _ => self.auto_submit,
        }
    }

    /// Layer host-reported store configuration under the persisted one.
    ///
    /// Persisted stores keep their own values; host values only fill gaps.
    /// Without any configured store the host's default store is used.
    pub fn with_host_configuration(&self, host: &crate::host::HostConfiguration) -> Settings {
        let mut merged = self.clone();
        if merged.stores.is_empty() {
            if let Some(default_store) = &host.default_store {
                merged.stores.insert(
                    "default".to_string(),
                    StoreConfig {
                        id: "default".to_string(),
                        name: "default".to_string(),
                        path: default_store.path.clone(),
                        settings: default_store.settings.clone(),
                    },
                );
            }
        }
        for (store_id, host_settings) in &host.store_settings {
            if let Some(store) = merged.stores.get_mut(store_id) {
                for (key, value) in host_settings {
                    store
                        .settings
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
            }
        }
        merged
    }
}

/// Settings keys are matched case-insensitively so `autoSubmit` in JSON and
/// `autosubmit:` in a credential file name the same thing.
fn lookup_setting<'a>(
    settings: &'a BTreeMap<String, SettingValue>,
    key: &str,
) -> Option<&'a SettingValue> {
    settings
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value)
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// One-way key for usage history so stored history does not reveal paths.
pub fn recency_key(host: &str, id: &LoginId) -> String {
    let login = sha256_hex(&id.path);
    let store = sha256_hex(&format!("{}{login}", id.store_id));
    sha256_hex(&format!("{host}{store}"))
}

/// Persistence for [`Settings`].
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Settings>;

    /// Apply `change` to the latest persisted settings and save the result.
    fn update(&self, change: &mut dyn FnMut(&mut Settings)) -> Result<Settings>;
}

/// Default location of `settings.json`.
pub fn default_settings_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| Error::Settings("could not determine config directory".to_string()))?;
    Ok(config_dir.join("passfill").join("settings.json"))
}

/// JSON file backed settings with atomic replacement on write.
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "settings.json".into());
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn read(&self) -> Result<Settings> {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                Error::Settings(format!("failed to parse '{}': {e}", self.path.display()))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write via temp-file + rename.
    fn write(&self, settings: &Settings) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| io::Error::other("settings path has no parent"))?;
        fs::create_dir_all(parent)?;

        let json = serde_json::to_string_pretty(settings)?;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let temp_path = parent.join(format!(
            ".settings.json.tmp-{}-{nanos}",
            std::process::id()
        ));
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        if let Err(err) = replace_file(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(err.into());
        }
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    fn acquire_lock(&self) -> Result<fs::File> {
        use fs2::FileExt;

        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        file.lock_exclusive()?;
        Ok(file)
    }
}

impl SettingsStore for SettingsFile {
    fn load(&self) -> Result<Settings> {
        self.read()
    }

    fn update(&self, change: &mut dyn FnMut(&mut Settings)) -> Result<Settings> {
        let _lock = self.acquire_lock()?;
        let mut settings = self.read()?;
        change(&mut settings);
        self.write(&settings)?;
        Ok(settings)
    }
}

/// Atomically replace a file via rename, with a Windows fallback.
fn replace_file(temp_path: &Path, path: &Path) -> io::Result<()> {
    match fs::rename(temp_path, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            #[cfg(windows)]
            {
                if err.kind() == io::ErrorKind::AlreadyExists {
                    fs::remove_file(path)?;
                    return fs::rename(temp_path, path);
                }
            }
            Err(err)
        }
    }
}

/// In-memory settings for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemorySettings {
    inner: std::sync::Mutex<Settings>,
    pub(crate) saves: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MemorySettings {
    pub(crate) fn new(settings: Settings) -> Self {
        Self {
            inner: std::sync::Mutex::new(settings),
            saves: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[cfg(test)]
impl SettingsStore for MemorySettings {
    fn load(&self) -> Result<Settings> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| Error::Settings("poisoned".to_string()))?;
        Ok(guard.clone())
    }

    fn update(&self, change: &mut dyn FnMut(&mut Settings)) -> Result<Settings> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| Error::Settings("poisoned".to_string()))?;
        change(&mut guard);
        self.saves
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(guard.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn create_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir =
            std::env::temp_dir().join(format!("passfill-{prefix}-{}-{now}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_file_reads_defaults() {
        let dir = create_temp_dir("settings-missing");
        let store = SettingsFile::new(dir.join("settings.json"));
        assert_eq!(store.load().unwrap(), Settings::default());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = create_temp_dir("settings-malformed");
        let path = dir.join("settings.json");
        fs::write(&path, "{not json").unwrap();
        let err = SettingsFile::new(path).load().unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn update_roundtrips_through_disk() {
        let dir = create_temp_dir("settings-update");
        let store = SettingsFile::new(dir.join("nested").join("settings.json"));
        store
            .update(&mut |s| {
                s.auto_submit = true;
                s.record_foreign_decision("example.com", "https://auth.example.net", true);
            })
            .unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.auto_submit);
        assert_eq!(
            loaded.foreign_decisions("example.com").get("https://auth.example.net"),
            Some(&true)
        );

        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("\"autoSubmit\": true"));
        assert!(text.contains("\"foreignFills\""));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn settings_json_uses_documented_keys() {
        let json = r#"{
            "autoSubmit": true,
            "gpgPath": "/usr/bin/gpg2",
            "stores": {"work": {"id": "work", "name": "Work", "path": "~/.password-store-work"}},
            "foreignFills": {"a.com": false, "b.com": {"https://x.net": true}},
            "recent": {"abc": {"when": 5, "count": 2}},
            "unknown": 1
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert!(settings.auto_submit);
        assert_eq!(settings.gpg_path.as_deref(), Some("/usr/bin/gpg2"));
        assert_eq!(settings.stores["work"].name, "Work");
        assert!(settings.foreign_fill_blocked("a.com"));
        assert!(!settings.foreign_fill_blocked("b.com"));
        assert_eq!(settings.foreign_decisions("b.com").len(), 1);
        assert_eq!(settings.recent["abc"].count, 2);
    }

    #[test]
    fn recording_decision_replaces_blanket_entry() {
        let mut settings = Settings::default();
        settings
            .foreign_fills
            .insert("a.com".to_string(), HostForeignFills::Blanket(false));
        settings.record_foreign_decision("a.com", "https://x.net", false);
        assert!(!settings.foreign_fill_blocked("a.com"));
        assert_eq!(
            settings.foreign_decisions("a.com").get("https://x.net"),
            Some(&false)
        );
    }

    #[test]
    fn recency_key_is_opaque_and_stable() {
        let id = LoginId::new("personal", "work/github.com");
        let key = recency_key("github.com", &id);
        assert_eq!(key.len(), 64);
        assert!(!key.contains("github"));
        assert_eq!(key, recency_key("github.com", &id));
        assert_ne!(key, recency_key("gitlab.com", &id));
        assert_ne!(
            key,
            recency_key("github.com", &LoginId::new("work", "work/github.com"))
        );
    }

    #[test]
    fn touch_recency_counts_uses() {
        let id = LoginId::new("personal", "github.com");
        let mut settings = Settings::default();
        settings.touch_recency("github.com", &id, 100);
        let recency = settings.touch_recency("github.com", &id, 200);
        assert_eq!(recency, Recency { when: 200, count: 2 });
        assert_eq!(settings.recency("github.com", &id), recency);
        assert_eq!(settings.recency("other.com", &id), Recency::default());
    }

    #[test]
    fn auto_submit_overlay_prefers_login_then_store_then_global() {
        let mut settings = Settings {
            auto_submit: false,
            ..Settings::default()
        };
        let mut store_settings = BTreeMap::new();
        store_settings.insert("autoSubmit".to_string(), SettingValue::Bool(true));
        settings.stores.insert(
            "work".to_string(),
            StoreConfig {
                id: "work".to_string(),
                name: "Work".to_string(),
                path: "/tmp/work".to_string(),
                settings: store_settings,
            },
        );

        let plain = LoginRecord::from_raw(LoginId::new("work", "a"), "pw".to_string()).unwrap();
        assert!(settings.auto_submit_for(&plain));

        let explicit = LoginRecord::from_raw(
            LoginId::new("work", "a"),
            "pw\nautosubmit: no".to_string(),
        )
        .unwrap();
        assert!(!settings.auto_submit_for(&explicit));

        let other = LoginRecord::from_raw(LoginId::new("home", "a"), "pw".to_string()).unwrap();
        assert!(!settings.auto_submit_for(&other));
    }
}
