//! Client for the native host that stores and decrypts credential files.
//!
//! Messages use the browser native-messaging framing: a 4-byte length in
//! native byte order followed by that many bytes of UTF-8 JSON.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::login::{LoginId, SettingValue};
use crate::settings::{Settings, StoreConfig};

/// Largest response accepted from the host.
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Environment variable naming the host executable.
pub const HOST_ENV: &str = "PASSFILL_HOST";

const HOST_NAMES: &[&str] = &["passfill-host", "browserpass", "browserpass-linux64"];

/// Request/response transport to the native host.
#[async_trait]
pub trait HostTransport: Send + Sync {
    async fn send(&self, request: &Value) -> Result<Value>;
}

pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) -> Result<()> {
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len())
        .map_err(|_| Error::Host("request too large for native messaging".to_string()))?;
    writer.write_all(&len.to_ne_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Value> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let len = u32::from_ne_bytes(header) as usize;
    if len > MAX_MESSAGE_BYTES {
        return Err(Error::Host(format!(
            "native host response of {len} bytes exceeds the {MAX_MESSAGE_BYTES} byte limit"
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Runs the host executable once per request.
pub struct ProcessTransport {
    program: PathBuf,
}

impl ProcessTransport {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// Find the host: explicit path, then `PASSFILL_HOST`, then `PATH`.
    pub fn locate(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self::new(path.to_path_buf()));
        }
        if let Ok(path) = std::env::var(HOST_ENV) {
            if !path.trim().is_empty() {
                return Ok(Self::new(PathBuf::from(path)));
            }
        }
        for name in HOST_NAMES {
            if let Ok(path) = which::which(name) {
                return Ok(Self::new(path));
            }
        }
        Err(Error::Host(format!(
            "could not find the native host; pass --host or set {HOST_ENV}"
        )))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl HostTransport for ProcessTransport {
    async fn send(&self, request: &Value) -> Result<Value> {
        let mut child = tokio::process::Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Host(format!(
                    "failed to start native host {}: {e}",
                    self.program.display()
                ))
            })?;

        // Drain stderr alongside stdout so a chatty host cannot stall on a full pipe.
        let stderr = child.stderr.take();
        let stderr_drain = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buf).await;
            }
            buf
        });

        if let Some(mut stdin) = child.stdin.take() {
            write_message(&mut stdin, request).await?;
        }
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Host("native host stdout unavailable".to_string()))?;
        let response = read_message(&mut stdout).await;
        if response.is_err() {
            // The host may still be writing a rejected body.
            let _ = child.start_kill();
        }
        drop(stdout);

        let status = child.wait().await?;
        let stderr = stderr_drain.await.unwrap_or_default();
        let stderr = String::from_utf8_lossy(&stderr);
        if !stderr.trim().is_empty() {
            log::debug!("native host stderr: {}", stderr.trim());
        }
        if response.is_err() {
            log::debug!("native host exited with {status}");
        }
        response
    }
}

#[derive(Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    version: Option<Value>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// The host's default store, used when no store is configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DefaultStore {
    pub path: String,
    pub settings: BTreeMap<String, SettingValue>,
}

/// Result of the `configure` action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfiguration {
    pub version: Option<(u64, u64, u64)>,
    pub default_store: Option<DefaultStore>,
    pub store_settings: BTreeMap<String, BTreeMap<String, SettingValue>>,
}

/// Settings fields the host needs; usage history stays local.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HostSettings<'a> {
    gpg_path: &'a Option<String>,
    stores: &'a BTreeMap<String, StoreConfig>,
}

/// Store settings arrive as a JSON object or as the text of one.
fn settings_object(value: &Value) -> BTreeMap<String, SettingValue> {
    let parsed;
    let object = match value {
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text).unwrap_or(Value::Null);
            parsed.as_object()
        }
        other => other.as_object(),
    };
    object
        .into_iter()
        .flatten()
        .filter_map(|(key, value)| match value {
            Value::Bool(b) => Some((key.clone(), SettingValue::Bool(*b))),
            Value::String(s) => Some((key.clone(), SettingValue::Text(s.clone()))),
            _ => None,
        })
        .collect()
}

/// Typed actions over a [`HostTransport`].
pub struct HostClient {
    transport: Box<dyn HostTransport>,
}

impl HostClient {
    pub fn new(transport: Box<dyn HostTransport>) -> Self {
        Self { transport }
    }

    async fn call(&self, action: &str, settings: &Settings, params: Value) -> Result<Envelope> {
        let mut request = json!({
            "settings": HostSettings {
                gpg_path: &settings.gpg_path,
                stores: &settings.stores,
            },
            "action": action,
        });
        if let (Some(request), Value::Object(params)) = (request.as_object_mut(), params) {
            request.extend(params);
        }
        log::debug!("native host action {action}");
        let response = self.transport.send(&request).await?;
        let envelope: Envelope = serde_json::from_value(response)
            .map_err(|e| Error::Host(format!("malformed native host response: {e}")))?;
        if envelope.status != "ok" {
            return Err(Error::Host(envelope.message.unwrap_or_else(|| {
                format!("native host returned status {}", envelope.status)
            })));
        }
        Ok(envelope)
    }

    /// Ask the host for its version and store configuration.
    pub async fn configure(&self, settings: &Settings) -> Result<HostConfiguration> {
        let envelope = self.call("configure", settings, json!({})).await?;
        let version = envelope.version.as_ref().and_then(crate::version::parse_host_version);
        match version {
            Some(version) if crate::version::is_compatible(version) => {}
            Some((major, minor, patch)) => {
                return Err(Error::Validation(format!(
                    "native host {major}.{minor}.{patch} is not compatible with passfill {}",
                    crate::version::APP_VERSION
                )))
            }
            None => {
                return Err(Error::Validation(
                    "native host did not report a usable version".to_string(),
                ))
            }
        }

        let data = envelope.data.unwrap_or(Value::Null);
        let default_store = data
            .get("defaultStore")
            .and_then(|store| {
                let path = store.get("path")?.as_str()?.to_string();
                let settings = store.get("settings").map(settings_object).unwrap_or_default();
                Some(DefaultStore { path, settings })
            });
        let store_settings = data
            .get("storeSettings")
            .and_then(Value::as_object)
            .map(|stores| {
                stores
                    .iter()
                    .map(|(id, value)| (id.clone(), settings_object(value)))
                    .collect()
            })
            .unwrap_or_default();

        Ok(HostConfiguration {
            version,
            default_store,
            store_settings,
        })
    }

    /// Store id to store-relative paths, without the `.gpg` suffix.
    pub async fn list(&self, settings: &Settings) -> Result<BTreeMap<String, Vec<String>>> {
        let envelope = self.call("list", settings, json!({})).await?;
        let files = envelope
            .data
            .as_ref()
            .and_then(|data| data.get("files"))
            .and_then(Value::as_object)
            .ok_or_else(|| Error::Host("native host list response has no files".to_string()))?;

        let mut listing = BTreeMap::new();
        for (store_id, paths) in files {
            let mut entries: Vec<String> = paths
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .filter_map(|path| path.strip_suffix(".gpg"))
                .map(str::to_string)
                .collect();
            entries.sort();
            listing.insert(store_id.clone(), entries);
        }
        Ok(listing)
    }

    /// Decrypted contents of one credential file.
    pub async fn fetch(&self, settings: &Settings, id: &LoginId) -> Result<String> {
        let params = json!({ "storeId": id.store_id, "file": format!("{}.gpg", id.path) });
        let envelope = self.call("fetch", settings, params).await?;
        envelope
            .data
            .as_ref()
            .and_then(|data| data.get("contents"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Host(format!("native host returned no contents for {id}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Write an executable shell script standing in for the host.
    #[cfg(unix)]
    fn script_host(prefix: &str, body: &str) -> (PathBuf, ProcessTransport) {
        use std::os::unix::fs::PermissionsExt;

        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "passfill-{prefix}-{}-{nanos}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let script = dir.join("host.sh");
        std::fs::write(&script, format!("#!/bin/sh\ncat >/dev/null\n{body}\n")).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, ProcessTransport::new(script))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_host_oversized_response_is_rejected() {
        // 2 MiB length header, then the body it announces.
        let (dir, transport) = script_host(
            "host-oversized",
            "printf '\\000\\000\\040\\000'\nhead -c 2097152 /dev/zero",
        );
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            transport.send(&json!({"action": "list"})),
        )
        .await
        .unwrap();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("exceeds"), "{err}");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_host_noisy_stderr_still_answers() {
        let (dir, transport) = script_host(
            "host-stderr",
            "head -c 262144 /dev/zero >&2\nprintf '\\002\\000\\000\\000{}'",
        );
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            transport.send(&json!({"action": "list"})),
        )
        .await
        .unwrap();
        assert_eq!(result.unwrap(), json!({}));
        let _ = std::fs::remove_dir_all(&dir);
    }

    /// Answers requests from a fixed action table and records what it saw.
    #[derive(Default)]
    pub(crate) struct ScriptedHost {
        pub(crate) responses: BTreeMap<String, Value>,
        pub(crate) requests: Arc<Mutex<Vec<Value>>>,
    }

    impl ScriptedHost {
        pub(crate) fn with(mut self, action: &str, response: Value) -> Self {
            self.responses.insert(action.to_string(), response);
            self
        }
    }

    #[async_trait]
    impl HostTransport for ScriptedHost {
        async fn send(&self, request: &Value) -> Result<Value> {
            if let Ok(mut seen) = self.requests.lock() {
                seen.push(request.clone());
            }
            let action = request["action"].as_str().unwrap_or_default();
            Ok(self
                .responses
                .get(action)
                .cloned()
                .unwrap_or_else(|| json!({"status": "error", "message": "unknown action"})))
        }
    }

    #[tokio::test]
    async fn framing_roundtrips_over_a_pipe() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let message = json!({"action": "list", "n": 1});
        let writer = tokio::spawn(async move {
            write_message(&mut a, &json!({"action": "list", "n": 1})).await.unwrap();
        });
        let read = read_message(&mut b).await.unwrap();
        writer.await.unwrap();
        assert_eq!(read, message);
    }

    #[tokio::test]
    async fn oversized_response_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_MESSAGE_BYTES as u32 + 1).to_ne_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &len).await.unwrap();
        let err = read_message(&mut b).await.unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[tokio::test]
    async fn error_status_is_surfaced_verbatim() {
        let host = ScriptedHost::default().with(
            "fetch",
            json!({"status": "error", "message": "gpg: decryption failed"}),
        );
        let client = HostClient::new(Box::new(host));
        let err = client
            .fetch(&Settings::default(), &LoginId::new("personal", "github.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Host(_)));
        assert_eq!(err.to_string(), "gpg: decryption failed");
    }

    #[tokio::test]
    async fn fetch_sends_store_and_file() {
        let host = ScriptedHost::default().with(
            "fetch",
            json!({"status": "ok", "data": {"contents": "pw\nlogin: bob"}}),
        );
        let client = HostClient::new(Box::new(host));
        let mut settings = Settings::default();
        settings.touch_recency("x", &LoginId::new("a", "b"), 1);
        let contents = client
            .fetch(&settings, &LoginId::new("personal", "github.com"))
            .await
            .unwrap();
        assert_eq!(contents, "pw\nlogin: bob");
    }

    #[tokio::test]
    async fn request_carries_settings_but_not_history() {
        let host = ScriptedHost::default().with(
            "list",
            json!({"status": "ok", "data": {"files": {"personal": ["b.gpg", "a.gpg", "notes.txt"]}}}),
        );
        let seen = host.requests.clone();
        let client = HostClient::new(Box::new(host));
        let mut settings = Settings::default();
        settings.gpg_path = Some("/usr/bin/gpg".to_string());
        settings.touch_recency("x", &LoginId::new("a", "b"), 1);

        let files = client.list(&settings).await.unwrap();
        assert_eq!(files["personal"], vec!["a", "b"]);

        let requests = seen.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request["action"], "list");
        assert_eq!(request["settings"]["gpgPath"], "/usr/bin/gpg");
        assert!(request["settings"].get("recent").is_none());
    }

    #[tokio::test]
    async fn configure_reads_store_settings() {
        let host = ScriptedHost::default().with(
            "configure",
            json!({
                "status": "ok",
                "version": crate::version::APP_VERSION,
                "data": {
                    "defaultStore": {"path": "/home/u/.password-store", "settings": "{\"autoSubmit\": true}"},
                    "storeSettings": {"work": {"autoSubmit": false, "count": 3}}
                }
            }),
        );
        let client = HostClient::new(Box::new(host));
        let config = client.configure(&Settings::default()).await.unwrap();
        let default_store = config.default_store.unwrap();
        assert_eq!(default_store.path, "/home/u/.password-store");
        assert_eq!(
            default_store.settings.get("autoSubmit"),
            Some(&SettingValue::Bool(true))
        );
        assert_eq!(config.store_settings["work"].len(), 1);
    }

    #[tokio::test]
    async fn incompatible_host_is_refused() {
        let host = ScriptedHost::default().with(
            "configure",
            json!({"status": "ok", "version": "99.0.0", "data": {}}),
        );
        let client = HostClient::new(Box::new(host));
        let err = client.configure(&Settings::default()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn explicit_host_path_wins() {
        let transport = ProcessTransport::locate(Some(Path::new("/opt/host"))).unwrap();
        assert_eq!(transport.program(), Path::new("/opt/host"));
    }
}
