#[cfg(unix)]
mod unix_only {
    use async_trait::async_trait;
    use passfill_lib::background::socket::{send_request, serve};
    use passfill_lib::background::Background;
    use passfill_lib::host::{HostClient, HostTransport};
    use passfill_lib::settings::{SettingsFile, SettingsStore};
    use serde_json::{json, Value};
    use std::error::Error;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    struct TestSandbox {
        root: PathBuf,
    }

    impl TestSandbox {
        fn new(prefix: &str) -> Result<Self, Box<dyn Error>> {
            let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
            let root = std::env::temp_dir().join(format!(
                "pf-{prefix}-{}-{nanos}",
                std::process::id()
            ));
            fs::create_dir_all(&root)?;
            Ok(Self { root })
        }

        fn path(&self) -> &Path {
            &self.root
        }
    }

    impl Drop for TestSandbox {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    /// Native host stand-in serving a two-store password tree.
    struct StoreHost;

    #[async_trait]
    impl HostTransport for StoreHost {
        async fn send(&self, request: &Value) -> passfill_lib::Result<Value> {
            Ok(match request["action"].as_str() {
                Some("configure") => json!({
                    "status": "ok",
                    "version": passfill_lib::version::APP_VERSION,
                    "data": {"defaultStore": {"path": "/home/u/.password-store", "settings": {}}}
                }),
                Some("list") => json!({"status": "ok", "data": {"files": {
                    "personal": ["github.com/alice.gpg", "mail.example.com.gpg"],
                    "work": ["example.com/admin.gpg"]
                }}}),
                Some("fetch") => json!({"status": "ok", "data": {
                    "contents": "hunter2\nuser: alice\nurl: https://mail.example.com/"
                }}),
                _ => json!({"status": "error", "message": "unsupported action"}),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn socket_session_lists_and_saves() -> Result<(), Box<dyn Error>> {
        let sandbox = TestSandbox::new("socket")?;
        let settings_path = sandbox.path().join("settings.json");
        let socket_path = sandbox.path().join("ui.sock");

        let settings = Arc::new(SettingsFile::new(settings_path.clone()));
        let background = Arc::new(Background::new(
            settings.clone(),
            HostClient::new(Box::new(StoreHost)),
        ));
        let server = {
            let background = background.clone();
            let socket_path = socket_path.clone();
            tokio::spawn(async move { serve(&background, &socket_path, || true).await })
        };
        for _ in 0..200 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let path = socket_path.clone();
        let responses = tokio::task::spawn_blocking(move || -> Result<Vec<Value>, String> {
            [
                json!({"action": "listFiles", "host": "mail.example.com"}),
                json!({"action": "saveSettings", "settings": {"autoSubmit": true}}),
                json!({"action": "fill", "login": {"storeId": "personal", "path": "github.com/alice"}}),
                json!({"action": "stop"}),
            ]
            .iter()
            .map(|request| send_request(&path, request).map_err(|err| err.to_string()))
            .collect()
        })
        .await??;

        let files = responses[0]["files"].as_array().ok_or("files missing")?;
        let labels: Vec<String> = files
            .iter()
            .map(|file| format!("{}/{}", file["storeId"].as_str().unwrap_or(""), file["path"].as_str().unwrap_or("")))
            .collect();
        assert_eq!(
            labels,
            vec![
                "personal/mail.example.com",
                "work/example.com/admin",
                "personal/github.com/alice"
            ]
        );

        assert_eq!(responses[1]["status"], "ok");
        assert!(settings.load()?.auto_submit);

        // No browser tab behind this session.
        assert_eq!(responses[2]["status"], "error");
        assert_eq!(responses[3], json!({"status": "ok"}));

        server.await??;
        assert!(!socket_path.exists());
        Ok(())
    }
}
