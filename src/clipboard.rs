use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// How long a copied secret stays on the clipboard.
pub const CLEAR_AFTER: Duration = Duration::from_secs(60);

#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn write(&self, text: &str) -> Result<()>;
    async fn read(&self) -> Result<String>;
}

/// Clipboard driven through the platform's command-line tools.
pub struct CommandClipboard {
    copy: (PathBuf, Vec<&'static str>),
    paste: (PathBuf, Vec<&'static str>),
}

impl CommandClipboard {
    /// Pick the first available tool pair.
    pub fn detect() -> Result<Self> {
        let pairs: [(&str, &[&'static str], &str, &[&'static str]); 3] = [
            ("wl-copy", &[], "wl-paste", &["--no-newline"]),
            (
                "xclip",
                &["-selection", "clipboard"],
                "xclip",
                &["-selection", "clipboard", "-o"],
            ),
            ("pbcopy", &[], "pbpaste", &[]),
        ];
        for (copy, copy_args, paste, paste_args) in pairs {
            if let (Ok(copy), Ok(paste)) = (which::which(copy), which::which(paste)) {
                return Ok(Self {
                    copy: (copy, copy_args.to_vec()),
                    paste: (paste, paste_args.to_vec()),
                });
            }
        }
        Err(Error::Validation(
            "no clipboard tool found; install wl-clipboard or xclip".to_string(),
        ))
    }
}

#[async_trait]
impl Clipboard for CommandClipboard {
    async fn write(&self, text: &str) -> Result<()> {
        let (program, args) = &self.copy;
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
        }
        let status = child.wait().await?;
        if !status.success() {
            return Err(Error::Validation(format!(
                "{} exited with {status}",
                program.display()
            )));
        }
        Ok(())
    }

    async fn read(&self) -> Result<String> {
        let (program, args) = &self.paste;
        let output = tokio::process::Command::new(program)
            .args(args)
            .stderr(Stdio::null())
            .output()
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Copy `text` and clear it after `clear_after` unless something else was
/// copied in the meantime.
pub async fn copy_with_clear(
    clipboard: Arc<dyn Clipboard>,
    text: String,
    clear_after: Duration,
) -> Result<tokio::task::JoinHandle<()>> {
    clipboard.write(&text).await?;
    Ok(tokio::spawn(async move {
        tokio::time::sleep(clear_after).await;
        match clipboard.read().await {
            Ok(current) if current == text => {
                if let Err(err) = clipboard.write("").await {
                    log::warn!("failed to clear clipboard: {err}");
                } else {
                    log::debug!("clipboard cleared");
                }
            }
            Ok(_) => log::debug!("clipboard changed since copy; leaving it"),
            Err(err) => log::warn!("failed to read clipboard: {err}"),
        }
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct MemoryClipboard {
        pub(crate) contents: Mutex<String>,
    }

    #[async_trait]
    impl Clipboard for MemoryClipboard {
        async fn write(&self, text: &str) -> Result<()> {
            *self.contents.lock().unwrap() = text.to_string();
            Ok(())
        }

        async fn read(&self) -> Result<String> {
            Ok(self.contents.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn clears_unchanged_clipboard() {
        let clipboard = Arc::new(MemoryClipboard::default());
        let handle = copy_with_clear(
            clipboard.clone(),
            "hunter2".to_string(),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        assert_eq!(clipboard.read().await.unwrap(), "hunter2");
        handle.await.unwrap();
        assert_eq!(clipboard.read().await.unwrap(), "");
    }

    #[tokio::test]
    async fn keeps_newer_clipboard_contents() {
        let clipboard = Arc::new(MemoryClipboard::default());
        let handle = copy_with_clear(
            clipboard.clone(),
            "hunter2".to_string(),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        clipboard.write("something else").await.unwrap();
        handle.await.unwrap();
        assert_eq!(clipboard.read().await.unwrap(), "something else");
    }
}
