pub mod frame;
pub mod tab;

use std::path::{Path, PathBuf};

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use futures::StreamExt;

use crate::error::{Error, Result};

/// Find the Chrome or Edge binary on the system.
pub fn find_chrome_binary() -> Result<PathBuf> {
    if let Some(found) = chrome_candidates().into_iter().find(|path| path.exists()) {
        return Ok(found);
    }

    for name in [
        "google-chrome-stable",
        "google-chrome",
        "chromium",
        "microsoft-edge",
    ] {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    Err(Error::Browser(
        "could not find Chrome or Edge binary; install Chrome or set PATH".to_string(),
    ))
}

#[cfg(target_os = "macos")]
fn chrome_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"),
        PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
    ]
}

#[cfg(target_os = "windows")]
fn chrome_candidates() -> Vec<PathBuf> {
    let program_files =
        std::env::var("PROGRAMFILES").unwrap_or_else(|_| "C:\\Program Files".to_string());
    let program_files_x86 = std::env::var("PROGRAMFILES(X86)")
        .unwrap_or_else(|_| "C:\\Program Files (x86)".to_string());
    vec![
        PathBuf::from(&program_files).join("Google\\Chrome\\Application\\chrome.exe"),
        PathBuf::from(&program_files_x86).join("Google\\Chrome\\Application\\chrome.exe"),
        PathBuf::from(&program_files).join("Microsoft\\Edge\\Application\\msedge.exe"),
    ]
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn chrome_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/bin/google-chrome-stable"),
        PathBuf::from("/usr/bin/google-chrome"),
        PathBuf::from("/usr/bin/chromium-browser"),
        PathBuf::from("/usr/bin/chromium"),
    ]
}

/// Browser profile used by `serve` and `fill`, unless overridden.
pub fn resolve_profile_dir(override_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(dir.to_path_buf());
    }
    dirs::data_dir()
        .map(|dir| dir.join("passfill").join("profile"))
        .ok_or_else(|| Error::Browser("cannot determine data directory".to_string()))
}

/// Launch a Chrome/Edge instance with the given profile directory.
///
/// Returns the `Browser` handle and the task driving its CDP handler loop.
/// The task ends when the browser goes away.
pub async fn launch_browser(
    chrome_path: &Path,
    profile_dir: &Path,
) -> Result<(Browser, tokio::task::JoinHandle<()>)> {
    std::fs::create_dir_all(profile_dir)?;

    let config = BrowserConfig::builder()
        .chrome_executable(chrome_path)
        .user_data_dir(profile_dir)
        .with_head()
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-extensions")
        .launch_timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| Error::Browser(format!("failed to build browser config: {e}")))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| Error::Browser(format!("failed to launch {}: {e}", chrome_path.display())))?;

    let handle = tokio::spawn(async move {
        let mut count = 0u64;
        loop {
            match handler.next().await {
                Some(Ok(())) => count += 1,
                Some(Err(err)) => match &err {
                    CdpError::Ws(_)
                    | CdpError::Io(_)
                    | CdpError::ChannelSendError(_)
                    | CdpError::LaunchExit(_, _)
                    | CdpError::LaunchTimeout(_)
                    | CdpError::LaunchIo(_, _) => {
                        log::error!("browser handler stopped after {count} events: {err}");
                        break;
                    }
                    _ => log::debug!("ignoring CDP handler error: {err}"),
                },
                None => {
                    log::info!("browser closed after {count} events");
                    break;
                }
            }
        }
    });

    Ok((browser, handle))
}

/// Reuse the tab Chromium opens at startup, or create one.
pub async fn open_start_page(browser: &mut Browser) -> Result<chromiumoxide::Page> {
    browser
        .fetch_targets()
        .await
        .map_err(|e| Error::Browser(format!("failed to list targets: {e}")))?;
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;

    let pages = browser
        .pages()
        .await
        .map_err(|e| Error::Browser(format!("failed to list pages: {e}")))?;
    if let Some(page) = pages.into_iter().next() {
        return Ok(page);
    }

    let create_timeout = std::time::Duration::from_secs(10);
    match tokio::time::timeout(create_timeout, browser.new_page("about:blank")).await {
        Ok(Ok(page)) => Ok(page),
        Ok(Err(err)) => Err(Error::Browser(format!(
            "failed to create initial page: {err}"
        ))),
        Err(_) => Err(Error::Browser(format!(
            "timed out after {}s creating initial page",
            create_timeout.as_secs()
        ))),
    }
}
