use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

/// A basic/digest authentication challenge seen by the browser.
#[derive(Debug, Clone)]
pub struct AuthChallenge {
    /// URL of the request that was challenged.
    pub url: String,
    /// Whether the request loads the tab's top-level document.
    pub main_frame_document: bool,
}

/// What to tell the browser about a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Let the browser handle it normally.
    Default,
    Provide { username: String, password: String },
}

/// Yes/no confirmation shown to the user.
#[async_trait]
pub trait AuthPrompt: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

pub struct AuthResponder {
    launch_host: String,
    username: String,
    password: String,
    answered: AtomicBool,
    active: AtomicBool,
}

impl AuthResponder {
    pub fn new(launch_url: &str, username: String, password: String) -> Self {
        let launch_host = Url::parse(launch_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_default();
        Self {
            launch_host,
            username,
            password,
            answered: AtomicBool::new(false),
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Decide how to answer `challenge`. At most one challenge is answered.
    pub async fn respond(&self, challenge: &AuthChallenge, prompt: &dyn AuthPrompt) -> AuthDecision {
        if !self.is_active() || !challenge.main_frame_document {
            return AuthDecision::Default;
        }
        if self.answered.swap(true, Ordering::SeqCst) {
            return AuthDecision::Default;
        }

        let Ok(url) = Url::parse(&challenge.url) else {
            return AuthDecision::Default;
        };
        let host = url.host_str().unwrap_or_default();
        let mut concerns = Vec::new();
        if host != self.launch_host {
            concerns.push(format!(
                "{host} is asking for the credentials meant for {}.",
                self.launch_host
            ));
        }
        if url.scheme() != "https" {
            concerns.push(format!("The connection to {host} is not encrypted."));
        }
        if !concerns.is_empty() {
            let message = format!("{} Send the credentials anyway?", concerns.join(" "));
            if !prompt.confirm(&message).await {
                log::info!("user declined HTTP authentication for {host}");
                return AuthDecision::Default;
            }
        }

        log::info!("answering HTTP authentication for {host}");
        AuthDecision::Provide {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Owning handle for an armed responder; dropping it disarms the responder.
pub struct ResponderHandle {
    responder: Arc<AuthResponder>,
}

impl ResponderHandle {
    pub fn new(responder: AuthResponder) -> Self {
        Self {
            responder: Arc::new(responder),
        }
    }
}

impl Drop for ResponderHandle {
    fn drop(&mut self) {
        self.responder.active.store(false, Ordering::SeqCst);
    }
}

/// Armed responders by tab id.
#[derive(Default)]
pub struct AuthResponderRegistry {
    responders: Mutex<HashMap<String, ResponderHandle>>,
}

impl AuthResponderRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ResponderHandle>> {
        match self.responders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Arm `responder` for `tab_id`, replacing any previous one.
    pub fn arm(&self, tab_id: &str, responder: AuthResponder) {
        let previous = self
            .lock()
            .insert(tab_id.to_string(), ResponderHandle::new(responder));
        if previous.is_some() {
            log::debug!("replaced auth responder for tab {tab_id}");
        }
    }

    /// Remove the responder for `tab_id`, if any.
    pub fn disarm(&self, tab_id: &str) -> bool {
        self.lock().remove(tab_id).is_some()
    }

    pub fn responder(&self, tab_id: &str) -> Option<Arc<AuthResponder>> {
        self.lock()
            .get(tab_id)
            .map(|handle| handle.responder.clone())
    }
}
