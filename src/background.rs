#[cfg(unix)]
pub mod socket;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::auth::{AuthResponder, AuthResponderRegistry};
use crate::clipboard::{copy_with_clear, Clipboard, CLEAR_AFTER};
use crate::credentials::{ExtractedCredentials, SubmissionLog};
use crate::directory::CredentialDirectory;
use crate::domain::match_domain;
use crate::error::{Error, Result};
use crate::fill::dom::PageDom;
use crate::fill::orchestrator::{fill_frames, FillPlan};
use crate::fill::{FillField, FillValues};
use crate::host::HostClient;
use crate::login::{LoginId, LoginRecord};
use crate::settings::{Settings, SettingsStore, StoreConfig};

/// The browser tab the UI is acting on.
#[async_trait]
pub trait ActiveTab: Send + Sync {
    fn id(&self) -> String;
    async fn url(&self) -> Result<Option<String>>;
    async fn navigate(&self, url: &str) -> Result<()>;
    /// Frames of the tab; the first is the current frame.
    async fn frames(&self) -> Result<Vec<Arc<dyn PageDom>>>;
}

/// Settings fields the UI may change.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(default)]
    pub auto_submit: Option<bool>,
    #[serde(default)]
    pub gpg_path: Option<String>,
    #[serde(default)]
    pub stores: Option<BTreeMap<String, StoreConfig>>,
}

impl SettingsUpdate {
    fn validate(&self) -> Result<()> {
        for (key, store) in self.stores.iter().flatten() {
            if store.id != *key {
                return Err(Error::Validation(format!(
                    "store key {key} does not match its id {}",
                    store.id
                )));
            }
            if store.id.trim().is_empty() || store.name.trim().is_empty() {
                return Err(Error::Validation("stores need an id and a name".to_string()));
            }
            if store.path.trim().is_empty() {
                return Err(Error::Validation(format!("store {key} has no path")));
            }
        }
        Ok(())
    }

    fn apply(&self, settings: &mut Settings) {
        if let Some(auto_submit) = self.auto_submit {
            settings.auto_submit = auto_submit;
        }
        if let Some(gpg_path) = &self.gpg_path {
            let trimmed = gpg_path.trim();
            settings.gpg_path = (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
        if let Some(stores) = &self.stores {
            settings.stores = stores.clone();
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum UiRequest {
    GetSettings,
    SaveSettings {
        settings: SettingsUpdate,
    },
    ListFiles {
        #[serde(default)]
        host: Option<String>,
    },
    CopyPassword {
        login: LoginId,
    },
    CopyUsername {
        login: LoginId,
    },
    Launch {
        login: LoginId,
    },
    Fill {
        login: LoginId,
        #[serde(default)]
        fields: Vec<FillField>,
    },
    TakeSubmittedCredentials,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyField {
    Password,
    Username,
}

/// `(host, origin)` of a page URL; the host includes a non-default port.
pub fn host_and_origin(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    let hostname = parsed.host_str()?;
    let host = match parsed.port() {
        Some(port) => format!("{hostname}:{port}"),
        None => hostname.to_string(),
    };
    Some((host, parsed.origin().ascii_serialization()))
}

/// Launch target for a login: its `url` field, else its domain.
pub fn launch_url(record: &LoginRecord, current_host: &str) -> Option<String> {
    let target = match &record.fields().url {
        Some(url) => url.clone(),
        None => match_domain(&record.identity().path, current_host)?.host(),
    };
    if target.contains("://") {
        Some(target)
    } else {
        Some(format!("http://{target}"))
    }
}

pub struct Background {
    settings: Arc<dyn SettingsStore>,
    host: HostClient,
    clipboard: Option<Arc<dyn Clipboard>>,
    tab: Option<Arc<dyn ActiveTab>>,
    auth: Arc<AuthResponderRegistry>,
    submissions: Arc<SubmissionLog>,
    clear_after: Duration,
}

impl Background {
    pub fn new(settings: Arc<dyn SettingsStore>, host: HostClient) -> Self {
        Self {
            settings,
            host,
            clipboard: None,
            tab: None,
            auth: Arc::new(AuthResponderRegistry::default()),
            submissions: Arc::new(SubmissionLog::default()),
            clear_after: CLEAR_AFTER,
        }
    }

    pub fn with_clipboard(mut self, clipboard: Arc<dyn Clipboard>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    pub fn with_tab(mut self, tab: Arc<dyn ActiveTab>) -> Self {
        self.tab = Some(tab);
        self
    }

    pub fn with_auth_registry(mut self, auth: Arc<AuthResponderRegistry>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_submissions(mut self, submissions: Arc<SubmissionLog>) -> Self {
        self.submissions = submissions;
        self
    }

    pub fn with_clear_after(mut self, clear_after: Duration) -> Self {
        self.clear_after = clear_after;
        self
    }

    fn tab(&self) -> Result<&Arc<dyn ActiveTab>> {
        self.tab
            .as_ref()
            .ok_or_else(|| Error::Browser("no active browser tab".to_string()))
    }

    async fn current_url(&self) -> Result<Option<String>> {
        match &self.tab {
            Some(tab) => tab.url().await,
            None => Ok(None),
        }
    }

    async fn current_host(&self) -> Result<String> {
        Ok(self
            .current_url()
            .await?
            .as_deref()
            .and_then(host_and_origin)
            .map(|(host, _)| host)
            .unwrap_or_default())
    }

    /// Persisted settings layered over the host's store configuration.
    pub async fn effective_settings(&self) -> Result<Settings> {
        let persisted = self.settings.load()?;
        let configuration = self.host.configure(&persisted).await?;
        Ok(persisted.with_host_configuration(&configuration))
    }

    pub async fn save_settings(&self, update: &SettingsUpdate) -> Result<Settings> {
        update.validate()?;
        self.settings.update(&mut |settings| update.apply(settings))
    }

    /// Ranked candidates for `host`, or for the active tab's host.
    pub async fn list_files(&self, host: Option<String>) -> Result<CredentialDirectory> {
        let host = match host {
            Some(host) => host,
            None => self.current_host().await?,
        };
        let settings = self.effective_settings().await?;
        let files = self.host.list(&settings).await?;
        Ok(CredentialDirectory::build(&files, &host, &settings))
    }

    /// Fetch and parse one login.
    pub async fn fetch_record(&self, id: &LoginId) -> Result<LoginRecord> {
        let settings = self.effective_settings().await?;
        self.fetch_with(&settings, id).await
    }

    async fn fetch_with(&self, settings: &Settings, id: &LoginId) -> Result<LoginRecord> {
        let raw = self.host.fetch(settings, id).await?;
        let host = self.current_host().await?;
        let record = LoginRecord::from_raw(id.clone(), raw)?;
        Ok(record.with_recency(settings.recency(&host, id)))
    }

    fn touch_recency(&self, host: &str, id: &LoginId) -> Result<()> {
        if host.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();
        self.settings.update(&mut |settings| {
            settings.touch_recency(host, id, now);
        })?;
        Ok(())
    }

    /// Copy a field; the returned task clears the clipboard later.
    pub async fn copy(
        &self,
        id: &LoginId,
        field: CopyField,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let clipboard = self
            .clipboard
            .clone()
            .ok_or_else(|| Error::Validation("no clipboard available".to_string()))?;
        let record = self.fetch_record(id).await?;
        let text = match field {
            CopyField::Password => record.fields().secret.clone(),
            CopyField::Username => record.fields().login.clone(),
        };
        let clear = copy_with_clear(clipboard, text, self.clear_after).await?;
        log::info!("copied {field:?} of {id} to the clipboard");
        self.touch_recency(&self.current_host().await?, id)?;
        Ok(clear)
    }

    /// Open the login's site in the tab, ready to answer HTTP auth.
    pub async fn launch(&self, id: &LoginId) -> Result<String> {
        let tab = self.tab()?.clone();
        let record = self.fetch_record(id).await?;
        let url = launch_url(&record, &self.current_host().await?)
            .ok_or_else(|| Error::Validation(format!("{id} has no url and no domain")))?;
        let (host, _) = host_and_origin(&url)
            .ok_or_else(|| Error::Validation(format!("invalid launch url {url}")))?;

        self.auth.arm(
            &tab.id(),
            AuthResponder::new(
                &url,
                record.fields().login.clone(),
                record.fields().secret.clone(),
            ),
        );
        if let Err(err) = tab.navigate(&url).await {
            self.auth.disarm(&tab.id());
            return Err(err);
        }
        log::info!("launched {id} at {host}");
        self.touch_recency(&host, id)?;
        Ok(url)
    }

    /// Fill the login into the active tab.
    pub async fn fill(&self, id: &LoginId, fields: &[FillField]) -> Result<Vec<FillField>> {
        let tab = self.tab()?.clone();
        let url = tab
            .url()
            .await?
            .ok_or_else(|| Error::Browser("the tab has no page loaded".to_string()))?;
        let (host, origin) = host_and_origin(&url)
            .ok_or_else(|| Error::Validation(format!("cannot fill into {url}")))?;

        let settings = self.effective_settings().await?;
        let record = self.fetch_with(&settings, id).await?;
        let fields = if fields.is_empty() {
            vec![FillField::Login, FillField::Secret]
        } else {
            fields.to_vec()
        };
        let plan = FillPlan {
            host: host.clone(),
            origin,
            fields,
            values: FillValues {
                login: record.fields().login.clone(),
                secret: record.fields().secret.clone(),
                openid: record.fields().openid.clone(),
            },
            auto_submit: settings.auto_submit_for(&record),
        };

        let frames = tab.frames().await?;
        let frame_refs: Vec<&dyn PageDom> = frames.iter().map(|frame| frame.as_ref()).collect();
        let filled = fill_frames(self.settings.as_ref(), &plan, &frame_refs).await?;
        self.touch_recency(&host, id)?;
        Ok(filled)
    }

    pub fn take_submitted(&self) -> Result<Vec<ExtractedCredentials>> {
        let tab = self.tab()?;
        Ok(self.submissions.take(&tab.id()))
    }

    /// Answer one UI request.
    pub async fn handle(&self, request: UiRequest) -> Value {
        match self.dispatch(request).await {
            Ok(payload) => ok_response(payload),
            Err(err) => {
                log::warn!("request failed: {err}");
                json!({ "status": "error", "message": err.to_string() })
            }
        }
    }

    async fn dispatch(&self, request: UiRequest) -> Result<Value> {
        match request {
            UiRequest::GetSettings => {
                let settings = self.effective_settings().await?;
                Ok(json!({ "settings": settings, "version": crate::version::APP_VERSION }))
            }
            UiRequest::SaveSettings { settings } => {
                let saved = self.save_settings(&settings).await?;
                Ok(json!({ "settings": saved }))
            }
            UiRequest::ListFiles { host } => {
                let directory = self.list_files(host).await?;
                Ok(json!({ "files": directory.candidates() }))
            }
            UiRequest::CopyPassword { login } => {
                self.copy(&login, CopyField::Password).await?;
                Ok(json!({}))
            }
            UiRequest::CopyUsername { login } => {
                self.copy(&login, CopyField::Username).await?;
                Ok(json!({}))
            }
            UiRequest::Launch { login } => {
                let url = self.launch(&login).await?;
                Ok(json!({ "url": url }))
            }
            UiRequest::Fill { login, fields } => {
                let filled = self.fill(&login, &fields).await?;
                Ok(json!({ "filledFields": filled }))
            }
            UiRequest::TakeSubmittedCredentials => {
                Ok(json!({ "credentials": self.take_submitted()? }))
            }
            UiRequest::Stop => Ok(json!({})),
        }
    }
}

fn ok_response(payload: Value) -> Value {
    let mut response = json!({ "status": "ok" });
    if let (Some(response), Value::Object(payload)) = (response.as_object_mut(), payload) {
        response.extend(payload);
    }
    response
}
