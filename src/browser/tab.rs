use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams, EventAuthRequired, EventRequestPaused,
};
use chromiumoxide::cdp::browser_protocol::network::ResourceType;
use chromiumoxide::cdp::browser_protocol::page::EventFrameNavigated;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;

use super::frame::CdpFrame;
use crate::auth::{AuthChallenge, AuthDecision, AuthPrompt, AuthResponderRegistry};
use crate::background::ActiveTab;
use crate::credentials::{parse_form_body, SubmissionLog};
use crate::error::{Error, Result};
use crate::fill::dom::PageDom;

/// The tab passfill acts on.
///
/// Every paused request is continued unchanged. URL-encoded POST bodies are
/// fed to the [`SubmissionLog`] on the way, and HTTP auth challenges go to
/// the tab's armed responder.
pub struct BrowserTab {
    page: Page,
    id: String,
    interceptor: tokio::task::JoinHandle<()>,
}

impl BrowserTab {
    /// Wrap `page` and start intercepting its requests.
    pub async fn attach(
        page: Page,
        auth: Arc<AuthResponderRegistry>,
        submissions: Arc<SubmissionLog>,
    ) -> Result<Self> {
        let id = page.target_id().as_ref().to_string();
        page.execute(EnableParams {
            patterns: None,
            handle_auth_requests: Some(true),
        })
        .await
        .map_err(|e| Error::Browser(format!("failed to enable request interception: {e}")))?;

        let paused = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| Error::Browser(format!("failed to attach request listener: {e}")))?;
        let challenges = page
            .event_listener::<EventAuthRequired>()
            .await
            .map_err(|e| Error::Browser(format!("failed to attach auth listener: {e}")))?;
        let navigations = page
            .event_listener::<EventFrameNavigated>()
            .await
            .map_err(|e| Error::Browser(format!("failed to attach navigation listener: {e}")))?;

        let interceptor = tokio::spawn(intercept(
            page.clone(),
            id.clone(),
            auth,
            submissions,
            paused,
            challenges,
            navigations,
        ));
        log::debug!("attached to tab {id}");
        Ok(Self {
            page,
            id,
            interceptor,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }
}

impl Drop for BrowserTab {
    fn drop(&mut self) {
        self.interceptor.abort();
    }
}

#[async_trait]
impl ActiveTab for BrowserTab {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn url(&self) -> Result<Option<String>> {
        self.page
            .url()
            .await
            .map_err(|e| Error::Browser(format!("failed to read tab url: {e}")))
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| Error::Browser(format!("failed to open {url}: {e}")))?;
        Ok(())
    }

    async fn frames(&self) -> Result<Vec<Arc<dyn PageDom>>> {
        let main = self
            .page
            .mainframe()
            .await
            .map_err(|e| Error::Browser(format!("failed to resolve main frame: {e}")))?;
        let mut frame_ids = self
            .page
            .frames()
            .await
            .map_err(|e| Error::Browser(format!("failed to list frames: {e}")))?;
        if let Some(main) = main {
            frame_ids.retain(|frame_id| *frame_id != main);
            frame_ids.insert(0, main);
        }
        Ok(frame_ids
            .into_iter()
            .map(|frame_id| Arc::new(CdpFrame::new(self.page.clone(), frame_id)) as Arc<dyn PageDom>)
            .collect())
    }
}

/// Confirmation dialog raised from the isolated world of the tab's main frame.
struct PagePrompt {
    frame: Option<CdpFrame>,
}

#[async_trait]
impl AuthPrompt for PagePrompt {
    async fn confirm(&self, message: &str) -> bool {
        let Some(frame) = &self.frame else {
            log::warn!("no main frame to confirm in");
            return false;
        };
        match frame.confirm(message).await {
            Ok(allowed) => allowed,
            Err(err) => {
                log::warn!("confirmation dialog failed: {err}");
                false
            }
        }
    }
}

fn header<'a>(headers: &'a Value, name: &str) -> Option<&'a str> {
    headers
        .as_object()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, value)| value.as_str())
}

/// Body of a form-encoded POST, if this request is one.
fn form_post_body<'a>(method: &str, headers: &'a Value, body: Option<&'a str>) -> Option<&'a str> {
    if !method.eq_ignore_ascii_case("POST") {
        return None;
    }
    let content_type = header(headers, "content-type")?;
    if !content_type
        .to_ascii_lowercase()
        .starts_with("application/x-www-form-urlencoded")
    {
        return None;
    }
    body
}

#[allow(clippy::too_many_arguments)]
async fn intercept(
    page: Page,
    tab_id: String,
    auth: Arc<AuthResponderRegistry>,
    submissions: Arc<SubmissionLog>,
    mut paused: chromiumoxide::listeners::EventStream<EventRequestPaused>,
    mut challenges: chromiumoxide::listeners::EventStream<EventAuthRequired>,
    mut navigations: chromiumoxide::listeners::EventStream<EventFrameNavigated>,
) {
    loop {
        tokio::select! {
            Some(event) = paused.next() => {
                let request = &event.request;
                if let Some(body) = form_post_body(
                    &request.method,
                    request.headers.inner(),
                    request.post_data.as_deref(),
                ) {
                    submissions.record(&tab_id, &parse_form_body(body));
                }
                if let Err(err) = page
                    .execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                {
                    log::debug!("failed to continue request {}: {err}", request.url);
                }
            }
            Some(event) = challenges.next() => {
                // The prompt may block on a dialog; keep servicing requests meanwhile.
                tokio::spawn(answer_challenge(page.clone(), tab_id.clone(), auth.clone(), event));
            }
            Some(event) = navigations.next() => {
                if event.frame.parent_id.is_none() && auth.disarm(&tab_id) {
                    log::debug!("tab {tab_id} navigated; auth responder disarmed");
                }
            }
            else => break,
        }
    }
    log::debug!("request interception for tab {tab_id} ended");
}

async fn answer_challenge(
    page: Page,
    tab_id: String,
    auth: Arc<AuthResponderRegistry>,
    event: Arc<EventAuthRequired>,
) {
    let main_frame = page.mainframe().await.ok().flatten();
    let challenge = AuthChallenge {
        url: event.request.url.clone(),
        main_frame_document: event.resource_type == ResourceType::Document
            && main_frame.as_ref() == Some(&event.frame_id),
    };

    let decision = match auth.responder(&tab_id) {
        Some(responder) => {
            let prompt = PagePrompt {
                frame: main_frame.map(|frame_id| CdpFrame::new(page.clone(), frame_id)),
            };
            responder.respond(&challenge, &prompt).await
        }
        None => AuthDecision::Default,
    };

    let response = match decision {
        AuthDecision::Default => AuthChallengeResponse {
            response: AuthChallengeResponseResponse::Default,
            username: None,
            password: None,
        },
        AuthDecision::Provide { username, password } => AuthChallengeResponse {
            response: AuthChallengeResponseResponse::ProvideCredentials,
            username: Some(username),
            password: Some(password),
        },
    };
    if let Err(err) = page
        .execute(ContinueWithAuthParams::new(event.request_id.clone(), response))
        .await
    {
        log::warn!("failed to answer auth challenge for {}: {err}", challenge.url);
    }
}
