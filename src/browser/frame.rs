use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::{CreateIsolatedWorldParams, FrameId};
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, ExecutionContextId};
use chromiumoxide::Page;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::fill::dom::{DomSnapshot, ElementRef, FormRef, PageDom};

/// World the fill scripts run in. Page script cannot reach its globals, so
/// it cannot stub `confirm`, fake layout, or swap the stashed references.
pub(crate) const ISOLATED_WORLD: &str = "passfill";

const CONTEXT_TIMEOUT_MS: u64 = 10_000;
const POLL_INTERVAL_MS: u64 = 100;

const SNAPSHOT_JS: &str = r#"(() => {
    const forms = Array.from(document.forms);
    const elements = Array.from(document.querySelectorAll('input, button'));
    window.__passfill = { forms, elements };
    const attr = (el, name) => (el.getAttribute(name) || '');
    return {
        forms: forms.map((form, index) => ({
            index,
            id: attr(form, 'id'),
            name: attr(form, 'name'),
            class: attr(form, 'class'),
        })),
        elements: elements.map((el, index) => {
            const rect = el.getBoundingClientRect();
            const form = el.form ? forms.indexOf(el.form) : -1;
            return {
                index,
                tag: el.tagName.toLowerCase(),
                type: (el.type || '').toLowerCase(),
                id: attr(el, 'id'),
                name: attr(el, 'name'),
                class: attr(el, 'class'),
                form: form >= 0 ? form : null,
                disabled: !!el.disabled,
                rect: { x: rect.x, y: rect.y, width: rect.width, height: rect.height },
                visibility: window.getComputedStyle(el).visibility,
            };
        }),
        viewport: { width: window.innerWidth, height: window.innerHeight },
    };
})()"#;

/// Poll until the frame has a JavaScript execution context.
pub(crate) async fn wait_for_frame_execution_context(
    page: &Page,
    frame_id: FrameId,
) -> Result<ExecutionContextId> {
    let deadline =
        tokio::time::Instant::now() + std::time::Duration::from_millis(CONTEXT_TIMEOUT_MS);

    loop {
        let context = page
            .frame_execution_context(frame_id.clone())
            .await
            .map_err(|e| Error::Browser(format!("failed to query frame execution context: {e}")))?;
        if let Some(context_id) = context {
            return Ok(context_id);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Browser(format!(
                "timeout waiting for frame execution context (frame id {})",
                frame_id.as_ref()
            )));
        }
        tokio::time::sleep(std::time::Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
}

fn isolated_world_params(frame_id: FrameId) -> Result<CreateIsolatedWorldParams> {
    CreateIsolatedWorldParams::builder()
        .frame_id(frame_id)
        .world_name(ISOLATED_WORLD)
        .grant_univeral_access(false)
        .build()
        .map_err(|e| Error::Browser(format!("invalid isolated world params: {e}")))
}

/// One frame of a tab. Scripts run in the frame's [`ISOLATED_WORLD`];
/// `snapshot` stashes the live forms and elements on `window.__passfill`
/// there so later calls can address them by index.
pub struct CdpFrame {
    page: Page,
    frame_id: FrameId,
}

impl CdpFrame {
    pub fn new(page: Page, frame_id: FrameId) -> Self {
        Self { page, frame_id }
    }

    pub fn frame_id(&self) -> &FrameId {
        &self.frame_id
    }

    /// Context id of the frame's isolated world for its current document.
    ///
    /// Chrome keeps one world per frame and name, so repeated calls land in
    /// the same global scope until the frame navigates.
    async fn isolated_context(&self) -> Result<ExecutionContextId> {
        wait_for_frame_execution_context(&self.page, self.frame_id.clone()).await?;
        let created = self
            .page
            .execute(isolated_world_params(self.frame_id.clone())?)
            .await
            .map_err(|e| {
                Error::Browser(format!(
                    "failed to create isolated world in frame {}: {e}",
                    self.frame_id.as_ref()
                ))
            })?;
        Ok(created.result.execution_context_id)
    }

    async fn evaluate(&self, js: String) -> Result<Value> {
        let context_id = self.isolated_context().await?;
        let eval = EvaluateParams::builder()
            .expression(js)
            .context_id(context_id)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| Error::Browser(format!("invalid evaluate params: {e}")))?;
        let result = self
            .page
            .evaluate_expression(eval)
            .await
            .map_err(|e| Error::Browser(format!("script failed in frame {}: {e}", self.frame_id.as_ref())))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    /// Run `body` with `target` bound to the snapshotted element or form.
    async fn with_target(&self, collection: &str, index: usize, body: &str) -> Result<Value> {
        self.evaluate(target_script(collection, index, body)).await
    }
}

fn target_script(collection: &str, index: usize, body: &str) -> String {
    format!(
        r#"(() => {{
    const target = window.__passfill && window.__passfill.{collection}[{index}];
    if (!target || !target.isConnected) throw new Error('stale {collection} reference {index}');
    {body}
}})()"#
    )
}

fn js_string(text: &str) -> Result<String> {
    Ok(serde_json::to_string(text)?)
}

#[async_trait]
impl PageDom for CdpFrame {
    async fn origin(&self) -> Result<String> {
        let value = self.evaluate("location.origin".to_string()).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Browser("frame has no origin".to_string()))
    }

    async fn snapshot(&self) -> Result<DomSnapshot> {
        let value = self.evaluate(SNAPSHOT_JS.to_string()).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn dispatch(&self, element: ElementRef, events: &[&str]) -> Result<()> {
        let names = serde_json::to_string(events)?;
        let body = format!(
            "for (const name of {names}) {{ target.dispatchEvent(new Event(name, {{ bubbles: true }})); }}"
        );
        self.with_target("elements", element, &body).await?;
        Ok(())
    }

    async fn set_value(&self, element: ElementRef, value: &str) -> Result<()> {
        let value = js_string(value)?;
        let body = format!("target.setAttribute('value', {value}); target.value = {value};");
        self.with_target("elements", element, &body).await?;
        Ok(())
    }

    async fn click(&self, element: ElementRef) -> Result<()> {
        self.with_target("elements", element, "target.click();").await?;
        Ok(())
    }

    async fn focus(&self, element: ElementRef) -> Result<()> {
        self.with_target("elements", element, "target.focus();").await?;
        Ok(())
    }

    async fn select(&self, element: ElementRef) -> Result<()> {
        self.with_target("elements", element, "target.focus(); target.select();")
            .await?;
        Ok(())
    }

    async fn submit_form(&self, form: FormRef) -> Result<()> {
        self.with_target("forms", form, "target.submit();").await?;
        Ok(())
    }

    async fn confirm(&self, message: &str) -> Result<bool> {
        let message = js_string(message)?;
        let value = self.evaluate(format!("window.confirm({message})")).await?;
        Ok(value.as_bool().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_target_a_private_world() {
        let params = isolated_world_params(FrameId::new("frame-1")).unwrap_or_else(|err| {
            panic!("params should build: {err}");
        });
        assert_eq!(params.frame_id.as_ref(), "frame-1");
        assert_eq!(params.world_name.as_deref(), Some(ISOLATED_WORLD));
        assert_eq!(params.grant_univeral_access, Some(false));
    }

    #[test]
    fn target_script_guards_stale_references() {
        let script = target_script("elements", 3, "target.click();");
        assert!(script.contains("window.__passfill.elements[3]"));
        assert!(script.contains("stale elements reference 3"));
        assert!(script.trim_end().ends_with("})()"));
    }

    #[test]
    fn values_are_quoted_as_js_strings() {
        assert_eq!(js_string("a'b\"c").ok().as_deref(), Some(r#""a'b\"c""#));
    }

    #[test]
    fn snapshot_shape_deserializes() {
        let value = serde_json::json!({
            "forms": [{"index": 0, "id": "login", "name": "", "class": ""}],
            "elements": [{
                "index": 0, "tag": "input", "type": "password", "id": "", "name": "pw",
                "class": "", "form": 0, "disabled": false,
                "rect": {"x": 1.0, "y": 2.0, "width": 100.0, "height": 20.0},
                "visibility": "visible"
            }],
            "viewport": {"width": 800.0, "height": 600.0}
        });
        let snapshot: DomSnapshot = serde_json::from_value(value).unwrap_or_default();
        assert_eq!(snapshot.elements.len(), 1);
        assert_eq!(snapshot.elements[0].form, Some(0));
        assert_eq!(snapshot.visible_elements().count(), 1);
    }
}
