use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Index of an element in the most recent [`DomSnapshot`].
pub type ElementRef = usize;
/// Index of a form in the most recent [`DomSnapshot`].
pub type FormRef = usize;

/// Events fired after a value is set so page-side validation notices it.
pub const FILL_EVENTS: &[&str] = &["keypress", "keydown", "keyup", "input", "blur", "change"];
/// Events fired before a value is set.
pub const FOCUS_EVENTS: &[&str] = &["click", "focus"];

const MIN_WIDTH: f64 = 30.0;
const MIN_HEIGHT: f64 = 10.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn intersects(&self, viewport: &Viewport) -> bool {
        self.x + self.width >= 0.0
            && self.y + self.height >= 0.0
            && self.x <= viewport.width
            && self.y <= viewport.height
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormInfo {
    pub index: FormRef,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub class: String,
}

/// An `input` or `button` element as seen in the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub index: ElementRef,
    pub tag: String,
    /// Lower-cased `type` property.
    #[serde(rename = "type", default)]
    pub input_type: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub form: Option<FormRef>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub rect: Rect,
    #[serde(default)]
    pub visibility: String,
}

impl ElementInfo {
    /// Whether a user could actually see and use this element.
    pub fn is_visible(&self, viewport: &Viewport) -> bool {
        !self.disabled
            && self.rect.width >= MIN_WIDTH
            && self.rect.height >= MIN_HEIGHT
            && !self.visibility.eq_ignore_ascii_case("hidden")
            && self.rect.intersects(viewport)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomSnapshot {
    pub forms: Vec<FormInfo>,
    pub elements: Vec<ElementInfo>,
    pub viewport: Viewport,
}

impl DomSnapshot {
    pub fn form(&self, index: FormRef) -> Option<&FormInfo> {
        self.forms.iter().find(|form| form.index == index)
    }

    pub fn visible_elements(&self) -> impl Iterator<Item = &ElementInfo> {
        self.elements
            .iter()
            .filter(move |element| element.is_visible(&self.viewport))
    }
}

/// DOM primitives for a single frame.
///
/// Element and form references are only meaningful against the snapshot
/// most recently returned by [`PageDom::snapshot`].
#[async_trait]
pub trait PageDom: Send + Sync {
    /// The frame's serialized origin, e.g. `https://example.com`.
    async fn origin(&self) -> Result<String>;
    async fn snapshot(&self) -> Result<DomSnapshot>;
    async fn dispatch(&self, element: ElementRef, events: &[&str]) -> Result<()>;
    /// Set both the `value` attribute and property.
    async fn set_value(&self, element: ElementRef, value: &str) -> Result<()>;
    async fn click(&self, element: ElementRef) -> Result<()>;
    async fn focus(&self, element: ElementRef) -> Result<()>;
    async fn select(&self, element: ElementRef) -> Result<()>;
    async fn submit_form(&self, form: FormRef) -> Result<()>;
    /// Ask the user a yes/no question in the page; blocks until answered.
    async fn confirm(&self, message: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(rect: Rect) -> ElementInfo {
        ElementInfo {
            tag: "input".to_string(),
            input_type: "text".to_string(),
            rect,
            visibility: "visible".to_string(),
            ..ElementInfo::default()
        }
    }

    const VIEWPORT: Viewport = Viewport {
        width: 800.0,
        height: 600.0,
    };

    #[test]
    fn normal_field_is_visible() {
        let el = element(Rect {
            x: 10.0,
            y: 10.0,
            width: 200.0,
            height: 24.0,
        });
        assert!(el.is_visible(&VIEWPORT));
    }

    #[test]
    fn honeypot_fields_are_filtered() {
        let tiny = element(Rect {
            x: 10.0,
            y: 10.0,
            width: 1.0,
            height: 1.0,
        });
        assert!(!tiny.is_visible(&VIEWPORT));

        let offscreen = element(Rect {
            x: -5000.0,
            y: 10.0,
            width: 200.0,
            height: 24.0,
        });
        assert!(!offscreen.is_visible(&VIEWPORT));

        let mut hidden = element(Rect {
            x: 10.0,
            y: 10.0,
            width: 200.0,
            height: 24.0,
        });
        hidden.visibility = "hidden".to_string();
        assert!(!hidden.is_visible(&VIEWPORT));

        let mut disabled = element(Rect {
            x: 10.0,
            y: 10.0,
            width: 200.0,
            height: 24.0,
        });
        disabled.disabled = true;
        assert!(!disabled.is_visible(&VIEWPORT));
    }

    #[test]
    fn snapshot_deserializes_from_page_json() {
        let json = serde_json::json!({
            "forms": [{"index": 0, "id": "login", "name": "", "class": ""}],
            "elements": [{
                "index": 0, "tag": "input", "type": "password", "id": "pw",
                "name": "password", "class": "", "form": 0, "disabled": false,
                "rect": {"x": 0, "y": 0, "width": 100, "height": 20},
                "visibility": "visible"
            }],
            "viewport": {"width": 1024, "height": 768}
        });
        let snapshot: DomSnapshot = serde_json::from_value(json).unwrap_or_default();
        assert_eq!(snapshot.elements.len(), 1);
        assert_eq!(snapshot.elements[0].input_type, "password");
        assert_eq!(snapshot.elements[0].form, Some(0));
        assert_eq!(snapshot.visible_elements().count(), 1);
    }
}
