use std::sync::Mutex;

use async_trait::async_trait;

use super::dom::{
    DomSnapshot, ElementInfo, ElementRef, FormInfo, FormRef, PageDom, Rect, Viewport,
};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub forms: Vec<FormInfo>,
    pub elements: Vec<ElementInfo>,
    pub values: Vec<String>,
    pub events: Vec<(ElementRef, String)>,
    pub clicked: Vec<ElementRef>,
    pub focused: Vec<ElementRef>,
    pub selected: Vec<ElementRef>,
    pub submitted: Vec<FormRef>,
    pub confirms: Vec<String>,
    /// Focusing the first element makes the second one visible.
    pub reveal_on_focus: Option<(ElementRef, ElementRef)>,
}

pub(crate) struct FakeDom {
    origin: String,
    confirm_answer: bool,
    pub(crate) state: Mutex<FakeState>,
}

impl FakeDom {
    pub(crate) fn new(origin: &str) -> Self {
        Self {
            origin: origin.to_string(),
            confirm_answer: true,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub(crate) fn answering(mut self, answer: bool) -> Self {
        self.confirm_answer = answer;
        self
    }

    pub(crate) fn form(&self, id: &str) -> FormRef {
        let mut state = self.lock();
        let index = state.forms.len();
        state.forms.push(FormInfo {
            index,
            id: id.to_string(),
            ..FormInfo::default()
        });
        index
    }

    pub(crate) fn input(&self, input_type: &str, name: &str, form: Option<FormRef>) -> ElementRef {
        self.element("input", input_type, name, form)
    }

    pub(crate) fn element(
        &self,
        tag: &str,
        input_type: &str,
        name: &str,
        form: Option<FormRef>,
    ) -> ElementRef {
        let mut state = self.lock();
        let index = state.elements.len();
        state.elements.push(ElementInfo {
            index,
            tag: tag.to_string(),
            input_type: input_type.to_string(),
            name: name.to_string(),
            form,
            rect: Rect {
                x: 10.0,
                y: 10.0 + index as f64 * 40.0,
                width: 200.0,
                height: 24.0,
            },
            visibility: "visible".to_string(),
            ..ElementInfo::default()
        });
        state.values.push(String::new());
        index
    }

    pub(crate) fn hide(&self, element: ElementRef) {
        let mut state = self.lock();
        if let Some(info) = state.elements.get_mut(element) {
            info.visibility = "hidden".to_string();
        }
    }

    pub(crate) fn value(&self, element: ElementRef) -> String {
        self.lock().values.get(element).cloned().unwrap_or_default()
    }

    pub(crate) fn confirm_count(&self) -> usize {
        self.lock().confirms.len()
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check(&self, element: ElementRef) -> Result<()> {
        if element < self.lock().elements.len() {
            Ok(())
        } else {
            Err(Error::Browser(format!("no element {element}")))
        }
    }
}

#[async_trait]
impl PageDom for FakeDom {
    async fn origin(&self) -> Result<String> {
        Ok(self.origin.clone())
    }

    async fn snapshot(&self) -> Result<DomSnapshot> {
        let state = self.lock();
        Ok(DomSnapshot {
            forms: state.forms.clone(),
            elements: state.elements.clone(),
            viewport: Viewport {
                width: 1280.0,
                height: 800.0,
            },
        })
    }

    async fn dispatch(&self, element: ElementRef, events: &[&str]) -> Result<()> {
        self.check(element)?;
        let mut state = self.lock();
        for event in events {
            state.events.push((element, event.to_string()));
            if *event == "focus" {
                if let Some((trigger, target)) = state.reveal_on_focus {
                    if trigger == element {
                        state.elements[trigger].visibility = "hidden".to_string();
                        state.elements[target].visibility = "visible".to_string();
                    }
                }
            }
        }
        Ok(())
    }

    async fn set_value(&self, element: ElementRef, value: &str) -> Result<()> {
        self.check(element)?;
        self.lock().values[element] = value.to_string();
        Ok(())
    }

    async fn click(&self, element: ElementRef) -> Result<()> {
        self.check(element)?;
        self.lock().clicked.push(element);
        Ok(())
    }

    async fn focus(&self, element: ElementRef) -> Result<()> {
        self.check(element)?;
        self.lock().focused.push(element);
        Ok(())
    }

    async fn select(&self, element: ElementRef) -> Result<()> {
        self.check(element)?;
        self.lock().selected.push(element);
        Ok(())
    }

    async fn submit_form(&self, form: FormRef) -> Result<()> {
        self.lock().submitted.push(form);
        Ok(())
    }

    async fn confirm(&self, message: &str) -> Result<bool> {
        self.lock().confirms.push(message.to_string());
        Ok(self.confirm_answer)
    }
}
