use super::dom::{DomSnapshot, FormRef, PageDom, FILL_EVENTS, FOCUS_EVENTS};
use super::selectors::{self, FieldKind};
use super::{FillField, FillRequest, FrameFillResult};
use crate::error::Result;

/// Fills a login form inside one frame.
pub struct FormFiller<'a> {
    dom: &'a dyn PageDom,
}

impl<'a> FormFiller<'a> {
    pub fn new(dom: &'a dyn PageDom) -> Self {
        Self { dom }
    }

    /// Locate the login form and fill the requested fields into it.
    ///
    /// Returns an empty result when the frame has no usable form or the
    /// frame's origin is not allowed.
    pub async fn fill(&self, request: &FillRequest) -> Result<FrameFillResult> {
        let mut result = FrameFillResult::default();
        let origin = self.dom.origin().await?;
        let snapshot = self.dom.snapshot().await?;

        let Some(form) = locate_form(&snapshot, &origin) else {
            return Ok(result);
        };
        if !request.allow_no_secret
            && selectors::find(&snapshot, FieldKind::Secret, Some(form)).is_none()
        {
            return Ok(result);
        }

        if origin != request.origin {
            if !request.allow_foreign {
                return Ok(result);
            }
            match request.foreign_fills.get(&origin) {
                Some(false) => return Ok(result),
                Some(true) => {}
                None => {
                    let allowed = self
                        .dom
                        .confirm(&foreign_fill_message(&request.origin, &origin))
                        .await?;
                    result.foreign_fill = Some(allowed);
                    result.foreign_origin = Some(origin.clone());
                    if !allowed {
                        return Ok(result);
                    }
                }
            }
        }

        for field in &request.fields {
            let Some(value) = request.values.value(*field) else {
                continue;
            };
            if self.fill_field(FieldKind::for_field(*field), value, form).await? {
                result.filled_fields.push(*field);
            }
        }

        self.finish(request, form).await?;
        Ok(result)
    }

    async fn fill_field(&self, kind: FieldKind, value: &str, form: FormRef) -> Result<bool> {
        let snapshot = self.dom.snapshot().await?;
        let Some(element) = selectors::find(&snapshot, kind, Some(form)) else {
            return Ok(false);
        };
        self.dom.dispatch(element.index, FOCUS_EVENTS).await?;

        // Focusing can swap a placeholder for the real input.
        let snapshot = self.dom.snapshot().await?;
        let Some(element) = selectors::find(&snapshot, kind, Some(form)) else {
            return Ok(false);
        };
        self.dom.set_value(element.index, value).await?;
        self.dom.dispatch(element.index, FILL_EVENTS).await?;
        Ok(!value.is_empty())
    }

    /// Submit, or leave the page ready for the user to submit.
    async fn finish(&self, request: &FillRequest, form: FormRef) -> Result<()> {
        let snapshot = self.dom.snapshot().await?;

        let secrets = selectors::find_all(&snapshot, FieldKind::Secret, Some(form));
        if secrets.len() > 1 {
            // Likely a one-time code next to the password; leave it to the user.
            self.dom.select(secrets[1].index).await?;
            return Ok(());
        }

        if let Some(submit) = selectors::find(&snapshot, FieldKind::Submit, Some(form)) {
            if request.auto_submit {
                self.dom.click(submit.index).await?;
            } else {
                self.dom.focus(submit.index).await?;
            }
            return Ok(());
        }

        if request.auto_submit {
            self.dom.submit_form(form).await?;
        } else if let Some(field) = selectors::find(&snapshot, FieldKind::Secret, Some(form))
            .or_else(|| selectors::find(&snapshot, FieldKind::Login, Some(form)))
        {
            self.dom.focus(field.index).await?;
        }
        Ok(())
    }
}

fn foreign_fill_message(target: &str, origin: &str) -> String {
    format!(
        "You are about to fill credentials for {target} into a form embedded from {origin}. \
         Do you trust {origin} with these credentials?"
    )
}

/// Find the login form among forms owning visible login or secret inputs.
pub fn locate_form(snapshot: &DomSnapshot, origin: &str) -> Option<FormRef> {
    let mut forms: Vec<FormRef> = Vec::new();
    let candidates = selectors::find_all(snapshot, FieldKind::Secret, None)
        .into_iter()
        .chain(selectors::find_all(snapshot, FieldKind::Login, None));
    for element in candidates {
        if let Some(form) = element.form {
            if !forms.contains(&form) {
                forms.push(form);
            }
        }
    }

    match forms.as_slice() {
        [] => None,
        [only] => Some(*only),
        [first, ..] => {
            let marked = forms
                .iter()
                .copied()
                .find(|index| snapshot.form(*index).is_some_and(selectors::is_login_form));
            if marked.is_none() {
                log::warn!(
                    "ambiguous login form on {origin}: {} candidate forms, using the first",
                    forms.len()
                );
            }
            Some(marked.unwrap_or(*first))
        }
    }
}

/// Comma-joined field names for log lines.
pub fn describe(fields: &[FillField]) -> String {
    fields
        .iter()
        .map(|field| field.as_str())
        .collect::<Vec<_>>()
        .join(",")
}
