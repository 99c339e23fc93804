use futures::future::join_all;

use super::dom::PageDom;
use super::form::{describe, FormFiller};
use super::{FillField, FillRequest, FillValues};
use crate::error::{Error, Result};
use crate::settings::SettingsStore;

/// Everything needed to fill one login into one tab.
#[derive(Debug, Clone)]
pub struct FillPlan {
    /// Host of the top-level page; foreign-origin decisions are keyed by it.
    pub host: String,
    /// Origin of the top-level page.
    pub origin: String,
    pub fields: Vec<FillField>,
    pub values: FillValues,
    pub auto_submit: bool,
}

#[derive(Debug, Clone, Copy)]
struct Step {
    all_frames: bool,
    allow_foreign: bool,
    allow_no_secret: bool,
}

const STEPS: [Step; 5] = [
    Step {
        all_frames: false,
        allow_foreign: false,
        allow_no_secret: false,
    },
    Step {
        all_frames: true,
        allow_foreign: false,
        allow_no_secret: false,
    },
    Step {
        all_frames: true,
        allow_foreign: true,
        allow_no_secret: false,
    },
    Step {
        all_frames: true,
        allow_foreign: false,
        allow_no_secret: true,
    },
    Step {
        all_frames: true,
        allow_foreign: true,
        allow_no_secret: true,
    },
];

fn union(filled: &mut Vec<FillField>, more: &[FillField]) {
    for field in more {
        if !filled.contains(field) {
            filled.push(*field);
        }
    }
}

/// Whether escalation can stop before `step`.
fn satisfied(step: &Step, plan: &FillPlan, filled: &[FillField]) -> bool {
    if step.allow_no_secret || !plan.fields.contains(&FillField::Secret) {
        !filled.is_empty()
    } else {
        filled.contains(&FillField::Secret)
    }
}

/// Fill `plan` into the tab's frames. `frames[0]` is the current frame.
///
/// Returns the union of filled fields. Foreign-origin decisions the user
/// makes along the way are persisted after the step that produced them.
pub async fn fill_frames(
    settings: &dyn SettingsStore,
    plan: &FillPlan,
    frames: &[&dyn PageDom],
) -> Result<Vec<FillField>> {
    if plan.fields.is_empty() {
        return Err(Error::Validation("no fields requested".to_string()));
    }
    for field in &plan.fields {
        if plan.values.value(*field).is_none() {
            return Err(Error::RequiredFieldMissing { field: *field });
        }
    }

    let mut filled: Vec<FillField> = Vec::new();
    for (number, step) in STEPS.iter().enumerate() {
        if frames.is_empty() || satisfied(step, plan, &filled) {
            break;
        }
        let current = settings.load()?;
        if step.allow_foreign && current.foreign_fill_blocked(&plan.host) {
            log::debug!("step {}: foreign fills blocked for {}", number + 1, plan.host);
            continue;
        }

        let request = FillRequest {
            origin: plan.origin.clone(),
            fields: plan.fields.clone(),
            values: plan.values.clone(),
            allow_foreign: step.allow_foreign,
            allow_no_secret: step.allow_no_secret,
            auto_submit: plan.auto_submit,
            foreign_fills: current.foreign_decisions(&plan.host),
        };
        let targets = if step.all_frames { frames } else { &frames[..1] };
        let results = join_all(targets.iter().map(|dom| {
            let request = &request;
            async move { FormFiller::new(*dom).fill(request).await }
        }))
        .await;

        let mut decisions = Vec::new();
        for result in results {
            match result {
                Ok(frame) => {
                    union(&mut filled, &frame.filled_fields);
                    if let (Some(allowed), Some(origin)) = (frame.foreign_fill, frame.foreign_origin)
                    {
                        decisions.push((origin, allowed));
                    }
                }
                Err(err) => log::warn!("step {}: frame fill failed: {err}", number + 1),
            }
        }
        if !decisions.is_empty() {
            settings.update(&mut |s| {
                for (origin, allowed) in &decisions {
                    s.record_foreign_decision(&plan.host, origin, *allowed);
                }
            })?;
        }
        log::debug!(
            "step {} on {}: filled [{}]",
            number + 1,
            plan.host,
            describe(&filled)
        );
    }

    if filled.is_empty() {
        return Err(Error::FillExhausted {
            fields: plan.fields.clone(),
        });
    }
    log::info!("filled [{}] on {}", describe(&filled), plan.host);
    Ok(filled)
}
