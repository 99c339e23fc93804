//! Ordered element predicates for each kind of field.
//!
//! Each list mirrors a CSS selector list such as
//! `input[name*=user i], input[type=email i]`; earlier entries win.

use super::dom::{DomSnapshot, ElementInfo, FormInfo, FormRef};
use super::FillField;

/// Markers identifying login forms and their submit controls.
pub const LOGIN_MARKERS: &[&str] = &["login", "log-in", "log_in", "signin", "sign-in", "sign_in"];

const LOGIN_HINTS: &[&str] = &["user", "login", "email"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attr {
    Name,
    Id,
    Class,
}

impl Attr {
    const ALL: [Attr; 3] = [Attr::Name, Attr::Id, Attr::Class];

    fn of(self, element: &ElementInfo) -> &str {
        match self {
            Attr::Name => &element.name,
            Attr::Id => &element.id,
            Attr::Class => &element.class,
        }
    }
}

/// One simple selector: optional tag, optional exact type, optional
/// case-insensitive attribute substring.
#[derive(Debug, Clone, Copy)]
struct Selector {
    tag: Option<&'static str>,
    input_type: Option<&'static str>,
    contains: Option<(Attr, &'static str)>,
}

impl Selector {
    fn matches(&self, element: &ElementInfo) -> bool {
        if let Some(tag) = self.tag {
            if !element.tag.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(input_type) = self.input_type {
            if !element.input_type.eq_ignore_ascii_case(input_type) {
                return false;
            }
        }
        if let Some((attr, needle)) = self.contains {
            if !attr.of(element).to_lowercase().contains(needle) {
                return false;
            }
        }
        true
    }
}

/// The kinds of element the filler looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Secret,
    Login,
    OpenId,
    Submit,
}

impl FieldKind {
    pub fn for_field(field: FillField) -> Self {
        match field {
            FillField::Login => FieldKind::Login,
            FillField::Secret => FieldKind::Secret,
            FillField::OpenId => FieldKind::OpenId,
        }
    }

    /// Element types a match is restricted to.
    fn types(self) -> &'static [&'static str] {
        match self {
            FieldKind::Secret => &["password"],
            FieldKind::Login => &["email", "text", "tel"],
            FieldKind::OpenId => &["text"],
            FieldKind::Submit => &["submit", "button"],
        }
    }

    fn selectors(self) -> Vec<Selector> {
        let input = |input_type, contains| Selector {
            tag: Some("input"),
            input_type,
            contains,
        };
        match self {
            FieldKind::Secret => vec![input(Some("password"), None)],
            FieldKind::Login => {
                let mut list = Vec::new();
                for attr in Attr::ALL {
                    for hint in LOGIN_HINTS {
                        list.push(input(None, Some((attr, *hint))));
                    }
                }
                for input_type in ["email", "text", "tel"] {
                    list.push(input(Some(input_type), None));
                }
                list
            }
            FieldKind::OpenId => Attr::ALL
                .iter()
                .map(|attr| input(None, Some((*attr, "openid"))))
                .collect(),
            FieldKind::Submit => {
                let mut list = vec![Selector {
                    tag: None,
                    input_type: Some("submit"),
                    contains: None,
                }];
                for attr in Attr::ALL {
                    for marker in LOGIN_MARKERS {
                        list.push(Selector {
                            tag: Some("button"),
                            input_type: None,
                            contains: Some((attr, *marker)),
                        });
                    }
                }
                for attr in Attr::ALL {
                    for marker in LOGIN_MARKERS {
                        list.push(input(Some("button"), Some((attr, *marker))));
                    }
                }
                list
            }
        }
    }

    fn allows_type(self, element: &ElementInfo) -> bool {
        self.types()
            .iter()
            .any(|t| element.input_type.eq_ignore_ascii_case(t))
    }
}

fn in_scope(element: &ElementInfo, form: Option<FormRef>) -> bool {
    form.is_none() || element.form == form
}

/// First visible element of `kind`, by selector order then document order.
pub fn find(snapshot: &DomSnapshot, kind: FieldKind, form: Option<FormRef>) -> Option<&ElementInfo> {
    for selector in kind.selectors() {
        let found = snapshot.visible_elements().find(|element| {
            in_scope(element, form) && kind.allows_type(element) && selector.matches(element)
        });
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Every visible element of `kind`, in document order.
pub fn find_all(snapshot: &DomSnapshot, kind: FieldKind, form: Option<FormRef>) -> Vec<&ElementInfo> {
    let selectors = kind.selectors();
    snapshot
        .visible_elements()
        .filter(|element| {
            in_scope(element, form)
                && kind.allows_type(element)
                && selectors.iter().any(|selector| selector.matches(element))
        })
        .collect()
}

/// Whether a form's id, name or class carries a login marker.
pub fn is_login_form(form: &FormInfo) -> bool {
    [&form.id, &form.name, &form.class].iter().any(|value| {
        let value = value.to_lowercase();
        LOGIN_MARKERS.iter().any(|marker| value.contains(marker))
    })
}
