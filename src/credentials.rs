use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::Serialize;

const SECRET_FIELDS: &[&str] = &["password", "passwd", "pass", "secret"];
const LOGIN_FIELDS: &[&str] = &["username", "user", "login"];
const EMAIL_FIELDS: &[&str] = &["email", "e-mail"];

/// Submitted form data: field name to every value posted under that name.
pub type FormFields = BTreeMap<String, Vec<String>>;

/// Credentials recovered from a submitted login form.
///
/// Handed to the UI layer, which decides whether to offer saving them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedCredentials {
    pub login: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FieldClass {
    Secret,
    Login,
    Email,
}

/// `name[x]` -> `name`
fn strip_subscript(name: &str) -> &str {
    if name.ends_with(']') {
        if let Some(open) = name.rfind('[') {
            return &name[..open];
        }
    }
    name
}

/// Secret-like names are checked first, so `userpass` counts as a secret.
fn classify(name: &str) -> Option<FieldClass> {
    let base = strip_subscript(name.trim()).to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| base.contains(k));
    if matches(SECRET_FIELDS) {
        Some(FieldClass::Secret)
    } else if matches(LOGIN_FIELDS) {
        Some(FieldClass::Login)
    } else if matches(EMAIL_FIELDS) {
        Some(FieldClass::Email)
    } else {
        None
    }
}

/// Extract `{login, password, email}` from submitted form fields.
///
/// Returns `None` when no password was submitted, when the submitted
/// passwords disagree (a failed confirmation), or when neither a user name
/// nor an email address is present.
pub fn extract_form_data(fields: &FormFields) -> Option<ExtractedCredentials> {
    let mut secrets = Vec::new();
    let mut logins = Vec::new();
    let mut emails = Vec::new();

    for (name, values) in fields {
        let Some(class) = classify(name) else {
            continue;
        };
        let Some(value) = values.iter().find(|value| !value.is_empty()) else {
            continue;
        };
        match class {
            FieldClass::Secret => secrets.push(value.clone()),
            FieldClass::Login => logins.push(value.clone()),
            FieldClass::Email => emails.push(value.clone()),
        }
    }

    if secrets.is_empty() {
        return None;
    }
    for (i, left) in secrets.iter().enumerate() {
        if secrets[i + 1..].iter().any(|right| right != left) {
            return None;
        }
    }
    if logins.is_empty() && emails.is_empty() {
        return None;
    }

    let password = secrets.swap_remove(0);
    let mut emails = emails.into_iter();
    if logins.is_empty() {
        Some(ExtractedCredentials {
            login: emails.next().unwrap_or_default(),
            password,
            email: Some(String::new()),
        })
    } else {
        Some(ExtractedCredentials {
            login: logins.swap_remove(0),
            password,
            email: emails.next(),
        })
    }
}

/// Decode an `application/x-www-form-urlencoded` request body.
pub fn parse_form_body(body: &str) -> FormFields {
    let mut fields = FormFields::new();
    for (name, value) in url::form_urlencoded::parse(body.as_bytes()) {
        fields
            .entry(name.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    fields
}

/// Credentials observed per tab, held in memory until the UI takes them.
#[derive(Default)]
pub struct SubmissionLog {
    entries: Mutex<HashMap<String, Vec<ExtractedCredentials>>>,
}

impl SubmissionLog {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<ExtractedCredentials>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Extract credentials from a submitted form and keep them for `tab_id`.
    pub fn record(&self, tab_id: &str, fields: &FormFields) -> bool {
        let Some(credentials) = extract_form_data(fields) else {
            return false;
        };
        log::debug!("captured submitted credentials on tab {tab_id}");
        self.lock()
            .entry(tab_id.to_string())
            .or_default()
            .push(credentials);
        true
    }

    pub fn take(&self, tab_id: &str) -> Vec<ExtractedCredentials> {
        self.lock().remove(tab_id).unwrap_or_default()
    }
}
