use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const SECRET_ALIASES: &[&str] = &["secret", "password", "pass"];
const LOGIN_ALIASES: &[&str] = &["login", "username", "user"];
const URL_ALIASES: &[&str] = &["url", "uri", "website", "site", "link", "launch"];
const OPENID_ALIASES: &[&str] = &["openid"];
const OTP_ALIASES: &[&str] = &["otp", "totp"];

/// Boolean per-login settings a credential file may carry, by the
/// lower-case key used in the file.
const BOOL_SETTINGS: &[&str] = &["autosubmit"];

/// A credential file's identity: store id plus store-relative path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LoginId {
    #[serde(rename = "storeId")]
    pub store_id: String,
    pub path: String,
}

impl LoginId {
    pub fn new(store_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            path: path.into(),
        }
    }

    /// Final path segment, used as the login name when the file has none.
    pub fn basename(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

impl std::fmt::Display for LoginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.store_id, self.path)
    }
}

/// A value for a per-login setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Text(String),
}

/// Fields recovered from a credential file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginFields {
    pub secret: String,
    pub login: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

/// The structured result of parsing one decrypted credential file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedLogin {
    pub fields: LoginFields,
    /// Explicit per-login settings only; defaults are resolved later.
    pub settings: BTreeMap<String, SettingValue>,
    /// Key text of the line the secret was read from, if any.
    #[serde(rename = "secretPrefix", skip_serializing_if = "Option::is_none")]
    pub secret_prefix: Option<String>,
}

#[derive(Default)]
struct FieldScan {
    secret: Option<(String, String)>,
    login: Option<String>,
    url: Option<String>,
    openid: Option<String>,
    otp: Option<String>,
    settings: BTreeMap<String, SettingValue>,
}

fn split_key_value(line: &str) -> Option<(String, &str)> {
    let (key, value) = line.split_once(':')?;
    let (key, value) = (key.trim(), value.trim());
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key.to_lowercase(), value))
}

/// Keys match an alias exactly or by containing it, so `user name` is a login.
fn key_matches(key: &str, aliases: &[&str]) -> bool {
    aliases.iter().any(|alias| key.contains(alias))
}

/// Parse raw decrypted text into fields and settings.
///
/// The first non-blank line is the secret unless a later `password: ...`
/// style line names one explicitly. For every field and setting the first
/// explicit line wins. `identity` supplies the login fallback.
pub fn parse_secret_file(raw: &str, identity: &LoginId) -> Result<ParsedLogin> {
    let lines: Vec<&str> = raw
        .split(['\r', '\n'])
        .filter(|line| !line.trim().is_empty())
        .collect();
    let Some(first_line) = lines.first() else {
        return Err(Error::Validation(format!("{identity} is empty")));
    };

    let mut scan = FieldScan::default();
    for line in &lines {
        if scan.otp.is_none() && line.trim_start().starts_with("otpauth://") {
            scan.otp = Some(line.trim().to_string());
            continue;
        }
        let Some((key, value)) = split_key_value(line) else {
            continue;
        };

        if key_matches(&key, SECRET_ALIASES) {
            if scan.secret.is_none() {
                let prefix = line.split_once(':').map(|(k, _)| k.trim()).unwrap_or_default();
                scan.secret = Some((value.to_string(), prefix.to_string()));
            }
        } else if key_matches(&key, LOGIN_ALIASES) {
            scan.login.get_or_insert_with(|| value.to_string());
        } else if key_matches(&key, URL_ALIASES) {
            scan.url.get_or_insert_with(|| value.to_string());
        } else if key_matches(&key, OPENID_ALIASES) {
            scan.openid.get_or_insert_with(|| value.to_string());
        } else if key_matches(&key, OTP_ALIASES) {
            scan.otp.get_or_insert_with(|| value.to_string());
        }

        if BOOL_SETTINGS.contains(&key.as_str()) && !scan.settings.contains_key(&key) {
            let enabled = matches!(value.to_lowercase().as_str(), "true" | "yes");
            scan.settings.insert(key, SettingValue::Bool(enabled));
        }
    }

    let (secret, secret_prefix) = match scan.secret {
        Some((secret, prefix)) => (secret, Some(prefix)),
        None => (first_line.to_string(), None),
    };
    if secret.is_empty() {
        return Err(Error::Validation(format!("{identity} has an empty secret")));
    }

    Ok(ParsedLogin {
        fields: LoginFields {
            secret,
            login: scan
                .login
                .unwrap_or_else(|| identity.basename().to_string()),
            url: scan.url,
            openid: scan.openid,
            otp: scan.otp,
        },
        settings: scan.settings,
        secret_prefix,
    })
}

/// Usage history for one login on one host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recency {
    pub when: i64,
    pub count: u64,
}

/// A fetched and parsed credential file.
///
/// Only [`LoginRecord::from_raw`] builds one, so a record always has a
/// non-empty secret and its `raw` text is exactly what the host returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginRecord {
    identity: LoginId,
    raw: String,
    parsed: ParsedLogin,
    recency: Recency,
}

impl LoginRecord {
    pub fn from_raw(identity: LoginId, raw: String) -> Result<Self> {
        let parsed = parse_secret_file(&raw, &identity)?;
        Ok(Self {
            identity,
            raw,
            parsed,
            recency: Recency::default(),
        })
    }

    pub fn with_recency(mut self, recency: Recency) -> Self {
        self.recency = recency;
        self
    }

    pub fn identity(&self) -> &LoginId {
        &self.identity
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn fields(&self) -> &LoginFields {
        &self.parsed.fields
    }

    pub fn settings(&self) -> &BTreeMap<String, SettingValue> {
        &self.parsed.settings
    }

    pub fn secret_prefix(&self) -> Option<&str> {
        self.parsed.secret_prefix.as_deref()
    }

    pub fn recency(&self) -> Recency {
        self.recency
    }

    /// Explicit `autosubmit:` value from the file, if present.
    pub fn auto_submit(&self) -> Option<bool> {
        match self.parsed.settings.get("autosubmit") {
            Some(SettingValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }
}
