pub mod dom;
#[cfg(test)]
pub(crate) mod fake;
pub mod form;
pub mod orchestrator;
pub mod selectors;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A login field that can be filled into a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillField {
    Login,
    Secret,
    OpenId,
}

impl FillField {
    pub fn as_str(self) -> &'static str {
        match self {
            FillField::Login => "login",
            FillField::Secret => "secret",
            FillField::OpenId => "openid",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "login" => Some(FillField::Login),
            "secret" => Some(FillField::Secret),
            "openid" => Some(FillField::OpenId),
            _ => None,
        }
    }
}

impl fmt::Display for FillField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values available for filling, taken from a decrypted login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillValues {
    pub login: String,
    pub secret: String,
    pub openid: Option<String>,
}

impl FillValues {
    pub fn value(&self, field: FillField) -> Option<&str> {
        match field {
            FillField::Login => Some(self.login.as_str()),
            FillField::Secret => Some(self.secret.as_str()),
            FillField::OpenId => self.openid.as_deref(),
        }
    }
}

/// One attempt to fill a single frame.
#[derive(Debug, Clone)]
pub struct FillRequest {
    /// Origin of the top-level page the fill was requested for.
    pub origin: String,
    pub fields: Vec<FillField>,
    pub values: FillValues,
    pub allow_foreign: bool,
    pub allow_no_secret: bool,
    pub auto_submit: bool,
    /// Prior decisions for embedded origins on this host.
    pub foreign_fills: BTreeMap<String, bool>,
}

/// What one frame reported back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameFillResult {
    pub filled_fields: Vec<FillField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_fill: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_origin: Option<String>,
}
