//! Mapping store paths to the domain they describe.
//!
//! A store path such as `work/github.com/alice` carries its domain as one of
//! its segments. [`match_domain`] finds that segment, preferring the most
//! specific (rightmost) one.

use serde::Serialize;
use url::Url;

/// Parsed hostname with optional port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Registrable domain when the hostname sits under a known public suffix.
    #[serde(rename = "registeredDomain", skip_serializing_if = "Option::is_none")]
    pub registered_domain: Option<String>,
}

impl HostInfo {
    /// Parse a bare `host[:port]` string. Returns `None` for anything that is
    /// not a syntactically valid host.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.contains(['/', '?', '#', '@']) {
            return None;
        }
        let url = Url::parse(&format!("http://{trimmed}")).ok()?;
        let hostname = url.host_str()?.trim_end_matches('.').to_string();
        if hostname.is_empty() {
            return None;
        }
        let registered_domain = psl::domain(hostname.as_bytes())
            .filter(|domain| domain.suffix().is_known())
            .and_then(|domain| std::str::from_utf8(domain.as_bytes()).ok())
            .map(str::to_string);
        Some(Self {
            hostname,
            // `Url` drops default ports; a written `:80` still counts.
            port: url.port().or_else(|| explicit_port(trimmed)),
            registered_domain,
        })
    }

    /// Hostname including the port, as used for exact comparisons.
    pub fn host(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.hostname),
            None => self.hostname.clone(),
        }
    }

    /// Whether the hostname is under a known public suffix.
    pub fn is_valid_domain(&self) -> bool {
        self.registered_domain.is_some()
    }

    /// True when `self` is `other` or one of its parent domains, ports equal.
    pub fn is_same_or_ancestor_of(&self, other: &HostInfo) -> bool {
        self.port == other.port
            && (self.hostname == other.hostname
                || other.hostname.ends_with(&format!(".{}", self.hostname)))
    }
}

/// Port spelled out after the host, bracketed IPv6 literals included.
fn explicit_port(input: &str) -> Option<u16> {
    let after_host = match input.rfind(']') {
        Some(end) => &input[end + 1..],
        None => input,
    };
    let (_, port) = after_host.rsplit_once(':')?;
    port.parse().ok()
}

/// How closely a candidate's domain relates to the active host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Affinity {
    None,
    Ancestor,
    Exact,
}

impl Affinity {
    /// Classify `entry` against `current`. The entry must be equal to or an
    /// ancestor of the active host to count; a subdomain entry does not.
    pub fn of(entry: &HostInfo, current: &HostInfo) -> Self {
        if entry.port != current.port {
            return Affinity::None;
        }
        if entry.hostname == current.hostname {
            Affinity::Exact
        } else if entry.is_same_or_ancestor_of(current) {
            Affinity::Ancestor
        } else {
            Affinity::None
        }
    }
}

/// Find the most specific segment of `path` that names a domain.
///
/// Segments are examined right to left; segments containing `@` are treated
/// as user names and skipped. A segment is accepted when its hostname is under
/// a known public suffix (and its port agrees with `current_host`), when it is
/// exactly `current_host`, or when `current_host` is one of its subdomains.
pub fn match_domain(path: &str, current_host: &str) -> Option<HostInfo> {
    let current = HostInfo::parse(current_host);
    for segment in path.split('/').rev() {
        if segment.is_empty() || segment.contains('@') {
            continue;
        }
        let Some(info) = HostInfo::parse(segment) else {
            continue;
        };
        let accepted = match &current {
            Some(current) => {
                (info.is_valid_domain() && info.port == current.port)
                    || info.is_same_or_ancestor_of(current)
            }
            None => info.is_valid_domain() && info.port.is_none(),
        };
        if accepted {
            return Some(info);
        }
    }
    None
}
