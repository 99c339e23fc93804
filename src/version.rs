use serde_json::Value;

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// `(major, minor, patch)` from a version reported by the native host.
///
/// Hosts report either a dotted string or a packed integer
/// `major * 1_000_000 + minor * 1_000 + patch`.
pub fn parse_host_version(value: &Value) -> Option<(u64, u64, u64)> {
    if let Some(packed) = value.as_u64() {
        return Some((packed / 1_000_000, (packed / 1_000) % 1_000, packed % 1_000));
    }
    parse_dotted(value.as_str()?)
}

fn parse_dotted(text: &str) -> Option<(u64, u64, u64)> {
    let mut parts = text.trim().trim_start_matches('v').split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    Some((major, minor, patch))
}

/// Whether a host at `host` speaks the same protocol as this build.
///
/// Versions must agree on the major component, and on the minor one while
/// the major is still 0.
pub fn is_compatible(host: (u64, u64, u64)) -> bool {
    let Some(ours) = parse_dotted(APP_VERSION) else {
        return false;
    };
    if ours.0 == 0 {
        host.0 == 0 && host.1 == ours.1
    } else {
        host.0 == ours.0
    }
}
