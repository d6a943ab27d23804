//! Observable extraction from STIX detection patterns
//!
//! Recognises equality comparisons such as:
//! - `[ipv4-addr:value = '198.51.100.1']`
//! - `[file:hashes.'SHA-256' = '...']`
//! - `[autonomous-system:number = 15169]`
//!
//! Other operators (`!=`, `MATCHES`, `LIKE`, ...) describe sets of values
//! rather than a concrete artifact and yield nothing.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::ObservableDescriptor;

static COMPARISON_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"([a-z0-9-]+):([A-Za-z0-9_.'-]+)\s*=\s*(?:'((?:[^'\\]|\\.)*)'|(\d+)\b)",
    )
    .unwrap()
});

/// Observable type for an object type and property path
fn observable_type(object_type: &str, path: &str) -> Option<&'static str> {
    let kind = match (object_type, path) {
        ("ipv4-addr", "value") => "IPv4-Addr",
        ("ipv6-addr", "value") => "IPv6-Addr",
        ("domain-name", "value") => "Domain",
        ("url", "value") => "URL",
        ("email-addr", "value") => "Email-Address",
        ("mac-addr", "value") => "Mac-Addr",
        ("file", "hashes.MD5") => "File-MD5",
        ("file", "hashes.SHA-1" | "hashes.SHA1") => "File-SHA1",
        ("file", "hashes.SHA-256" | "hashes.SHA256") => "File-SHA256",
        ("file", "name") => "File-Name",
        ("mutex", "name") => "Mutex",
        ("windows-registry-key", "key") => "Registry-Key",
        ("autonomous-system", "number") => "Autonomous-System",
        _ => return None,
    };
    Some(kind)
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Extract every observable named by a STIX pattern, in pattern order
pub fn extract_observables(pattern: &str) -> Vec<ObservableDescriptor> {
    let mut observables = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for cap in COMPARISON_REGEX.captures_iter(pattern) {
        let object_type = &cap[1];
        let path = cap[2].replace('\'', "");
        let Some(kind) = observable_type(object_type, &path) else {
            continue;
        };

        let value = match (cap.get(3), cap.get(4)) {
            (Some(quoted), _) => unescape(quoted.as_str()),
            (None, Some(number)) => number.as_str().to_string(),
            (None, None) => continue,
        };
        if value.is_empty() {
            continue;
        }

        let key = format!("{}:{}", kind, value.to_lowercase());
        if seen.insert(key) {
            observables.push(ObservableDescriptor::new(kind, &value));
        }
    }

    observables
}
