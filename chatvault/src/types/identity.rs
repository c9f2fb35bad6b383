//! Identity key helpers
//!
//! Contacts and conversations share one key namespace of the form
//! `localPart@domain`. The domain separates individual accounts from groups.

use serde::{Deserialize, Serialize};

/// Domain used by group conversation keys
pub const GROUP_DOMAIN: &str = "g.us";

/// Namespace an identity key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    Individual,
    Group,
}

/// Part of the key before the `@` (the whole key if there is none)
pub fn local_part(key: &str) -> &str {
    match key.split_once('@') {
        Some((local, _)) => local,
        None => key,
    }
}

/// Part of the key after the `@`
pub fn domain(key: &str) -> Option<&str> {
    key.split_once('@').map(|(_, domain)| domain)
}

pub fn is_group(key: &str) -> bool {
    domain(key).is_some_and(|d| d.eq_ignore_ascii_case(GROUP_DOMAIN))
}

pub fn kind(key: &str) -> KeyKind {
    if is_group(key) {
        KeyKind::Group
    } else {
        KeyKind::Individual
    }
}
