//! The durable placement document.
//!
//! Canonical shape, one key per placement host in insertion order:
//!
//! ```json
//! { "hosts": { "https://node1.local": ["my_addon"] } }
//! ```
//!
//! Older files stored `hosts` as a list of `{ "url": ..., "addons": [...] }`
//! objects. Those are accepted on load and rewritten in canonical form on
//! the next save. The implicit local host never appears as a key.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{StateError, StateResult};

/// Raw persisted state: locator -> ordered workload ids.
///
/// Values are unvalidated strings; the registry validates them during its
/// load phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawState {
    pub hosts: IndexMap<String, Vec<String>>,
}

/// Which on-disk shape a document was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentShape {
    /// No bytes, or a document without a `hosts` key.
    Empty,
    Canonical,
    /// Historical list-of-entries shape, migrated on read.
    Legacy,
}

#[derive(Deserialize)]
struct DocumentIn {
    #[serde(default)]
    hosts: Option<HostsIn>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HostsIn {
    Mapping(IndexMap<String, Vec<String>>),
    Listing(Vec<LegacyEntry>),
}

#[derive(Deserialize)]
struct LegacyEntry {
    #[serde(alias = "url")]
    locator: String,
    #[serde(default, alias = "addons")]
    workloads: Vec<String>,
}

impl RawState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Parse a document, migrating the legacy shape if needed.
    pub fn from_json(bytes: &[u8]) -> StateResult<(Self, DocumentShape)> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok((Self::new(), DocumentShape::Empty));
        }
        let doc: DocumentIn = serde_json::from_slice(bytes)
            .map_err(|e| StateError::Deserialize(e.to_string()))?;
        match doc.hosts {
            None => Ok((Self::new(), DocumentShape::Empty)),
            Some(HostsIn::Mapping(hosts)) => Ok((Self { hosts }, DocumentShape::Canonical)),
            Some(HostsIn::Listing(entries)) => {
                let mut hosts = IndexMap::with_capacity(entries.len());
                for entry in entries {
                    if hosts.contains_key(&entry.locator) {
                        warn!(locator = %entry.locator, "duplicate host in legacy document, keeping first");
                        continue;
                    }
                    hosts.insert(entry.locator, entry.workloads);
                }
                Ok((Self { hosts }, DocumentShape::Legacy))
            }
        }
    }

    /// Serialize to canonical, pretty-printed JSON.
    pub fn to_json(&self) -> StateResult<Vec<u8>> {
        let mut bytes =
            serde_json::to_vec_pretty(self).map_err(|e| StateError::Serialize(e.to_string()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RawState {
        let mut state = RawState::new();
        state
            .hosts
            .insert("https://node2.local".into(), vec!["b".into(), "a".into()]);
        state.hosts.insert("https://node1.local".into(), vec![]);
        state
    }

    #[test]
    fn canonical_bytes_are_a_fixed_point() {
        let bytes = sample().to_json().unwrap();
        let (parsed, shape) = RawState::from_json(&bytes).unwrap();
        assert_eq!(shape, DocumentShape::Canonical);
        assert_eq!(parsed.to_json().unwrap(), bytes);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let bytes = sample().to_json().unwrap();
        let (parsed, _) = RawState::from_json(&bytes).unwrap();
        let keys: Vec<_> = parsed.hosts.keys().cloned().collect();
        assert_eq!(keys, vec!["https://node2.local", "https://node1.local"]);
        assert_eq!(parsed.hosts["https://node2.local"], vec!["b", "a"]);
    }

    #[test]
    fn empty_input_is_empty_state() {
        for input in [&b""[..], b"  \n", b"{}"] {
            let (state, shape) = RawState::from_json(input).unwrap();
            assert!(state.is_empty());
            assert_eq!(shape, DocumentShape::Empty);
        }
    }

    #[test]
    fn legacy_listing_is_migrated() {
        let legacy = br#"{
            "hosts": [
                {"url": "https://node1.local", "addons": ["my_addon"]},
                {"url": "https://node2.local"},
                {"locator": "https://node1.local", "workloads": ["dup"]}
            ],
            "extra": true
        }"#;
        let (state, shape) = RawState::from_json(legacy).unwrap();
        assert_eq!(shape, DocumentShape::Legacy);
        assert_eq!(state.hosts.len(), 2);
        assert_eq!(state.hosts["https://node1.local"], vec!["my_addon"]);
        assert!(state.hosts["https://node2.local"].is_empty());

        let rewritten = state.to_json().unwrap();
        let (_, shape) = RawState::from_json(&rewritten).unwrap();
        assert_eq!(shape, DocumentShape::Canonical);
    }

    #[test]
    fn garbage_is_a_deserialize_error() {
        assert!(matches!(
            RawState::from_json(b"{\"hosts\": 7}"),
            Err(StateError::Deserialize(_))
        ));
        assert!(matches!(
            RawState::from_json(b"not json"),
            Err(StateError::Deserialize(_))
        ));
    }
}
