//! Locator and workload identifier validation.
//!
//! Hosts are addressed by an absolute network locator
//! (`scheme://host[:port][/path]`). The local runtime socket is reserved:
//! it names the implicit local host and can never be registered as a
//! placement target.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Locator of the local runtime's own engine socket.
pub const LOCAL_RUNTIME_SOCKET: &str = "unix:///run/docker.sock";

/// Request-layer keyword for the implicit local host.
pub const LOCAL_ALIAS: &str = "local";

/// Every spelling that aliases the implicit local host.
const RESERVED_LOCATORS: &[&str] = &[LOCAL_RUNTIME_SOCKET, "/run/docker.sock"];

/// Longest accepted workload identifier.
pub const MAX_WORKLOAD_ID_LEN: usize = 64;

static LOCATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-z][a-z0-9+.-]*://(?:\[[0-9A-Fa-f:.]+\]|[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)*)(?::(?P<port>[0-9]{1,5}))?(?:/[^\s?#]*)?$",
    )
    .expect("locator pattern is valid")
});

static WORKLOAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_-]+$").expect("workload pattern is valid"));

/// Rejections produced by the validators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("empty {0}")]
    Empty(&'static str),

    #[error("{0} is reserved for the local runtime")]
    ReservedLocator(String),

    #[error("malformed locator: {0}")]
    MalformedLocator(String),

    #[error("invalid port in locator: {0}")]
    InvalidPort(String),

    #[error("invalid workload id: {0}")]
    InvalidWorkloadId(String),
}

/// A validated placement host locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Locator {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        validate_locator(&raw).map_err(serde::de::Error::custom)
    }
}

/// A validated workload identifier. Identity is string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct WorkloadId(String);

impl WorkloadId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for WorkloadId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        validate_workload_id(&raw).map_err(serde::de::Error::custom)
    }
}

/// Returns true if `candidate` names the local runtime socket.
pub fn is_reserved_locator(candidate: &str) -> bool {
    RESERVED_LOCATORS.contains(&candidate)
}

/// Validate a host locator.
///
/// Reserved local runtime addresses are rejected with
/// [`ValidationError::ReservedLocator`] before any syntax check.
pub fn validate_locator(candidate: &str) -> Result<Locator, ValidationError> {
    if candidate.is_empty() {
        return Err(ValidationError::Empty("locator"));
    }
    if is_reserved_locator(candidate) {
        return Err(ValidationError::ReservedLocator(candidate.to_string()));
    }
    let caps = LOCATOR_RE
        .captures(candidate)
        .ok_or_else(|| ValidationError::MalformedLocator(candidate.to_string()))?;
    if let Some(port) = caps.name("port") {
        match port.as_str().parse::<u16>() {
            Ok(p) if p > 0 => {}
            _ => return Err(ValidationError::InvalidPort(candidate.to_string())),
        }
    }
    Ok(Locator(candidate.to_string()))
}

/// Validate a workload identifier against the catalog slug grammar.
pub fn validate_workload_id(candidate: &str) -> Result<WorkloadId, ValidationError> {
    if candidate.is_empty() {
        return Err(ValidationError::Empty("workload id"));
    }
    if candidate.len() > MAX_WORKLOAD_ID_LEN || !WORKLOAD_RE.is_match(candidate) {
        return Err(ValidationError::InvalidWorkloadId(candidate.to_string()));
    }
    Ok(WorkloadId(candidate.to_string()))
}

/// Where a workload should run: the implicit local host or a remote target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Local,
    Remote(Locator),
}

impl Target {
    /// Parse a request-layer host reference.
    ///
    /// The `local` keyword and every reserved runtime address map to
    /// [`Target::Local`]; anything else must be a valid locator.
    pub fn parse(candidate: &str) -> Result<Self, ValidationError> {
        if candidate == LOCAL_ALIAS || is_reserved_locator(candidate) {
            return Ok(Target::Local);
        }
        validate_locator(candidate).map(Target::Remote)
    }

    pub fn locator(&self) -> Option<&Locator> {
        match self {
            Target::Local => None,
            Target::Remote(locator) => Some(locator),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Target::Local)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Local => f.write_str(LOCAL_ALIAS),
            Target::Remote(locator) => locator.fmt(f),
        }
    }
}

impl From<Locator> for Target {
    fn from(locator: Locator) -> Self {
        Target::Remote(locator)
    }
}
