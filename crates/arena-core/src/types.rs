//! Session identity and the cluster names derived from it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label carried by every pod that belongs to a session.
pub const SESSION_LABEL: &str = "game_id";

/// Prefix of the deployment, service, autoscaler and ingress names.
pub const RESOURCE_PREFIX: &str = "snake";

const GENERATED_LEN: usize = 8;
const MAX_LEN: usize = 40;

/// Opaque identifier of one session ("game").
///
/// Generated ids are 8 lowercase hex characters. Ids parsed from client
/// input are restricted to lowercase alphanumerics and `-` so that they are
/// always safe to embed in Kubernetes object names and label values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid session id: {0:?}")]
pub struct InvalidSessionId(pub String);

impl SessionId {
    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        Self(raw[..GENERATED_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name shared by the session's deployment, service, autoscaler and ingress.
    pub fn resource_name(&self) -> String {
        format!("{RESOURCE_PREFIX}-{}", self.0)
    }

    /// Label selector matching the session's pods.
    pub fn label_selector(&self) -> String {
        format!("{SESSION_LABEL}={}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = InvalidSessionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s.len() <= MAX_LEN
            && s.bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
            && !s.starts_with('-')
            && !s.ends_with('-');
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidSessionId(s.to_string()))
        }
    }
}

impl TryFrom<String> for SessionId {
    type Error = InvalidSessionId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_short_hex() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
        // Generated ids round-trip through the parser.
        assert_eq!(id.as_str().parse::<SessionId>().unwrap(), id);
    }

    #[test]
    fn derived_names() {
        let id: SessionId = "a1b2c3d4".parse().unwrap();
        assert_eq!(id.resource_name(), "snake-a1b2c3d4");
        assert_eq!(id.label_selector(), "game_id=a1b2c3d4");
        assert_eq!(id.to_string(), "a1b2c3d4");
    }

    #[test]
    fn rejects_unsafe_ids() {
        assert!("".parse::<SessionId>().is_err());
        assert!("UPPER".parse::<SessionId>().is_err());
        assert!("a/b".parse::<SessionId>().is_err());
        assert!("-lead".parse::<SessionId>().is_err());
        assert!("x".repeat(41).parse::<SessionId>().is_err());
    }

    #[test]
    fn try_from_string_validates() {
        let ok = SessionId::try_from("a1b2c3d4".to_string()).unwrap();
        assert_eq!(String::from(ok), "a1b2c3d4");
        assert!(SessionId::try_from("Bad Id".to_string()).is_err());
    }
}
