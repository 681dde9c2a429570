//! Structured logging properties carried by a [`Context`](crate::Context).

use std::collections::BTreeMap;
use std::fmt;

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Serialize;

/// Length of generated context (correlation) identifiers.
pub const CONTEXT_ID_LEN: usize = 32;

/// The closed set of property keys a context can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PropertyKey {
    #[serde(rename = "contextID")]
    ContextId,
    #[serde(rename = "sessionID")]
    SessionId,
    #[serde(rename = "userID")]
    UserId,
    #[serde(rename = "tenantID")]
    TenantId,
}

impl PropertyKey {
    /// Properties a worker context inherits from its origin.
    pub const INHERITED: [PropertyKey; 3] = [Self::SessionId, Self::UserId, Self::TenantId];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContextId => "contextID",
            Self::SessionId => "sessionID",
            Self::UserId => "userID",
            Self::TenantId => "tenantID",
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key/value log properties. Last write for a key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<PropertyKey, String>);

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: PropertyKey, value: impl Into<String>) {
        self.0.insert(key, value.into());
    }

    #[must_use]
    pub fn get(&self, key: PropertyKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    /// Returns the value or an empty string, the form log sinks expect.
    #[must_use]
    pub fn get_or_empty(&self, key: PropertyKey) -> &str {
        self.get(key).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropertyKey, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON object keyed by the wire names (`contextID`, `sessionID`, ...).
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Generates a fresh random correlation id of [`CONTEXT_ID_LEN`] alphanumerics.
#[must_use]
pub fn new_context_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(CONTEXT_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_ids_are_32_alphanumerics_and_distinct() {
        let a = new_context_id();
        let b = new_context_id();
        assert_eq!(a.len(), CONTEXT_ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn last_write_wins() {
        let mut props = Properties::new();
        props.set(PropertyKey::UserId, "1");
        props.set(PropertyKey::UserId, "2");
        assert_eq!(props.get(PropertyKey::UserId), Some("2"));
        assert_eq!(props.len(), 1);
        assert_eq!(props.get_or_empty(PropertyKey::SessionId), "");
    }

    #[test]
    fn json_uses_wire_names() {
        let mut props = Properties::new();
        props.set(PropertyKey::ContextId, "abc");
        props.set(PropertyKey::TenantId, "7");
        assert_eq!(
            props.to_json(),
            serde_json::json!({ "contextID": "abc", "tenantID": "7" })
        );
    }
}
