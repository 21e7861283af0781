//! Event type and status registry
//!
//! Static mapping from the human-readable names clients submit to the stable
//! integer codes that are queued and persisted. The registry is compiled in,
//! read-only and freely shared across request handlers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lookup failure for a name or code that is not registered
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The name is not a registered event type or status
    #[error("unknown {kind} name: {name}")]
    NotFound {
        /// Which table was searched
        kind: &'static str,
        /// The name that was looked up
        name: String,
    },

    /// The integer code is not a registered event type or status
    #[error("unknown {kind} code: {code}")]
    UnknownCode {
        /// Which table was searched
        kind: &'static str,
        /// The code that was looked up
        code: i32,
    },
}

/// Registered audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum EventType {
    CustomerCreated,
    CustomerActionPerformed,
    CustomerBilled,
    CustomerDeactivated,
}

impl EventType {
    /// Every registered event type, in code order
    pub const ALL: [EventType; 4] = [
        Self::CustomerCreated,
        Self::CustomerActionPerformed,
        Self::CustomerBilled,
        Self::CustomerDeactivated,
    ];

    /// Stable integer code stored with the event
    pub const fn code(self) -> i32 {
        match self {
            Self::CustomerCreated => 1,
            Self::CustomerActionPerformed => 2,
            Self::CustomerBilled => 3,
            Self::CustomerDeactivated => 4,
        }
    }

    /// Name accepted at intake
    pub const fn name(self) -> &'static str {
        match self {
            Self::CustomerCreated => "customer_created",
            Self::CustomerActionPerformed => "customer_action_performed",
            Self::CustomerBilled => "customer_billed",
            Self::CustomerDeactivated => "customer_deactivated",
        }
    }

    /// Look up an event type by its integer code
    pub fn from_code(code: i32) -> Result<Self, RegistryError> {
        Self::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or(RegistryError::UnknownCode {
                kind: "event type",
                code,
            })
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<i32> for EventType {
    type Error = RegistryError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl From<EventType> for i32 {
    fn from(t: EventType) -> Self {
        t.code()
    }
}

/// Registered event outcome statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum EventStatus {
    Success,
    Error,
}

impl EventStatus {
    /// Every registered status, in code order
    pub const ALL: [EventStatus; 2] = [Self::Success, Self::Error];

    /// Stable integer code stored with the event
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 100,
            Self::Error => 200,
        }
    }

    /// Name accepted at intake
    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// Look up a status by its integer code
    pub fn from_code(code: i32) -> Result<Self, RegistryError> {
        Self::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or(RegistryError::UnknownCode {
                kind: "status",
                code,
            })
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<i32> for EventStatus {
    type Error = RegistryError;

    fn try_from(code: i32) -> Result<Self, RegistryError> {
        Self::from_code(code)
    }
}

impl From<EventStatus> for i32 {
    fn from(s: EventStatus) -> Self {
        s.code()
    }
}

/// Resolve a submitted event type name
///
/// Names are matched exactly; there is no case folding.
pub fn resolve_event_type(name: &str) -> Result<EventType, RegistryError> {
    EventType::ALL
        .into_iter()
        .find(|t| t.name() == name)
        .ok_or_else(|| RegistryError::NotFound {
            kind: "event type",
            name: name.to_string(),
        })
}

/// Resolve a submitted status name
pub fn resolve_status(name: &str) -> Result<EventStatus, RegistryError> {
    EventStatus::ALL
        .into_iter()
        .find(|s| s.name() == name)
        .ok_or_else(|| RegistryError::NotFound {
            kind: "status",
            name: name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_codes() {
        assert_eq!(resolve_event_type("customer_created").unwrap().code(), 1);
        assert_eq!(
            resolve_event_type("customer_action_performed").unwrap().code(),
            2
        );
        assert_eq!(resolve_event_type("customer_billed").unwrap().code(), 3);
        assert_eq!(resolve_event_type("customer_deactivated").unwrap().code(), 4);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(resolve_status("success").unwrap().code(), 100);
        assert_eq!(resolve_status("error").unwrap().code(), 200);
    }

    #[test]
    fn test_code_conversions() {
        assert!(matches!(EventStatus::try_from(200), Ok(EventStatus::Error)));
        assert!(matches!(EventStatus::try_from(100), Ok(EventStatus::Success)));
        assert!(matches!(
            EventStatus::try_from(300),
            Err(RegistryError::UnknownCode { code: 300, .. })
        ));
        assert!(matches!(EventType::try_from(4), Ok(EventType::CustomerDeactivated)));
        assert!(EventType::try_from(0).is_err());
    }

    #[test]
    fn test_unknown_names() {
        let err = resolve_event_type("unknown_type").unwrap_err();
        assert_eq!(
            err,
            RegistryError::NotFound {
                kind: "event type",
                name: "unknown_type".to_string()
            }
        );
        assert!(resolve_status("Success").is_err());
        assert!(resolve_status("").is_err());
    }

    #[test]
    fn test_codes_resolve_back_to_names() {
        for t in EventType::ALL {
            assert_eq!(EventType::from_code(t.code()).unwrap(), t);
            assert_eq!(resolve_event_type(t.name()).unwrap(), t);
        }
        for s in EventStatus::ALL {
            assert_eq!(EventStatus::from_code(s.code()).unwrap(), s);
        }
        assert!(EventType::from_code(0).is_err());
        assert!(EventStatus::from_code(300).is_err());
    }

    #[test]
    fn test_serializes_as_code() {
        assert_eq!(serde_json::to_string(&EventType::CustomerBilled).unwrap(), "3");
        assert_eq!(serde_json::to_string(&EventStatus::Error).unwrap(), "200");

        let t: EventType = serde_json::from_str("4").unwrap();
        assert_eq!(t, EventType::CustomerDeactivated);
        assert!(serde_json::from_str::<EventType>("9").is_err());
        assert!(serde_json::from_str::<EventStatus>("\"success\"").is_err());
    }
}
