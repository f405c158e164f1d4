use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// RUM identifiers travel to the intake as bare UUIDs, so unlike internal
/// handles they carry no prefix.
macro_rules! rum_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

rum_id!(ApplicationId);
rum_id!(SessionId);
rum_id!(ViewId);
rum_id!(ActionId);
rum_id!(ResourceId);
rum_id!(ErrorId);
rum_id!(LongTaskId);

/// Opaque key chosen by the caller to correlate start/stop calls of a view.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewKey(String);

/// Opaque key chosen by the caller to correlate start/stop calls of a resource.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

macro_rules! caller_key {
    ($name:ident) => {
        impl $name {
            pub fn new(key: impl Into<String>) -> Self {
                Self(key.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

caller_key!(ViewKey);
caller_key!(ResourceKey);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_a_uuid() {
        let id = SessionId::new();
        assert!(Uuid::parse_str(id.as_str()).is_ok(), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = ViewId::new();
        let b = ViewId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = ActionId::new();
        let parsed: ActionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ApplicationId::from_raw("app-123");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""app-123""#);
    }

    #[test]
    fn caller_keys_compare_by_value() {
        assert_eq!(ResourceKey::from("GET /a"), ResourceKey::new("GET /a".to_string()));
        assert_ne!(ViewKey::from("home"), ViewKey::from("detail"));
    }
}
