//! Strongly-typed identifiers.
//!
//! All IDs are validated at construction time and implement common traits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `from_string()`, `as_str()`, Display, Serialize, Deserialize.
/// Optionally generates `new()` (UUID v4) and `Default` if `uuid` flag is passed.
macro_rules! define_id {
    ($name:ident, uuid) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            /// Infallible constructor for test fixtures. Panics on empty input.
            #[cfg(any(test, feature = "test-harness"))]
            pub fn must(s: &str) -> Self {
                Self::from_string(s.to_string()).expect("valid id literal")
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
                write!(f, "{}", self.0)
            }
        }
    };
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            /// Infallible constructor for test fixtures. Panics on empty input.
            #[cfg(any(test, feature = "test-harness"))]
            pub fn must(s: &str) -> Self {
                Self::from_string(s.to_string()).expect("valid id literal")
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(ArtifactId);
define_id!(InstanceId, uuid);
define_id!(OperationId);
define_id!(PolicyId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_id_rejects_empty() {
        assert!(ArtifactId::from_string(String::new()).is_err());
        assert!(ArtifactId::from_string("app-1".to_string()).is_ok());
    }

    #[test]
    fn instance_ids_are_unique() {
        assert_ne!(InstanceId::new(), InstanceId::new());
    }

    #[test]
    fn display_matches_inner() {
        let id = ArtifactId::must("orders");
        assert_eq!(id.to_string(), "orders");
        assert_eq!(id.as_str(), "orders");
    }
}
