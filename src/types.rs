//! NewType wrappers for strong typing throughout the backend.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing an agent id where a tenant id is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Identifier of a tenant (company) record.
    ///
    /// Every agent and every non-superadmin user carries one; it is the
    /// unit of data isolation.
    TenantId
);

newtype_string!(
    /// Identifier of a user record.
    UserId
);

newtype_string!(
    /// Identifier of an agent record.
    AgentId
);

newtype_string!(
    /// Identifier of a conversation record.
    ConversationId
);

newtype_string!(
    /// SHA-256 digest of an agent API key, hex encoded.
    ///
    /// Raw keys are never stored; lookups hash the presented key and
    /// compare digests.
    ApiKeyHash
);

newtype_string!(
    /// Short, non-secret prefix of an agent API key for display.
    ///
    /// Lets operators recognise which key an agent holds without
    /// revealing the key itself.
    ApiKeyPrefix
);

newtype_string!(
    /// Subject identifier assigned by an external identity provider.
    ExternalSubject
);
