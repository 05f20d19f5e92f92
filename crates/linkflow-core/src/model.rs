//! Identifiers passed between the backend, the linking SDK and the controller.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

string_id!(
    /// Short-lived token authorizing one linking session.
    SessionToken
);

string_id!(
    /// Financial institution identifier, the deduplication key for linked items.
    InstitutionId
);

string_id!(
    /// Backend identifier of one linked institution connection.
    ItemId
);

/// Result of asking the backend whether the signed-in user already linked an institution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstitutionStatus {
    Exists,
    NotLinked,
}

impl InstitutionStatus {
    /// Only the exact JSON string `"exists"` counts as already linked.
    pub fn from_response(body: &serde_json::Value) -> Self {
        match body.as_str() {
            Some("exists") => InstitutionStatus::Exists,
            _ => InstitutionStatus::NotLinked,
        }
    }
}
