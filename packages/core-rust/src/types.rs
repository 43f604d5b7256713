use std::fmt;

use serde::{Deserialize, Serialize};

/// Generate a string-backed identifier newtype.
///
/// Identifiers serialize transparently, so `OrderId("o1")` is `"o1"` on the wire.
macro_rules! string_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps the given string as an identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
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
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of an order, assigned by the order service.
    OrderId
);

string_id!(
    /// Identifier of a courier in the dispatch roster.
    CourierId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&OrderId::new("o1")).unwrap();
        assert_eq!(json, "\"o1\"");

        let courier: CourierId = serde_json::from_str("\"k-7\"").unwrap();
        assert_eq!(courier.as_str(), "k-7");
    }

    #[test]
    fn display_matches_inner_value() {
        assert_eq!(CourierId::from("k-1").to_string(), "k-1");
        assert_eq!(OrderId::from(String::from("o-9")).to_string(), "o-9");
    }
}
