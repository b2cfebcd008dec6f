use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Random 32-char hex id (UUID v4). The leading characters are
            /// random, so short prefixes stay distinguishable in log lines.
            pub fn new() -> Self {
                Self(Uuid::new_v4().simple().to_string())
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

opaque_id!(
    /// Transport-assigned id of one live connection.
    ConnectionId
);
opaque_id!(
    /// Token stored in the session cookie, keying the cached login record.
    SessionToken
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_is_hex() {
        let id = ConnectionId::new();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn short_prefixes_vary() {
        let prefixes: std::collections::HashSet<String> = (0..64)
            .map(|_| ConnectionId::new().as_str()[..4].to_string())
            .collect();
        assert!(prefixes.len() > 1);
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = SessionToken::new();
        let parsed: SessionToken = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serde_is_transparent() {
        let id = ConnectionId::from_raw("abcd1234");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abcd1234\"");
    }
}
