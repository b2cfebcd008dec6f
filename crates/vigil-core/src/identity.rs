use serde::Serialize;

use crate::classification::ClassificationLabel;
use crate::ids::ConnectionId;

/// Username carried by identities that did not come from a valid session.
/// Angle brackets keep it outside the space of real account names.
pub const UNAUTHENTICATED_USER: &str = "<unauthenticated>";

/// Who is on the other end of one live connection. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectionIdentity {
    connection_id: ConnectionId,
    username: String,
    display: String,
    classification: Option<ClassificationLabel>,
    source_ip: String,
    authenticated: bool,
}

impl ConnectionIdentity {
    /// Identity for a user resolved from a valid session. `classification`
    /// is `None` when the user record no longer exists.
    pub fn authenticated(
        connection_id: ConnectionId,
        username: impl Into<String>,
        classification: Option<ClassificationLabel>,
        source_ip: impl Into<String>,
    ) -> Self {
        let username = username.into();
        Self {
            display: display_label(&username, &connection_id),
            connection_id,
            username,
            classification,
            source_ip: source_ip.into(),
            authenticated: true,
        }
    }

    /// Placeholder identity used when no valid session exists. Never admitted
    /// to the registry.
    pub fn fallback(
        connection_id: ConnectionId,
        restricted: ClassificationLabel,
        source_ip: impl Into<String>,
    ) -> Self {
        Self {
            display: display_label(UNAUTHENTICATED_USER, &connection_id),
            connection_id,
            username: UNAUTHENTICATED_USER.to_owned(),
            classification: Some(restricted),
            source_ip: source_ip.into(),
            authenticated: false,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// `"{username}({first four chars of the connection id})"`.
    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn classification(&self) -> Option<&ClassificationLabel> {
        self.classification.as_ref()
    }

    pub fn source_ip(&self) -> &str {
        &self.source_ip
    }

    /// False for the fallback identity, whatever flag it was built with.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated && self.username != UNAUTHENTICATED_USER
    }
}

pub fn display_label(username: &str, connection_id: &ConnectionId) -> String {
    let short: String = connection_id.as_str().chars().take(4).collect();
    format!("{username}({short})")
}
