use crate::bus::BusError;
use crate::ids::ConnectionId;

/// Failures the relay distinguishes. Classified by how the caller reacts:
/// close the connection, drop the event, or end a listener.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    // Close the connection
    #[error("no authenticated session for connection {0}")]
    AuthenticationAbsent(ConnectionId),
    #[error("connection {0} is not registered")]
    RegistryRace(ConnectionId),

    // Drop the event
    #[error("access denied: {viewer} cannot view {object}")]
    AccessDenied { viewer: String, object: String },

    // End the listener
    #[error("bus subscription failed: {0}")]
    Bus(#[from] BusError),

    // Local
    #[error("malformed frame: {0}")]
    Protocol(String),
    #[error("invalid classification policy: {0}")]
    InvalidPolicy(String),
}

impl RelayError {
    /// Whether the connection that triggered this error must be closed.
    pub fn disconnects(&self) -> bool {
        matches!(self, Self::AuthenticationAbsent(_) | Self::RegistryRace(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationAbsent(_) => "authentication_absent",
            Self::RegistryRace(_) => "registry_race",
            Self::AccessDenied { .. } => "access_denied",
            Self::Bus(_) => "bus_subscription_failure",
            Self::Protocol(_) => "protocol",
            Self::InvalidPolicy(_) => "invalid_policy",
        }
    }
}
