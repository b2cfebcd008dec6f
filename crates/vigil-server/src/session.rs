//! Resolving who is behind an inbound connection.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderMap};
use axum_extra::extract::cookie::CookieJar;

use vigil_core::{AccessPolicy, ConnectionId, ConnectionIdentity, SessionToken};
use vigil_settings::SessionSettings;
use vigil_store::{SessionStore, UserStore};

/// What the resolver needs from the upgrade request.
#[derive(Clone, Debug, Default)]
pub struct Handshake {
    pub session_token: Option<SessionToken>,
    /// Raw forwarded-for header value, if any.
    pub forwarded_for: Option<String>,
    pub peer: Option<SocketAddr>,
    pub user_agent: Option<String>,
}

impl Handshake {
    pub fn from_headers(headers: &HeaderMap, peer: Option<SocketAddr>, settings: &SessionSettings) -> Self {
        let jar = CookieJar::from_headers(headers);
        let session_token = jar
            .get(&settings.cookie_name)
            .map(|c| c.value())
            .filter(|v| !v.is_empty())
            .map(SessionToken::from_raw);

        let header_str = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };

        Self {
            session_token,
            forwarded_for: header_str(settings.forwarded_for_header.as_str()),
            peer,
            user_agent: header_str(header::USER_AGENT.as_str()),
        }
    }

    /// First forwarded-for entry, else the socket peer address.
    pub fn source_ip(&self) -> String {
        self.forwarded_for
            .as_deref()
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
            .or_else(|| self.peer.map(|p| p.ip().to_string()))
            .unwrap_or_default()
    }
}

/// Maps a handshake to an identity. Never fails: anything short of a valid,
/// matching session yields the fallback identity.
pub struct SessionResolver {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    policy: Arc<dyn AccessPolicy>,
}

impl SessionResolver {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
        policy: Arc<dyn AccessPolicy>,
    ) -> Self {
        Self {
            sessions,
            users,
            policy,
        }
    }

    pub async fn resolve(&self, connection_id: &ConnectionId, handshake: &Handshake) -> ConnectionIdentity {
        let source_ip = handshake.source_ip();
        match self.lookup(connection_id, handshake, &source_ip).await {
            Some(identity) => identity,
            None => ConnectionIdentity::fallback(
                connection_id.clone(),
                self.policy.restricted(),
                source_ip,
            ),
        }
    }

    async fn lookup(
        &self,
        connection_id: &ConnectionId,
        handshake: &Handshake,
        source_ip: &str,
    ) -> Option<ConnectionIdentity> {
        let token = handshake.session_token.as_ref()?;

        let record = match self.sessions.get(token).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!(%connection_id, "unknown session token");
                return None;
            }
            Err(e) => {
                tracing::warn!(%connection_id, error = %e, "session lookup failed");
                return None;
            }
        };

        if record.ip != source_ip || Some(record.user_agent.as_str()) != handshake.user_agent.as_deref() {
            tracing::info!(
                %connection_id,
                username = %record.username,
                source_ip,
                "session does not match client address or user agent"
            );
            return None;
        }

        let classification = match self.users.get_user(&record.username).await {
            Ok(Some(user)) => user.classification,
            Ok(None) => {
                tracing::warn!(%connection_id, username = %record.username, "user record missing, classification unresolved");
                None
            }
            Err(e) => {
                tracing::warn!(%connection_id, username = %record.username, error = %e, "user lookup failed");
                return None;
            }
        };

        Some(ConnectionIdentity::authenticated(
            connection_id.clone(),
            record.username,
            classification,
            source_ip,
        ))
    }
}
