//! HTTP client for the account service, with an explicit auth state machine.
//!
//! Every authentication step is a transition: operations check the current
//! state before touching the network, and a response only lands if the
//! session was not torn down while the request was in flight. Logout always
//! wins over a late response.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::sync::models::{
    AuthResponse, AuthStatus, LoginRequest, RegisterRequest, RemoteVaultMeta, TotpRequest,
    VaultTransfer,
};
use crate::sync::transport::VaultTransport;
use crate::sync::{Result, SyncError};

/// Authentication lifecycle of the sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// No server configured.
    Disconnected,
    /// Server configured, not signed in.
    Idle,
    /// An authentication round trip is in flight.
    Connecting,
    /// Signed in with a usable session token.
    Authenticated,
    /// Server demands a TOTP code for the held challenge.
    TotpRequired { challenge: String },
    /// Registration awaits approval from an existing device.
    PendingApproval { ticket: String },
    /// Last attempt failed; `configure` starts over.
    Error { reason: String },
}

impl AuthState {
    pub fn name(&self) -> &'static str {
        match self {
            AuthState::Disconnected => "disconnected",
            AuthState::Idle => "idle",
            AuthState::Connecting => "connecting",
            AuthState::Authenticated => "authenticated",
            AuthState::TotpRequired { .. } => "totp_required",
            AuthState::PendingApproval { .. } => "pending_approval",
            AuthState::Error { .. } => "error",
        }
    }
}

/// Bearer token with its server-side expiry. Serializable so the CLI can
/// cache it between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[derive(Debug)]
struct Session {
    state: AuthState,
    token: Option<SessionToken>,
    base_url: Option<String>,
}

/// Client for the account service. Holds the session state machine and
/// implements [`VaultTransport`] for the vault endpoints.
pub struct SyncClient {
    http: reqwest::Client,
    session: RwLock<Session>,
}

impl SyncClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            session: RwLock::new(Session {
                state: AuthState::Disconnected,
                token: None,
                base_url: None,
            }),
        })
    }

    pub async fn state(&self) -> AuthState {
        self.session.read().await.state.clone()
    }

    pub async fn session_token(&self) -> Option<SessionToken> {
        self.session.read().await.token.clone()
    }

    pub async fn base_url(&self) -> Option<String> {
        self.session.read().await.base_url.clone()
    }

    /// Point the client at a server. Allowed from `Disconnected` and from
    /// `Error`, which is how a failed attempt is retried. Any previous
    /// token is dropped.
    pub async fn configure(&self, base_url: &str) -> Result<()> {
        let mut session = self.session.write().await;
        match session.state {
            AuthState::Disconnected | AuthState::Error { .. } => {}
            ref other => {
                return Err(SyncError::InvalidTransition {
                    op: "configure",
                    state: other.name(),
                })
            }
        }
        session.base_url = Some(base_url.trim_end_matches('/').to_string());
        session.token = None;
        session.state = AuthState::Idle;
        Ok(())
    }

    /// Sign in with account credentials.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthState> {
        let base = self.begin_from_idle("login").await?;
        let request = LoginRequest { email, password };
        let result = self.post_auth(&base, "/v1/auth/login", &request).await;
        self.finish_auth(result).await
    }

    /// Create an account. New devices may land in `PendingApproval` until
    /// an existing device confirms them.
    pub async fn register(&self, email: &str, password: &str) -> Result<AuthState> {
        let base = self.begin_from_idle("register").await?;
        let request = RegisterRequest { email, password };
        let result = self.post_auth(&base, "/v1/auth/register", &request).await;
        self.finish_auth(result).await
    }

    /// Answer the TOTP challenge issued by a previous login step.
    pub async fn verify_totp(&self, code: &str) -> Result<AuthState> {
        let (base, challenge) = {
            let mut session = self.session.write().await;
            let challenge = match &session.state {
                AuthState::TotpRequired { challenge } => challenge.clone(),
                other => {
                    return Err(SyncError::InvalidTransition {
                        op: "verify_totp",
                        state: other.name(),
                    })
                }
            };
            let base = session.base_url.clone().ok_or(SyncError::NotConfigured)?;
            session.state = AuthState::Connecting;
            (base, challenge)
        };

        let request = TotpRequest {
            challenge: &challenge,
            code,
        };
        let result = self.post_auth(&base, "/v1/auth/totp", &request).await;
        self.finish_auth(result).await
    }

    /// Poll a pending approval. The server echoes the ticket until an
    /// existing device decides.
    pub async fn refresh_auth_status(&self) -> Result<AuthState> {
        let (base, ticket) = {
            let mut session = self.session.write().await;
            let ticket = match &session.state {
                AuthState::PendingApproval { ticket } => ticket.clone(),
                other => {
                    return Err(SyncError::InvalidTransition {
                        op: "refresh_auth_status",
                        state: other.name(),
                    })
                }
            };
            let base = session.base_url.clone().ok_or(SyncError::NotConfigured)?;
            session.state = AuthState::Connecting;
            (base, ticket)
        };

        let result = async {
            let response = self
                .http
                .get(format!("{}/v1/auth/status", base))
                .query(&[("ticket", ticket.as_str())])
                .send()
                .await?;
            let response = Self::check_status(response).await?;
            response
                .json::<AuthResponse>()
                .await
                .map_err(|err| SyncError::Protocol(err.to_string()))
        }
        .await;

        self.finish_auth(result).await
    }

    /// Drop the session locally. Always allowed; the token is simply
    /// forgotten, the server is not contacted.
    pub async fn logout(&self) {
        let mut session = self.session.write().await;
        session.state = AuthState::Disconnected;
        session.token = None;
        session.base_url = None;
        info!("Logged out, session cleared locally");
    }

    /// Resume a previous session from a cached token without a login round
    /// trip. Expiry is checked when the token is first used, so a stale
    /// cache still restores and then surfaces `TokenExpired`.
    pub async fn restore_session(&self, base_url: &str, token: SessionToken) -> Result<AuthState> {
        let mut session = self.session.write().await;
        if !matches!(session.state, AuthState::Disconnected) {
            return Err(SyncError::InvalidTransition {
                op: "restore_session",
                state: session.state.name(),
            });
        }
        if token.is_expired() {
            warn!("Restored session token is already expired");
        }
        session.base_url = Some(base_url.trim_end_matches('/').to_string());
        session.token = Some(token);
        session.state = AuthState::Authenticated;
        Ok(session.state.clone())
    }

    // --- State machine internals ---

    async fn begin_from_idle(&self, op: &'static str) -> Result<String> {
        let mut session = self.session.write().await;
        match session.state {
            AuthState::Idle => {}
            ref other => {
                return Err(SyncError::InvalidTransition {
                    op,
                    state: other.name(),
                })
            }
        }
        let base = session.base_url.clone().ok_or(SyncError::NotConfigured)?;
        session.state = AuthState::Connecting;
        Ok(base)
    }

    async fn finish_auth(&self, result: Result<AuthResponse>) -> Result<AuthState> {
        match result {
            Ok(response) => self.apply_auth_response(response).await,
            Err(err) => {
                let mut session = self.session.write().await;
                if !matches!(session.state, AuthState::Disconnected) {
                    session.state = AuthState::Error {
                        reason: err.to_string(),
                    };
                }
                Err(err)
            }
        }
    }

    async fn apply_auth_response(&self, response: AuthResponse) -> Result<AuthState> {
        let mut session = self.session.write().await;

        // A logout while the request was in flight wins; the late response
        // must not resurrect the session.
        if matches!(session.state, AuthState::Disconnected) {
            debug!("Discarding auth response that arrived after logout");
            return Ok(AuthState::Disconnected);
        }

        match response.status {
            AuthStatus::Ok => match (response.token, response.expires_at) {
                (Some(token), Some(expires_at)) => {
                    session.token = Some(SessionToken { token, expires_at });
                    session.state = AuthState::Authenticated;
                    info!("Authenticated with sync service");
                }
                _ => {
                    return Self::protocol_failure(
                        &mut session,
                        "ok response without token and expiry",
                    )
                }
            },
            AuthStatus::TotpRequired => match response.challenge {
                Some(challenge) => session.state = AuthState::TotpRequired { challenge },
                None => {
                    return Self::protocol_failure(
                        &mut session,
                        "totp_required response without a challenge",
                    )
                }
            },
            AuthStatus::PendingApproval => match response.ticket {
                Some(ticket) => session.state = AuthState::PendingApproval { ticket },
                None => {
                    return Self::protocol_failure(
                        &mut session,
                        "pending_approval response without a ticket",
                    )
                }
            },
            AuthStatus::Denied => {
                let reason = response
                    .reason
                    .unwrap_or_else(|| "Authentication denied".to_string());
                warn!(%reason, "authentication denied by server");
                session.state = AuthState::Error {
                    reason: reason.clone(),
                };
                return Err(SyncError::AuthRejected(reason));
            }
        }

        Ok(session.state.clone())
    }

    fn protocol_failure(session: &mut Session, what: &str) -> Result<AuthState> {
        session.state = AuthState::Error {
            reason: what.to_string(),
        };
        Err(SyncError::Protocol(what.to_string()))
    }

    // --- HTTP internals ---

    async fn post_auth<B: Serialize>(
        &self,
        base: &str,
        path: &str,
        body: &B,
    ) -> Result<AuthResponse> {
        let response = self
            .http
            .post(format!("{}{}", base, path))
            .json(body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        response
            .json::<AuthResponse>()
            .await
            .map_err(|err| SyncError::Protocol(err.to_string()))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            Err(SyncError::AuthRejected(message))
        } else {
            Err(SyncError::Remote {
                status: status.as_u16(),
                message,
            })
        }
    }

    /// Base URL and bearer token for vault endpoints. Fails without a
    /// network round trip when unauthenticated or expired.
    async fn bearer(&self) -> Result<(String, String)> {
        let session = self.session.read().await;
        if !matches!(session.state, AuthState::Authenticated) {
            return Err(SyncError::NotAuthenticated);
        }
        let token = session.token.as_ref().ok_or(SyncError::NotAuthenticated)?;
        if token.is_expired() {
            return Err(SyncError::TokenExpired);
        }
        let base = session.base_url.clone().ok_or(SyncError::NotConfigured)?;
        Ok((base, token.token.clone()))
    }
}

#[async_trait]
impl VaultTransport for SyncClient {
    async fn fetch_metadata(&self) -> Result<Option<RemoteVaultMeta>> {
        let (base, token) = self.bearer().await?;
        let response = self
            .http
            .get(format!("{}/v1/vault/meta", base))
            .bearer_auth(&token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check_status(response).await?;
        let meta = response
            .json::<RemoteVaultMeta>()
            .await
            .map_err(|err| SyncError::Protocol(err.to_string()))?;
        Ok(Some(meta))
    }

    async fn upload(&self, transfer: VaultTransfer) -> Result<RemoteVaultMeta> {
        let (base, token) = self.bearer().await?;
        let response = self
            .http
            .put(format!("{}/v1/vault", base))
            .bearer_auth(&token)
            .json(&transfer)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        response
            .json::<RemoteVaultMeta>()
            .await
            .map_err(|err| SyncError::Protocol(err.to_string()))
    }

    async fn download(&self) -> Result<VaultTransfer> {
        let (base, token) = self.bearer().await?;
        let response = self
            .http
            .get(format!("{}/v1/vault", base))
            .bearer_auth(&token)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        response
            .json::<VaultTransfer>()
            .await
            .map_err(|err| SyncError::Protocol(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn ok_response(token: &str) -> AuthResponse {
        AuthResponse {
            status: AuthStatus::Ok,
            token: Some(token.to_string()),
            expires_at: Some(Utc::now() + ChronoDuration::hours(12)),
            challenge: None,
            ticket: None,
            reason: None,
        }
    }

    fn bare_response(status: AuthStatus) -> AuthResponse {
        AuthResponse {
            status,
            token: None,
            expires_at: None,
            challenge: None,
            ticket: None,
            reason: None,
        }
    }

    #[tokio::test]
    async fn login_requires_a_configured_server() {
        let client = SyncClient::new().unwrap();
        let err = client.login("a@b.example", "pw").await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidTransition {
                op: "login",
                state: "disconnected",
            }
        ));
    }

    #[tokio::test]
    async fn totp_outside_a_challenge_is_rejected() {
        let client = SyncClient::new().unwrap();
        client.configure("https://sync.example").await.unwrap();
        assert!(matches!(
            client.verify_totp("000000").await,
            Err(SyncError::InvalidTransition {
                op: "verify_totp",
                state: "idle",
            })
        ));
    }

    #[tokio::test]
    async fn configure_trims_trailing_slash_and_is_idle_once() {
        let client = SyncClient::new().unwrap();
        client.configure("https://sync.example/").await.unwrap();
        assert_eq!(client.base_url().await.as_deref(), Some("https://sync.example"));
        assert_eq!(client.state().await, AuthState::Idle);

        // Reconfiguring mid-session requires a logout first.
        assert!(matches!(
            client.configure("https://other.example").await,
            Err(SyncError::InvalidTransition {
                op: "configure",
                state: "idle",
            })
        ));
    }

    #[tokio::test]
    async fn totp_then_ok_reaches_authenticated() {
        let client = SyncClient::new().unwrap();
        client.configure("https://sync.example").await.unwrap();

        let mut challenge = bare_response(AuthStatus::TotpRequired);
        challenge.challenge = Some("c-17".to_string());
        let state = client.apply_auth_response(challenge).await.unwrap();
        assert_eq!(
            state,
            AuthState::TotpRequired {
                challenge: "c-17".to_string()
            }
        );

        let state = client.apply_auth_response(ok_response("tok")).await.unwrap();
        assert_eq!(state, AuthState::Authenticated);
        assert_eq!(client.session_token().await.unwrap().token, "tok");
    }

    #[tokio::test]
    async fn denied_lands_in_error_state_and_configure_retries() {
        let client = SyncClient::new().unwrap();
        client.configure("https://sync.example").await.unwrap();

        let mut denied = bare_response(AuthStatus::Denied);
        denied.reason = Some("bad credentials".to_string());
        let err = client.apply_auth_response(denied).await.unwrap_err();
        assert!(matches!(err, SyncError::AuthRejected(reason) if reason == "bad credentials"));
        assert_eq!(client.state().await.name(), "error");

        // Error is a retryable dead end.
        client.configure("https://sync.example").await.unwrap();
        assert_eq!(client.state().await, AuthState::Idle);
    }

    #[tokio::test]
    async fn ok_without_token_is_a_protocol_error() {
        let client = SyncClient::new().unwrap();
        client.configure("https://sync.example").await.unwrap();

        let err = client
            .apply_auth_response(bare_response(AuthStatus::Ok))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert_eq!(client.state().await.name(), "error");
    }

    #[tokio::test]
    async fn logout_wins_over_a_late_auth_response() {
        let client = SyncClient::new().unwrap();
        client.configure("https://sync.example").await.unwrap();
        client.logout().await;

        let state = client.apply_auth_response(ok_response("stale")).await.unwrap();
        assert_eq!(state, AuthState::Disconnected);
        assert_eq!(client.state().await, AuthState::Disconnected);
        assert!(client.session_token().await.is_none());
    }

    #[tokio::test]
    async fn restore_session_skips_the_login_round_trip() {
        let client = SyncClient::new().unwrap();
        let token = SessionToken {
            token: "cached".to_string(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        };
        let state = client
            .restore_session("https://sync.example/", token)
            .await
            .unwrap();
        assert_eq!(state, AuthState::Authenticated);
        assert_eq!(client.base_url().await.as_deref(), Some("https://sync.example"));

        // A second restore needs a logout in between.
        let again = SessionToken {
            token: "cached2".to_string(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        };
        assert!(matches!(
            client.restore_session("https://sync.example", again).await,
            Err(SyncError::InvalidTransition {
                op: "restore_session",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn expired_token_fails_before_any_network_call() {
        let client = SyncClient::new().unwrap();
        let stale = SessionToken {
            token: "stale".to_string(),
            expires_at: Utc::now() - ChronoDuration::minutes(5),
        };
        client
            .restore_session("https://sync.example", stale)
            .await
            .unwrap();

        // bearer() rejects the expired token before building a request, so
        // this does not touch the (nonexistent) server.
        assert!(matches!(
            client.fetch_metadata().await,
            Err(SyncError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn logout_from_any_state_disconnects() {
        let client = SyncClient::new().unwrap();
        client.configure("https://sync.example").await.unwrap();
        client.logout().await;
        assert_eq!(client.state().await, AuthState::Disconnected);
        assert!(client.base_url().await.is_none());

        // Unauthenticated transport use is refused locally.
        assert!(matches!(
            client.download().await,
            Err(SyncError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn unreachable_server_lands_in_error_state() {
        let client = SyncClient::new().unwrap();
        // Nothing listens on the discard port.
        client.configure("http://127.0.0.1:9").await.unwrap();
        assert!(client.login("a@b.example", "pw").await.is_err());
        assert_eq!(client.state().await.name(), "error");
    }
}
