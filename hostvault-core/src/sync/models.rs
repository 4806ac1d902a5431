//! Wire types for the sync service.
//!
//! The service stores one opaque encrypted container per account and only
//! ever sees its metadata in the clear. Endpoints consumed:
//!
//! - `POST /v1/auth/login`, `POST /v1/auth/register`, `POST /v1/auth/totp`,
//!   `GET /v1/auth/status` returning [`AuthResponse`]
//! - `GET /v1/vault/meta` returning [`RemoteVaultMeta`] (404 when nothing
//!   was ever uploaded)
//! - `GET /v1/vault` and `PUT /v1/vault` carrying [`VaultTransfer`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vault::model::{base64_bytes, RevisionId};

/// Metadata of the vault held by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteVaultMeta {
    pub revision: u64,
    pub device_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

impl RemoteVaultMeta {
    pub fn revision_id(&self) -> RevisionId {
        RevisionId {
            revision: self.revision,
            device_id: self.device_id,
        }
    }
}

/// Full vault transfer: metadata plus the encrypted container exactly as
/// the codec produced it. The server never sees plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultTransfer {
    pub revision: u64,
    pub device_id: Uuid,
    pub updated_at: DateTime<Utc>,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

impl VaultTransfer {
    pub fn metadata(&self) -> RemoteVaultMeta {
        RemoteVaultMeta {
            revision: self.revision,
            device_id: self.device_id,
            updated_at: self.updated_at,
        }
    }
}

/// Server verdict on an authentication step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Ok,
    TotpRequired,
    PendingApproval,
    Denied,
}

/// Response body shared by all authentication endpoints. Which optional
/// fields are present depends on `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub status: AuthStatus,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// TOTP challenge to echo back with the code.
    #[serde(default)]
    pub challenge: Option<String>,
    /// Ticket for polling a pending approval.
    #[serde(default)]
    pub ticket: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct TotpRequest<'a> {
    pub challenge: &'a str,
    pub code: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_ciphertext_travels_as_base64() {
        let transfer = VaultTransfer {
            revision: 4,
            device_id: Uuid::new_v4(),
            updated_at: Utc::now(),
            ciphertext: vec![0x48, 0x56, 0x4C, 0x54, 0x00],
        };

        let json = serde_json::to_value(&transfer).unwrap();
        assert_eq!(json["ciphertext"], "SFZMVAA=");

        let back: VaultTransfer = serde_json::from_value(json).unwrap();
        assert_eq!(back, transfer);
        assert_eq!(back.metadata().revision, 4);
    }

    #[test]
    fn auth_response_tolerates_missing_optionals() {
        let response: AuthResponse =
            serde_json::from_str(r#"{"status":"totp_required","challenge":"c1"}"#).unwrap();
        assert_eq!(response.status, AuthStatus::TotpRequired);
        assert_eq!(response.challenge.as_deref(), Some("c1"));
        assert!(response.token.is_none());
    }
}
