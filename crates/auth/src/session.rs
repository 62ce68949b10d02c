use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use keystone_core::{PrincipalId, SessionId};

use crate::token::RefreshTokenHash;

/// Client device metadata captured at session creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Revoked,
    Expired,
}

/// Server-side record of a refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSession {
    pub id: SessionId,
    pub principal_id: PrincipalId,
    pub token_hash: RefreshTokenHash,
    pub device: DeviceInfo,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshSession {
    pub fn new(principal_id: PrincipalId, token_hash: RefreshTokenHash, device: DeviceInfo, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            principal_id,
            token_hash,
            device,
            expires_at: now + ttl,
            revoked_at: None,
            created_at: now,
        }
    }

    /// Revocation wins over expiry.
    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        if self.revoked_at.is_some() {
            SessionState::Revoked
        } else if now >= self.expires_at {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == SessionState::Active
    }
}
