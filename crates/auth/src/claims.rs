use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use keystone_core::PrincipalId;

/// Access-token claims.
///
/// Only identity is carried; permissions are resolved from the store on every
/// request so role changes take effect immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject / principal identifier.
    pub sub: PrincipalId,

    /// Issued-at, seconds since the epoch.
    pub iat: i64,

    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (iat is in the future)")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,
}

impl AccessClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Tolerated clock skew, in seconds, when a token's `iat` is ahead of `now`.
pub const IAT_LEEWAY_SECS: i64 = 5;

/// Validate the claim time window against `now`.
///
/// `iat` may be up to [`IAT_LEEWAY_SECS`] in the future; expiry has no leeway.
pub fn validate_claims(claims: &AccessClaims, now: DateTime<Utc>) -> Result<(), ClaimsError> {
    if claims.exp <= claims.iat {
        return Err(ClaimsError::InvalidTimeWindow);
    }
    let now = now.timestamp();
    if now + IAT_LEEWAY_SECS < claims.iat {
        return Err(ClaimsError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(ClaimsError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(iat: DateTime<Utc>, ttl: Duration) -> AccessClaims {
        AccessClaims {
            sub: PrincipalId::new(),
            iat: iat.timestamp(),
            exp: (iat + ttl).timestamp(),
        }
    }

    #[test]
    fn accepts_inside_window() {
        let now = Utc::now();
        assert_eq!(validate_claims(&claims(now, Duration::minutes(15)), now), Ok(()));
    }

    #[test]
    fn rejects_at_exact_expiry() {
        let now = Utc::now();
        let c = claims(now, Duration::minutes(15));
        assert_eq!(
            validate_claims(&c, now + Duration::minutes(15)),
            Err(ClaimsError::Expired)
        );
    }

    #[test]
    fn tolerates_small_clock_skew_on_iat() {
        let now = Utc::now();
        let skewed = claims(now + Duration::seconds(1), Duration::minutes(15));
        assert_eq!(validate_claims(&skewed, now), Ok(()));

        let edge = claims(now + Duration::seconds(IAT_LEEWAY_SECS), Duration::minutes(15));
        assert_eq!(validate_claims(&edge, now), Ok(()));

        let ahead = claims(now + Duration::seconds(IAT_LEEWAY_SECS + 1), Duration::minutes(15));
        assert_eq!(validate_claims(&ahead, now), Err(ClaimsError::NotYetValid));
    }

    #[test]
    fn rejects_future_and_inverted_windows() {
        let now = Utc::now();
        assert_eq!(
            validate_claims(&claims(now + Duration::minutes(1), Duration::minutes(15)), now),
            Err(ClaimsError::NotYetValid)
        );
        assert_eq!(
            validate_claims(&claims(now, Duration::zero()), now),
            Err(ClaimsError::InvalidTimeWindow)
        );
    }
}
