//! `keystone-auth` — pure authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod audit;
pub mod authorize;
pub mod claims;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod session;
pub mod token;

pub use audit::{AuditEntry, AuditMeta, AuditRecord};
pub use authorize::{AuthzError, PermissionSet, ResolvedIdentity, authorize};
pub use claims::{AccessClaims, ClaimsError, validate_claims};
pub use password::{HashedPassword, PasswordError, PasswordHasherService};
pub use permissions::Permission;
pub use principal::{Principal, Profile};
pub use roles::{Role, RoleDraft, RoleError, RolePatch, SUPER_ADMIN};
pub use session::{DeviceInfo, RefreshSession, SessionState};
pub use token::{AccessTokenSigner, RefreshSecret, RefreshTokenHash, RefreshTokenHasher, TokenError};
