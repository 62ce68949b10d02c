use chrono::{DateTime, Utc};
use serde::Serialize;

use keystone_core::{DomainError, DomainResult, Email, PrincipalId, RoleId};

use crate::password::HashedPassword;

pub const MIN_NAME_LEN: usize = 2;
pub const MIN_PHONE_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 6;

/// An authenticated account.
///
/// The password hash is never serialised; snapshots and API views built from
/// this type are safe to emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    #[serde(rename = "_id")]
    pub id: PrincipalId,
    pub name: String,
    pub email: Email,
    pub phone: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: HashedPassword,
    pub is_active: bool,
    pub role_ids: Vec<RoleId>,
    pub created_by: Option<PrincipalId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Principal {
    pub fn new(profile: Profile, password_hash: HashedPassword, role_ids: Vec<RoleId>, created_by: Option<PrincipalId>, now: DateTime<Utc>) -> DomainResult<Self> {
        let role_ids = validate_role_ids(role_ids)?;
        Ok(Self {
            id: PrincipalId::new(),
            name: profile.name,
            email: profile.email,
            phone: profile.phone,
            password_hash,
            is_active: true,
            role_ids,
            created_by,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace the role set. The "at least one role" invariant is enforced here.
    pub fn assign_roles(&mut self, role_ids: Vec<RoleId>, now: DateTime<Utc>) -> DomainResult<()> {
        self.role_ids = validate_role_ids(role_ids)?;
        self.updated_at = now;
        Ok(())
    }

    pub fn holds(&self, role: RoleId) -> bool {
        self.role_ids.contains(&role)
    }

    /// JSON snapshot for audit records.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Validated profile fields shared by signup and privileged creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub email: Email,
    pub phone: Option<String>,
}

impl Profile {
    /// `phone_required` is true for bootstrap signup, where a contact number is mandatory.
    pub fn parse(name: &str, email: &str, phone: Option<&str>, phone_required: bool) -> DomainResult<Self> {
        let name = validate_name(name)?;
        let email = Email::parse(email)?;
        let phone = match phone.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => Some(validate_phone(p)?),
            None if phone_required => {
                return Err(DomainError::validation("phone must be at least 3 characters"));
            }
            None => None,
        };
        Ok(Self { name, email, phone })
    }
}

pub fn validate_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.chars().count() < MIN_NAME_LEN {
        return Err(DomainError::validation("name must be at least 2 characters"));
    }
    Ok(name.to_string())
}

pub fn validate_phone(phone: &str) -> DomainResult<String> {
    let phone = phone.trim();
    if phone.chars().count() < MIN_PHONE_LEN {
        return Err(DomainError::validation("phone must be at least 3 characters"));
    }
    Ok(phone.to_string())
}

pub fn validate_password(password: &str) -> DomainResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(DomainError::validation("password must be at least 6 characters"));
    }
    Ok(())
}

fn validate_role_ids(mut role_ids: Vec<RoleId>) -> DomainResult<Vec<RoleId>> {
    let mut seen = Vec::with_capacity(role_ids.len());
    role_ids.retain(|id| {
        if seen.contains(id) {
            false
        } else {
            seen.push(*id);
            true
        }
    });
    if role_ids.is_empty() {
        return Err(DomainError::invariant("principal must hold at least one role"));
    }
    Ok(role_ids)
}
