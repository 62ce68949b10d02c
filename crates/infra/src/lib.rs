//! Infrastructure layer: credential storage, identity services and
//! background workers.

pub mod services;
pub mod store;
pub mod workers;

pub use services::{
    AuditRecorder, AuthOutcome, BootstrapGate, DirectoryService, IdentityResolver, IssuedSession,
    LoginInput, NewPrincipal, PrincipalPatch, ServiceError, SessionService, SessionSettings,
    SignupInput, seed_system_role,
};
pub use store::{
    Change, CredentialStore, InMemoryCredentialStore, ListQuery, Page, Pagination,
    PostgresCredentialStore, PrincipalUpdate, StoreError,
};
pub use workers::{SessionSweeper, WorkerHandle};
