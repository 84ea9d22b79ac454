//! Per-site credentials used by download jobs.

pub mod naming;
pub mod store;

pub use store::{
    AuthError, CredentialEntry, CredentialKind, CredentialStatus, CredentialStore,
    Login, ResolvedCredentials, normalize_domain,
};
