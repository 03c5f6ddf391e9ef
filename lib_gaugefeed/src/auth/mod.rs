//! # Authentication
//!
//! Bearer token parsing and the provider seam used by binaries.

pub mod credential;

pub use credential::{unsigned_token, Credential, CredentialProvider, EnvCredentials, StaticCredentials};
