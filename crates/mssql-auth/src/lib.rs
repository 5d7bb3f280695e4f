//! # mssql-auth
//!
//! Credential handling for SQL Server connections.
//!
//! Two authentication methods are supported: SQL Server authentication
//! (username/password obfuscated inside LOGIN7) and Azure AD federated
//! authentication carrying a pre-acquired access token through the FEDAUTH
//! feature extension. Token acquisition itself happens outside this crate;
//! a [`TokenSource`] callback supplies fresh tokens when one expires.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod credentials;
pub mod error;

pub use credentials::{AccessToken, Credentials, TokenSource};
pub use error::AuthError;
