//! # mssql-tls
//!
//! TLS support for TDS connections.
//!
//! In TDS 7.x the TLS handshake is tunneled inside PRELOGIN packets: the
//! handshake records are wrapped in TDS packet framing until the session
//! keys are established, after which raw TLS records flow directly.
//! [`PreloginFramedStream`] implements that wrapping;
//! [`TlsConnector::connect_via_prelogin`] drives the handshake through it.
//!
//! Certificate verification policy: on-premises servers default to
//! "trust server certificate"; Azure endpoints always verify against the
//! webpki roots with standard hostname matching.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;
pub mod prelogin_stream;

pub use config::{TlsConfig, is_azure_host};
pub use connector::TlsConnector;
pub use error::TlsError;
pub use prelogin_stream::PreloginFramedStream;
pub use tokio_rustls::client::TlsStream;
