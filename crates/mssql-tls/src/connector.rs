//! TLS connector.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::TlsConfig;
use crate::error::TlsError;
use crate::prelogin_stream::PreloginFramedStream;

/// Certificate verifier that accepts any server certificate.
///
/// Only used for non-Azure hosts with trust-server-certificate enabled.
#[derive(Debug)]
struct TrustingVerifier;

impl ServerCertVerifier for TrustingVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// TLS connector applying the on-premises/Azure verification policy.
pub struct TlsConnector {
    config: TlsConfig,
}

impl TlsConnector {
    /// Create a connector with the given configuration.
    #[must_use]
    pub fn new(config: TlsConfig) -> Self {
        Self { config }
    }

    fn build_client_config(&self, host: &str) -> ClientConfig {
        if self.config.effective_trust(host) {
            tracing::warn!(
                host,
                "certificate verification disabled (trust server certificate)"
            );
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(TrustingVerifier))
                .with_no_client_auth()
        } else {
            let root_store = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        }
    }

    /// Perform the TLS handshake tunneled through TDS PRELOGIN packets.
    ///
    /// The wrapper frames handshake records as PRELOGIN packets. When the
    /// handshake completes, the wrapper switches to pass-through and all
    /// further traffic is raw TLS records.
    pub async fn connect_via_prelogin<S>(
        &self,
        stream: S,
        host: &str,
    ) -> Result<TlsStream<PreloginFramedStream<S>>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let client_config = self.build_client_config(host);
        let connector = TokioTlsConnector::from(Arc::new(client_config));

        let server_name = self.config.server_name.as_deref().unwrap_or(host);
        let dns_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TlsError::InvalidServerName(server_name.to_string()))?;

        tracing::debug!(host = %server_name, "starting PRELOGIN-tunneled TLS handshake");

        let wrapped = PreloginFramedStream::new(stream);
        let mut tls_stream = connector
            .connect(dns_name, wrapped)
            .await
            .map_err(|e| TlsError::HandshakeFailed(e.to_string()))?;

        // Handshake done: drop the PRELOGIN framing.
        tls_stream.get_mut().0.handshake_complete();

        tracing::debug!("TLS handshake completed");
        Ok(tls_stream)
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusting_config_builds() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let connector = TlsConnector::new(TlsConfig::new());
        let config = connector.build_client_config("onprem-host");
        // The trusting verifier path carries no root store.
        drop(config);
    }

    #[test]
    fn azure_config_uses_webpki_roots() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let connector = TlsConnector::new(TlsConfig::new().trust_server_certificate(true));
        let config = connector.build_client_config("x.database.windows.net");
        drop(config);
    }
}
