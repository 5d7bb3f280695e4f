//! TLS configuration and the Azure endpoint verification policy.

/// Hostname suffixes of managed Azure SQL endpoints.
///
/// Connections to these hosts always verify the server certificate with
/// real hostname matching, regardless of the trust-server-certificate
/// setting: the endpoints are public and a forged certificate is a real
/// attack, unlike a self-signed on-premises install.
const AZURE_SUFFIXES: &[&str] = &[
    ".database.windows.net",
    ".datawarehouse.fabric.microsoft.com",
    ".sql.azuresynapse.net",
    ".pbidedicated.windows.net",
];

/// Whether a hostname belongs to a managed Azure SQL service.
#[must_use]
pub fn is_azure_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    AZURE_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
}

/// TLS connector configuration.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Accept any server certificate (on-premises default).
    pub trust_server_certificate: bool,
    /// Override the SNI/verification hostname.
    pub server_name: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            trust_server_certificate: true,
            server_name: None,
        }
    }
}

impl TlsConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to skip certificate verification.
    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Override the hostname used for SNI and verification.
    #[must_use]
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Whether verification may actually be skipped for `host`.
    ///
    /// Azure endpoints force verification even when
    /// `trust_server_certificate` is set.
    #[must_use]
    pub fn effective_trust(&self, host: &str) -> bool {
        self.trust_server_certificate && !is_azure_host(host)
    }
}
