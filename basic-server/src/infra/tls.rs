//! TLS material loading for the HTTPS listener.

use axum_server::tls_rustls::RustlsConfig;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Certificate file not found: {0}")]
    CertificateNotFound(PathBuf),

    #[error("Private key file not found: {0}")]
    PrivateKeyNotFound(PathBuf),

    #[error("Failed to load TLS configuration: {0}")]
    Load(#[from] std::io::Error),
}

/// Build the rustls acceptor config from PEM files.
pub async fn load_rustls_config(
    cert_path: &Path,
    key_path: &Path,
) -> Result<RustlsConfig, TlsError> {
    if !cert_path.exists() {
        return Err(TlsError::CertificateNotFound(cert_path.to_path_buf()));
    }
    if !key_path.exists() {
        return Err(TlsError::PrivateKeyNotFound(key_path.to_path_buf()));
    }

    let config = RustlsConfig::from_pem_file(cert_path, key_path).await?;
    info!(cert = %cert_path.display(), "TLS configuration loaded");
    Ok(config)
}
