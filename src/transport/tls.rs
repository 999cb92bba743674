// TLS material and per-engine TLS settings

use crate::db::config::{TlsConfig, TlsMode};
use crate::db::error::DbError;
use native_tls::{Certificate, Identity, TlsConnector};
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Failed to read {what} from {path}: {source}")]
    Read {
        what: &'static str,
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid CA certificate: {0}")]
    InvalidCaCert(String),

    #[error("Invalid client identity: {0}")]
    InvalidClientIdentity(String),

    #[error("TLS configuration error: {0}")]
    Configuration(String),
}

impl From<TlsError> for DbError {
    fn from(err: TlsError) -> Self {
        DbError::ConnectionError(err.to_string())
    }
}

fn read(what: &'static str, path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Read {
        what,
        path: path.display().to_string(),
        source,
    })
}

/// native-tls connector for `tls`. Used by the PostgreSQL driver for every mode;
/// `disable` never negotiates, so the connector is simply unused.
pub fn native_connector(tls: &TlsConfig) -> Result<TlsConnector, TlsError> {
    let mut builder = TlsConnector::builder();

    match tls.mode {
        TlsMode::VerifyFull => {}
        // Without a CA there is nothing to verify against; with one, verify the chain only
        TlsMode::Require if tls.ca_cert_path.is_some() => {
            builder.danger_accept_invalid_hostnames(true);
        }
        TlsMode::Disable | TlsMode::Prefer | TlsMode::Require => {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
    }

    if let Some(ca_path) = &tls.ca_cert_path {
        let pem = read("CA certificate", ca_path)?;
        let cert = Certificate::from_pem(&pem).map_err(|e| TlsError::InvalidCaCert(e.to_string()))?;
        builder.add_root_certificate(cert);
    }

    if let Some(identity) = client_identity(tls)? {
        builder.identity(identity);
    }

    builder
        .build()
        .map_err(|e| TlsError::Configuration(e.to_string()))
}

/// Client identity: PEM cert + PKCS#8 key, or a PKCS#12 bundle when no key is given
fn client_identity(tls: &TlsConfig) -> Result<Option<Identity>, TlsError> {
    let Some(cert_path) = &tls.client_cert_path else {
        return Ok(None);
    };
    let cert = read("client certificate", cert_path)?;

    let identity = match &tls.client_key_path {
        Some(key_path) => {
            let key = read("client key", key_path)?;
            Identity::from_pkcs8(&cert, &key)
        }
        None => Identity::from_pkcs12(&cert, ""),
    }
    .map_err(|e| TlsError::InvalidClientIdentity(e.to_string()))?;

    Ok(Some(identity))
}

pub fn postgres_ssl_mode(mode: TlsMode) -> tokio_postgres::config::SslMode {
    use tokio_postgres::config::SslMode;
    match mode {
        TlsMode::Disable => SslMode::Disable,
        TlsMode::Prefer => SslMode::Prefer,
        TlsMode::Require | TlsMode::VerifyFull => SslMode::Require,
    }
}

/// MySQL TLS options. `None` means plaintext; `prefer` is plaintext too, since
/// mysql_async cannot fall back after a failed TLS upgrade.
pub fn mysql_ssl_opts(tls: &TlsConfig, domain: &str) -> Result<Option<mysql_async::SslOpts>, TlsError> {
    use mysql_async::{ClientIdentity, SslOpts};

    let mut opts = match tls.mode {
        TlsMode::Disable | TlsMode::Prefer => return Ok(None),
        TlsMode::Require => SslOpts::default()
            .with_danger_accept_invalid_certs(tls.ca_cert_path.is_none())
            .with_danger_skip_domain_validation(true),
        TlsMode::VerifyFull => SslOpts::default()
            .with_danger_tls_hostname_override(Some(domain.to_string())),
    };

    if let Some(ca_path) = &tls.ca_cert_path {
        opts = opts.with_root_certs(vec![ca_path.clone().into()]);
    }

    if let Some(cert_path) = &tls.client_cert_path {
        if tls.client_key_path.is_some() {
            return Err(TlsError::Configuration(
                "MySQL client certificates must be a PKCS#12 bundle given without a key".to_string(),
            ));
        }
        opts = opts.with_client_identity(Some(ClientIdentity::new(cert_path.clone().into())));
    }

    Ok(Some(opts))
}

/// Apply TLS settings to a tiberius config
pub fn apply_mssql_tls(config: &mut tiberius::Config, tls: &TlsConfig) {
    use tiberius::EncryptionLevel;

    match tls.mode {
        TlsMode::Disable => config.encryption(EncryptionLevel::NotSupported),
        TlsMode::Prefer => {
            config.encryption(EncryptionLevel::Off);
            config.trust_cert();
        }
        TlsMode::Require | TlsMode::VerifyFull => {
            config.encryption(EncryptionLevel::Required);
            match &tls.ca_cert_path {
                Some(ca_path) => config.trust_cert_ca(ca_path.display()),
                None if tls.mode == TlsMode::Require => config.trust_cert(),
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_ssl_modes() {
        use tokio_postgres::config::SslMode;
        assert_eq!(postgres_ssl_mode(TlsMode::Disable), SslMode::Disable);
        assert_eq!(postgres_ssl_mode(TlsMode::VerifyFull), SslMode::Require);
    }

    #[test]
    fn test_mysql_plaintext_modes() {
        let tls = TlsConfig {
            mode: TlsMode::Prefer,
            ..TlsConfig::default()
        };
        assert!(mysql_ssl_opts(&tls, "db").unwrap().is_none());
    }

    #[test]
    fn test_mysql_verify_full_pins_hostname() {
        let tls = TlsConfig {
            mode: TlsMode::VerifyFull,
            ..TlsConfig::default()
        };
        let opts = mysql_ssl_opts(&tls, "db.internal").unwrap().unwrap();
        assert_eq!(opts.tls_hostname_override(), Some("db.internal"));
        assert!(!opts.accept_invalid_certs());
    }

    #[test]
    fn test_missing_ca_file_is_reported() {
        let tls = TlsConfig {
            mode: TlsMode::VerifyFull,
            ca_cert_path: Some("/nonexistent/ca.pem".into()),
            ..TlsConfig::default()
        };
        let err = native_connector(&tls).unwrap_err();
        assert!(matches!(err, TlsError::Read { what: "CA certificate", .. }));
        assert!(matches!(DbError::from(err), DbError::ConnectionError(_)));
    }
}
