//! TLS trust material for a single bind attempt.

use std::fmt;
use std::io::BufReader;

use native_tls::{Certificate, TlsConnector};

use crate::error::{Result, ServerError};

/// Certificates accepted as issuers for the directory server, on top of the
/// system trust store. Built per request and dropped with it.
#[derive(Clone, Default)]
pub struct TrustAnchors {
    certificates: Vec<Certificate>,
}

impl fmt::Debug for TrustAnchors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustAnchors")
            .field("certificates", &self.certificates.len())
            .finish()
    }
}

impl TrustAnchors {
    /// Number of certificates added to the system store.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Whether only the system trust store is used.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Create a TLS connector trusting these anchors.
    pub fn connector(&self) -> std::result::Result<TlsConnector, native_tls::Error> {
        let mut builder = TlsConnector::builder();
        for certificate in &self.certificates {
            builder.add_root_certificate(certificate.clone());
        }
        builder.build()
    }
}

/// Turns an optional PEM bundle into [`TrustAnchors`].
pub struct TrustBuilder;

impl TrustBuilder {
    /// Parse `pem`. Absent or blank input yields the system trust store.
    pub fn build(pem: Option<&str>) -> Result<TrustAnchors> {
        let Some(pem) = pem.filter(|pem| !pem.trim().is_empty()) else {
            return Ok(TrustAnchors::default());
        };

        let mut reader = BufReader::new(pem.as_bytes());
        let mut certificates = Vec::new();
        for der in rustls_pemfile::certs(&mut reader) {
            let der = der.map_err(|err| invalid_certificate(&err))?;
            let certificate = Certificate::from_der(der.as_ref())
                .map_err(|err| invalid_certificate(&err))?;
            certificates.push(certificate);
        }

        if certificates.is_empty() {
            return Err(ServerError::InvalidInput(
                "certificate does not contain any PEM encoded certificate".into(),
            ));
        }

        tracing::debug!(count = certificates.len(), "trust anchors loaded");

        Ok(TrustAnchors { certificates })
    }
}

fn invalid_certificate(err: &dyn std::error::Error) -> ServerError {
    ServerError::InvalidInput(format!("invalid certificate: {err}"))
}
