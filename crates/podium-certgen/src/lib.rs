//! TLS certificate generation for podium.
//!
//! The host presents a self-signed certificate on its control endpoint.
//! Controllers identify it by the SHA-256 fingerprint printed when the
//! server starts, so no certificate authority is involved.

pub mod error;

pub use error::CertgenError;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};

/// A generated certificate and private key pair.
pub struct GeneratedCert {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
    /// SHA-256 fingerprint of the DER-encoded certificate.
    pub fingerprint: String,
}

/// Generate a new self-signed certificate for the host.
///
/// Valid for `hostname`, `localhost` and `127.0.0.1`.
pub fn generate_certificate(hostname: &str) -> Result<GeneratedCert, CertgenError> {
    let key_pair = KeyPair::generate().map_err(|e| CertgenError::Generation(e.to_string()))?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, hostname);
    dn.push(DnType::OrganizationName, "podium");
    params.distinguished_name = dn;

    params.subject_alt_names = vec![
        dns_name(hostname)?,
        dns_name("localhost")?,
        SanType::IpAddress(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)),
    ];

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CertgenError::Generation(e.to_string()))?;

    Ok(GeneratedCert {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
        fingerprint: sha256_fingerprint(cert.der()),
    })
}

fn dns_name(name: &str) -> Result<SanType, CertgenError> {
    let ia5 = name.try_into().map_err(|e: rcgen::Error| CertgenError::InvalidName {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    Ok(SanType::DnsName(ia5))
}

/// Compute the SHA-256 fingerprint of DER-encoded certificate bytes.
///
/// Format: `SHA256:` followed by colon-separated lowercase hex bytes.
pub fn sha256_fingerprint(der: &[u8]) -> String {
    use std::fmt::Write;
    let digest = ring::digest::digest(&ring::digest::SHA256, der);
    let mut fingerprint = String::from("SHA256:");
    for (i, byte) in digest.as_ref().iter().enumerate() {
        if i > 0 {
            fingerprint.push(':');
        }
        let _ = write!(fingerprint, "{byte:02x}");
    }
    fingerprint
}

/// Compare two fingerprints, ignoring case and surrounding whitespace.
pub fn fingerprints_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
