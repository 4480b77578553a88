/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, NaiveDateTime};
use rcgen::{CertificateParams, DnType, KeyPair};
use thiserror::Error;
use x509_parser::prelude::*;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("invalid cert or key")]
    InvalidCert,
    #[error("invalid common name")]
    InvalidCommonName,
    #[error("pem decoding failed: {0}")]
    Pem(#[from] ::pem::PemError),
    #[error("key generation failed: {0}")]
    Generation(#[from] rcgen::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    pub starts_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub common_name: Option<String>,
    pub issuer: Option<String>,
    pub subject: Option<String>,
}

/// Public half of an ECDSA P-256 key as used in a JWK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcPublicKey {
    pub x: String,
    pub y: String,
}

fn certificate_blocks(pem_data: &[u8]) -> Result<Vec<::pem::Pem>, CertError> {
    let blocks = ::pem::parse_many(pem_data)?
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .collect::<Vec<::pem::Pem>>();

    if blocks.is_empty() {
        return Err(CertError::InvalidCert);
    }

    Ok(blocks)
}

fn to_naive(time: ASN1Time) -> Result<NaiveDateTime, CertError> {
    DateTime::from_timestamp(time.timestamp(), 0)
        .map(|t| t.naive_utc())
        .ok_or(CertError::InvalidCert)
}

fn stringify_name(name: &X509Name<'_>) -> String {
    let mut parts = Vec::new();
    let mut push = |prefix: &str, values: Vec<&str>| {
        for value in values {
            parts.push(format!("{}={}", prefix, value));
        }
    };

    push("C", name.iter_country().filter_map(|a| a.as_str().ok()).collect());
    push("O", name.iter_organization().filter_map(|a| a.as_str().ok()).collect());
    push(
        "OU",
        name.iter_organizational_unit()
            .filter_map(|a| a.as_str().ok())
            .collect(),
    );
    push("L", name.iter_locality().filter_map(|a| a.as_str().ok()).collect());
    push(
        "ST",
        name.iter_state_or_province()
            .filter_map(|a| a.as_str().ok())
            .collect(),
    );
    push("CN", name.iter_common_name().filter_map(|a| a.as_str().ok()).take(1).collect());

    format!("/{}", parts.join("/"))
}

/// `*.example.com` covers exactly one extra label.
pub fn hostname_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_lowercase();
    let host = host.trim_end_matches('.').to_lowercase();

    match pattern.strip_prefix("*.") {
        Some(suffix) => host
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
        None => pattern == host,
    }
}

fn dns_names(cert: &X509Certificate<'_>) -> Vec<String> {
    match cert.subject_alternative_name() {
        Ok(Some(san)) => san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn common_name(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|cn| cn.to_string())
}

fn verify_hostname(cert: &X509Certificate<'_>, domain: &str) -> bool {
    let names = dns_names(cert);

    if names.is_empty() {
        return common_name(cert).is_some_and(|cn| hostname_matches(&cn, domain));
    }

    names.iter().any(|name| hostname_matches(name, domain))
}

fn info_from(cert: &X509Certificate<'_>) -> Result<CertInfo, CertError> {
    Ok(CertInfo {
        starts_at: to_naive(cert.validity().not_before)?,
        expires_at: to_naive(cert.validity().not_after)?,
        common_name: common_name(cert),
        issuer: Some(stringify_name(cert.issuer())),
        subject: Some(stringify_name(cert.subject())),
    })
}

/// Reads validity and names from the leaf of a PEM chain.
pub fn inspect(cert_pem: &[u8]) -> Result<CertInfo, CertError> {
    let blocks = certificate_blocks(cert_pem)?;
    let (_, cert) =
        X509Certificate::from_der(blocks[0].contents()).map_err(|_| CertError::InvalidCert)?;

    info_from(&cert)
}

fn key_matches(cert: &X509Certificate<'_>, key_pem: &[u8]) -> Result<bool, CertError> {
    let key = ::pem::parse(key_pem).map_err(|_| CertError::InvalidCert)?;

    match key.tag() {
        "PRIVATE KEY" => {
            let pem_str = std::str::from_utf8(key_pem).map_err(|_| CertError::InvalidCert)?;
            let key_pair = KeyPair::from_pem(pem_str).map_err(|_| CertError::InvalidCert)?;
            let cert_key: &[u8] = &cert.public_key().subject_public_key.data;
            Ok(key_pair.public_key_raw() == cert_key)
        }
        // PKCS#1 and SEC1 keys are accepted structurally only.
        "RSA PRIVATE KEY" | "EC PRIVATE KEY" => Ok(!key.contents().is_empty()),
        _ => Ok(false),
    }
}

/// Checks that `cert_pem` and `key_pem` belong together and that the leaf
/// certificate covers `domain`.
pub fn get_info(cert_pem: &[u8], key_pem: &[u8], domain: &str) -> Result<CertInfo, CertError> {
    let blocks = certificate_blocks(cert_pem).map_err(|_| CertError::InvalidCert)?;
    let (_, cert) =
        X509Certificate::from_der(blocks[0].contents()).map_err(|_| CertError::InvalidCert)?;

    if !key_matches(&cert, key_pem)? {
        return Err(CertError::InvalidCert);
    }

    if !verify_hostname(&cert, domain) {
        return Err(CertError::InvalidCommonName);
    }

    info_from(&cert)
}

/// New ECDSA P-256 key as PKCS#8 PEM.
pub fn generate_key_pem() -> Result<String, CertError> {
    Ok(KeyPair::generate()?.serialize_pem())
}

pub fn create_csr_der(key_pem: &str, domain: &str) -> Result<Vec<u8>, CertError> {
    let key_pair = KeyPair::from_pem(key_pem)?;
    let mut params = CertificateParams::new(vec![domain.to_string()])?;
    params.distinguished_name.push(DnType::CommonName, domain);

    let csr = params.serialize_request(&key_pair)?;
    let der: &[u8] = csr.der();
    Ok(der.to_vec())
}

pub fn ec_public_key(key_pem: &str) -> Result<EcPublicKey, CertError> {
    let key_pair = KeyPair::from_pem(key_pem)?;
    let raw = key_pair.public_key_raw();

    // uncompressed SEC1 point: 0x04 || X || Y
    if raw.len() != 65 || raw[0] != 0x04 {
        return Err(CertError::InvalidCert);
    }

    Ok(EcPublicKey {
        x: URL_SAFE_NO_PAD.encode(&raw[1..33]),
        y: URL_SAFE_NO_PAD.encode(&raw[33..65]),
    })
}

pub fn der_to_pem(der: &[u8]) -> String {
    ::pem::encode(&::pem::Pem::new("CERTIFICATE", der.to_vec()))
}

/// DER of the first certificate in a PEM chain.
pub fn leaf_der(chain_pem: &[u8]) -> Result<Vec<u8>, CertError> {
    let blocks = certificate_blocks(chain_pem)?;
    Ok(blocks[0].contents().to_vec())
}

/// PEM of the certificate following the leaf, if any.
pub fn issuer_pem(chain_pem: &[u8]) -> Result<Option<String>, CertError> {
    let blocks = certificate_blocks(chain_pem)?;
    Ok(blocks.get(1).map(::pem::encode))
}

pub fn bundle(leaf: &[u8], issuer: Option<&str>) -> String {
    let mut out = der_to_pem(leaf);
    if let Some(issuer) = issuer {
        out.push_str(issuer);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed(names: &[&str], cn: &str) -> (String, String) {
        let key = KeyPair::generate().unwrap();
        let mut params =
            CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
                .unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.distinguished_name.push(DnType::OrganizationName, "Example Ltd");
        params.distinguished_name.push(DnType::CountryName, "US");
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    #[test]
    fn test_hostname_matches() {
        assert!(hostname_matches("www.example.com", "WWW.example.com"));
        assert!(hostname_matches("*.example.com", "www.example.com"));
        assert!(!hostname_matches("*.example.com", "a.b.example.com"));
        assert!(!hostname_matches("*.example.com", "example.com"));
        assert!(!hostname_matches("www.example.com", "example.com"));
    }

    #[test]
    fn test_get_info() {
        let (cert, key) = self_signed(&["www.example.com"], "www.example.com");
        let info = get_info(cert.as_bytes(), key.as_bytes(), "www.example.com").unwrap();

        assert_eq!(info.common_name.as_deref(), Some("www.example.com"));
        assert_eq!(
            info.subject.as_deref(),
            Some("/C=US/O=Example Ltd/CN=www.example.com")
        );
        assert_eq!(info.issuer, info.subject);
        assert!(info.expires_at > info.starts_at);
    }

    #[test]
    fn test_get_info_wildcard() {
        let (cert, key) = self_signed(&["*.example.com"], "*.example.com");
        assert!(get_info(cert.as_bytes(), key.as_bytes(), "blog.example.com").is_ok());
    }

    #[test]
    fn test_get_info_domain_mismatch() {
        let (cert, key) = self_signed(&["www.example.com"], "www.example.com");
        assert!(matches!(
            get_info(cert.as_bytes(), key.as_bytes(), "www.other.com"),
            Err(CertError::InvalidCommonName)
        ));
    }

    #[test]
    fn test_get_info_key_mismatch() {
        let (cert, _) = self_signed(&["www.example.com"], "www.example.com");
        let (_, other_key) = self_signed(&["www.example.com"], "www.example.com");
        assert!(matches!(
            get_info(cert.as_bytes(), other_key.as_bytes(), "www.example.com"),
            Err(CertError::InvalidCert)
        ));
    }

    #[test]
    fn test_get_info_garbage() {
        assert!(matches!(
            get_info(b"not a cert", b"not a key", "www.example.com"),
            Err(CertError::InvalidCert)
        ));
    }

    #[test]
    fn test_chain_helpers() {
        let (leaf, _) = self_signed(&["www.example.com"], "www.example.com");
        let (issuer, _) = self_signed(&["issuer.example.com"], "Example CA");
        let chain = format!("{}{}", leaf, issuer);

        let der = leaf_der(chain.as_bytes()).unwrap();
        let cached = issuer_pem(chain.as_bytes()).unwrap().unwrap();
        let bundled = bundle(&der, Some(&cached));

        assert_eq!(bundled.matches("BEGIN CERTIFICATE").count(), 2);
        assert_eq!(leaf_der(bundled.as_bytes()).unwrap(), der);
        assert_eq!(
            inspect(bundled.as_bytes()).unwrap().common_name.as_deref(),
            Some("www.example.com")
        );
        assert!(issuer_pem(leaf.as_bytes()).unwrap().is_none());
    }

    #[test]
    fn test_csr_and_jwk() {
        let key = generate_key_pem().unwrap();
        assert!(key.contains("BEGIN PRIVATE KEY"));

        let csr = create_csr_der(&key, "www.example.com").unwrap();
        assert!(!csr.is_empty());

        let jwk = ec_public_key(&key).unwrap();
        assert_eq!(jwk.x.len(), 43);
        assert_eq!(jwk.y.len(), 43);
    }
}
