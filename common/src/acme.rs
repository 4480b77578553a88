/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey};
use reqwest::header::{CONTENT_TYPE, LOCATION, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use super::certs::{self, CertError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const POLL_ATTEMPTS: usize = 15;
const JOSE_CONTENT_TYPE: &str = "application/jose+json";
const PEM_CHAIN_CONTENT_TYPE: &str = "application/pem-certificate-chain";

#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("request to ACME server failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ACME server responded with {status}: {detail}")]
    Problem { status: u16, detail: String },
    #[error("malformed ACME response: {0}")]
    Malformed(String),
    #[error("domain could not be verified: {0}")]
    Unverified(String),
    #[error("ACME key error: {0}")]
    Key(#[from] CertError),
    #[error("JWS signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// HTTP-01 challenge for one domain. `path` and `resource` are what the
/// ingress serves under `/.well-known/acme-challenge/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub url: String,
    pub challenge_url: String,
    pub token: String,
    pub path: String,
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCert {
    pub uri: String,
    pub der: Vec<u8>,
    /// Issuer PEM when the CA returned a chain.
    pub issuer_pem: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Renewal {
    Issued(IssuedCert),
    RetryAfter(u64),
}

#[async_trait]
pub trait AcmeClient: Send + Sync + fmt::Debug {
    async fn register(&self, account_key: &str) -> Result<(), AcmeError>;

    async fn authorize(&self, account_key: &str, domain: &str)
    -> Result<Authorization, AcmeError>;

    /// Tells the CA the challenge is in place and waits for the verdict.
    async fn accept_challenge(
        &self,
        account_key: &str,
        authorization: &Authorization,
    ) -> Result<(), AcmeError>;

    async fn new_cert(
        &self,
        account_key: &str,
        domain: &str,
        csr_der: &[u8],
    ) -> Result<IssuedCert, AcmeError>;

    async fn renew(&self, account_key: &str, cert_uri: &str) -> Result<Renewal, AcmeError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Directory {
    new_nonce: String,
    new_account: String,
    new_order: String,
}

#[derive(Debug, Deserialize)]
struct Order {
    status: String,
    authorizations: Vec<String>,
    finalize: String,
    certificate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorizationResource {
    status: String,
    challenges: Vec<Challenge>,
}

#[derive(Debug, Deserialize)]
struct Challenge {
    #[serde(rename = "type")]
    kind: String,
    url: String,
    token: Option<String>,
}

enum Signer<'a> {
    Jwk,
    Kid(&'a str),
}

/// RFC 8555 client signing every request with an ES256 JWS.
pub struct HttpAcmeClient {
    client: Client,
    directory_url: String,
    directory: OnceCell<Directory>,
}

impl fmt::Debug for HttpAcmeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAcmeClient")
            .field("directory_url", &self.directory_url)
            .finish()
    }
}

pub fn jwk(account_key: &str) -> Result<Value, AcmeError> {
    let key = certs::ec_public_key(account_key)?;
    Ok(json!({ "crv": "P-256", "kty": "EC", "x": key.x, "y": key.y }))
}

/// RFC 7638 thumbprint, members in lexicographic order.
pub fn thumbprint(account_key: &str) -> Result<String, AcmeError> {
    let key = certs::ec_public_key(account_key)?;
    let canonical = format!(
        r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#,
        key.x, key.y
    );
    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())))
}

pub fn key_authorization(token: &str, account_key: &str) -> Result<String, AcmeError> {
    Ok(format!("{}.{}", token, thumbprint(account_key)?))
}

fn retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn location(response: &Response) -> Result<String, AcmeError> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .ok_or_else(|| AcmeError::Malformed("missing Location header".to_string()))
}

async fn check(response: Response) -> Result<Response, AcmeError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let detail = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(|d| d.to_string()))
        .unwrap_or_else(|| "no detail".to_string());

    Err(AcmeError::Problem { status, detail })
}

impl HttpAcmeClient {
    pub fn new(directory_url: &str) -> Result<Self, AcmeError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            directory_url: directory_url.to_string(),
            directory: OnceCell::new(),
        })
    }

    async fn directory(&self) -> Result<&Directory, AcmeError> {
        self.directory
            .get_or_try_init(|| async {
                let response = check(self.client.get(&self.directory_url).send().await?).await?;
                Ok::<Directory, AcmeError>(response.json::<Directory>().await?)
            })
            .await
    }

    async fn nonce(&self) -> Result<String, AcmeError> {
        let url = self.directory().await?.new_nonce.clone();
        let response = check(self.client.head(&url).send().await?).await?;

        response
            .headers()
            .get("Replay-Nonce")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .ok_or_else(|| AcmeError::Malformed("missing Replay-Nonce header".to_string()))
    }

    async fn signed_post(
        &self,
        account_key: &str,
        signer: Signer<'_>,
        url: &str,
        payload: Option<&Value>,
    ) -> Result<Response, AcmeError> {
        let mut protected = json!({
            "alg": "ES256",
            "nonce": self.nonce().await?,
            "url": url,
        });

        match signer {
            Signer::Jwk => protected["jwk"] = jwk(account_key)?,
            Signer::Kid(kid) => protected["kid"] = json!(kid),
        }

        let protected = URL_SAFE_NO_PAD.encode(protected.to_string());
        let payload = match payload {
            Some(payload) => URL_SAFE_NO_PAD.encode(payload.to_string()),
            None => String::new(),
        };

        let signing_key = EncodingKey::from_ec_pem(account_key.as_bytes())?;
        let signature = jsonwebtoken::crypto::sign(
            format!("{}.{}", protected, payload).as_bytes(),
            &signing_key,
            Algorithm::ES256,
        )?;

        let body = json!({
            "protected": protected,
            "payload": payload,
            "signature": signature,
        });

        Ok(self
            .client
            .post(url)
            .header(CONTENT_TYPE, JOSE_CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .await?)
    }

    async fn account_url(&self, account_key: &str) -> Result<String, AcmeError> {
        let url = self.directory().await?.new_account.clone();
        let payload = json!({ "termsOfServiceAgreed": true });
        let response =
            check(self.signed_post(account_key, Signer::Jwk, &url, Some(&payload)).await?).await?;

        location(&response)
    }

    async fn post_as_get(
        &self,
        account_key: &str,
        kid: &str,
        url: &str,
    ) -> Result<Response, AcmeError> {
        check(self.signed_post(account_key, Signer::Kid(kid), url, None).await?).await
    }

    async fn new_order(
        &self,
        account_key: &str,
        kid: &str,
        domain: &str,
    ) -> Result<(String, Order), AcmeError> {
        let url = self.directory().await?.new_order.clone();
        let payload = json!({ "identifiers": [{ "type": "dns", "value": domain }] });
        let response =
            check(self.signed_post(account_key, Signer::Kid(kid), &url, Some(&payload)).await?)
                .await?;

        let order_url = location(&response)?;
        Ok((order_url, response.json::<Order>().await?))
    }

    async fn download_chain(
        &self,
        account_key: &str,
        kid: &str,
        url: &str,
    ) -> Result<Renewal, AcmeError> {
        let response = self.signed_post(account_key, Signer::Kid(kid), url, None).await?;

        if response.status() == StatusCode::ACCEPTED {
            return Ok(Renewal::RetryAfter(retry_after(&response).unwrap_or(0)));
        }

        let response = check(response).await?;
        let wait = retry_after(&response);
        let is_pem = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_none_or(|v| v.starts_with(PEM_CHAIN_CONTENT_TYPE));
        let body = response.bytes().await?;

        if body.is_empty() {
            return Ok(Renewal::RetryAfter(wait.unwrap_or(0)));
        }

        if !is_pem {
            return Err(AcmeError::Malformed("certificate is not a PEM chain".to_string()));
        }

        Ok(Renewal::Issued(IssuedCert {
            uri: url.to_string(),
            der: certs::leaf_der(&body)?,
            issuer_pem: certs::issuer_pem(&body)?,
        }))
    }
}

#[async_trait]
impl AcmeClient for HttpAcmeClient {
    #[instrument(skip_all)]
    async fn register(&self, account_key: &str) -> Result<(), AcmeError> {
        let account = self.account_url(account_key).await?;
        debug!(account = %account, "ACME account registered");
        Ok(())
    }

    #[instrument(skip(self, account_key))]
    async fn authorize(
        &self,
        account_key: &str,
        domain: &str,
    ) -> Result<Authorization, AcmeError> {
        let kid = self.account_url(account_key).await?;
        let (_, order) = self.new_order(account_key, &kid, domain).await?;
        let url = order
            .authorizations
            .first()
            .cloned()
            .ok_or_else(|| AcmeError::Malformed("order without authorizations".to_string()))?;

        let authorization = self
            .post_as_get(account_key, &kid, &url)
            .await?
            .json::<AuthorizationResource>()
            .await?;

        let challenge = authorization
            .challenges
            .into_iter()
            .find(|c| c.kind == "http-01")
            .ok_or_else(|| AcmeError::Malformed("no http-01 challenge offered".to_string()))?;

        let token = challenge
            .token
            .ok_or_else(|| AcmeError::Malformed("challenge without token".to_string()))?;

        Ok(Authorization {
            url,
            challenge_url: challenge.url,
            path: format!("/.well-known/acme-challenge/{}", token),
            resource: key_authorization(&token, account_key)?,
            token,
        })
    }

    #[instrument(skip_all, fields(authorization = %authorization.url))]
    async fn accept_challenge(
        &self,
        account_key: &str,
        authorization: &Authorization,
    ) -> Result<(), AcmeError> {
        let kid = self.account_url(account_key).await?;
        check(
            self.signed_post(
                account_key,
                Signer::Kid(&kid),
                &authorization.challenge_url,
                Some(&json!({})),
            )
            .await?,
        )
        .await?;

        for _ in 0..POLL_ATTEMPTS {
            let resource = self
                .post_as_get(account_key, &kid, &authorization.url)
                .await?
                .json::<AuthorizationResource>()
                .await?;

            match resource.status.as_str() {
                "valid" => return Ok(()),
                "pending" | "processing" => tokio::time::sleep(POLL_INTERVAL).await,
                status => return Err(AcmeError::Unverified(status.to_string())),
            }
        }

        Err(AcmeError::Unverified("timed out".to_string()))
    }

    #[instrument(skip(self, account_key, csr_der))]
    async fn new_cert(
        &self,
        account_key: &str,
        domain: &str,
        csr_der: &[u8],
    ) -> Result<IssuedCert, AcmeError> {
        let kid = self.account_url(account_key).await?;
        let (order_url, order) = self.new_order(account_key, &kid, domain).await?;

        if order.status != "ready" && order.status != "valid" {
            return Err(AcmeError::Unverified(order.status));
        }

        let payload = json!({ "csr": URL_SAFE_NO_PAD.encode(csr_der) });
        check(
            self.signed_post(account_key, Signer::Kid(&kid), &order.finalize, Some(&payload))
                .await?,
        )
        .await?;

        for _ in 0..POLL_ATTEMPTS {
            let order = self
                .post_as_get(account_key, &kid, &order_url)
                .await?
                .json::<Order>()
                .await?;

            match (order.status.as_str(), order.certificate) {
                ("valid", Some(certificate)) => {
                    return match self.download_chain(account_key, &kid, &certificate).await? {
                        Renewal::Issued(cert) => Ok(cert),
                        Renewal::RetryAfter(_) => {
                            Err(AcmeError::Malformed("certificate not available".to_string()))
                        }
                    };
                }
                ("invalid", _) => return Err(AcmeError::Unverified("order invalid".to_string())),
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }

        Err(AcmeError::Malformed("order did not become valid".to_string()))
    }

    #[instrument(skip(self, account_key))]
    async fn renew(&self, account_key: &str, cert_uri: &str) -> Result<Renewal, AcmeError> {
        let kid = self.account_url(account_key).await?;
        self.download_chain(account_key, &kid, cert_uri).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcmeCall {
    Register,
    Authorize { domain: String },
    AcceptChallenge { token: String },
    NewCert { domain: String },
    Renew { cert_uri: String },
}

/// Scripted client for tests. Responses are configured up front; every call
/// is recorded.
#[derive(Debug, Default)]
pub struct FakeAcmeClient {
    pub fail_register: bool,
    pub fail_challenge: bool,
    pub renewal: Mutex<Option<Renewal>>,
    pub issued: Mutex<Option<IssuedCert>>,
    calls: Mutex<Vec<AcmeCall>>,
}

impl FakeAcmeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_renewal(self, renewal: Renewal) -> Self {
        *self.renewal.lock().unwrap_or_else(|e| e.into_inner()) = Some(renewal);
        self
    }

    pub fn with_issued(self, issued: IssuedCert) -> Self {
        *self.issued.lock().unwrap_or_else(|e| e.into_inner()) = Some(issued);
        self
    }

    pub fn calls(&self) -> Vec<AcmeCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: AcmeCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

#[async_trait]
impl AcmeClient for FakeAcmeClient {
    async fn register(&self, _account_key: &str) -> Result<(), AcmeError> {
        self.record(AcmeCall::Register);
        if self.fail_register {
            return Err(AcmeError::Problem {
                status: 503,
                detail: "unavailable".to_string(),
            });
        }

        Ok(())
    }

    async fn authorize(
        &self,
        account_key: &str,
        domain: &str,
    ) -> Result<Authorization, AcmeError> {
        self.record(AcmeCall::Authorize {
            domain: domain.to_string(),
        });

        let token = format!("token-{}", domain);
        Ok(Authorization {
            url: format!("https://acme.test/authz/{}", domain),
            challenge_url: format!("https://acme.test/chall/{}", domain),
            path: format!("/.well-known/acme-challenge/{}", token),
            resource: key_authorization(&token, account_key)?,
            token,
        })
    }

    async fn accept_challenge(
        &self,
        _account_key: &str,
        authorization: &Authorization,
    ) -> Result<(), AcmeError> {
        self.record(AcmeCall::AcceptChallenge {
            token: authorization.token.clone(),
        });
        if self.fail_challenge {
            return Err(AcmeError::Unverified("invalid".to_string()));
        }

        Ok(())
    }

    async fn new_cert(
        &self,
        _account_key: &str,
        domain: &str,
        _csr_der: &[u8],
    ) -> Result<IssuedCert, AcmeError> {
        self.record(AcmeCall::NewCert {
            domain: domain.to_string(),
        });

        self.issued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| AcmeError::Malformed("no certificate scripted".to_string()))
    }

    async fn renew(&self, _account_key: &str, cert_uri: &str) -> Result<Renewal, AcmeError> {
        self.record(AcmeCall::Renew {
            cert_uri: cert_uri.to_string(),
        });

        self.renewal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| AcmeError::Malformed("no renewal scripted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbprint_and_key_authorization() {
        let key = certs::generate_key_pem().unwrap();
        let print = thumbprint(&key).unwrap();

        assert_eq!(print.len(), 43);
        assert_eq!(thumbprint(&key).unwrap(), print);
        assert_eq!(
            key_authorization("abc", &key).unwrap(),
            format!("abc.{}", print)
        );
    }

    #[test]
    fn test_jwk_shape() {
        let key = certs::generate_key_pem().unwrap();
        let jwk = jwk(&key).unwrap();

        assert_eq!(jwk["kty"], "EC");
        assert_eq!(jwk["crv"], "P-256");
        assert!(jwk["x"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_fake_client_records_calls() {
        let key = certs::generate_key_pem().unwrap();
        let client = FakeAcmeClient::new().with_renewal(Renewal::RetryAfter(60));

        client.register(&key).await.unwrap();
        let auth = client.authorize(&key, "www.example.com").await.unwrap();
        assert_eq!(
            auth.path,
            "/.well-known/acme-challenge/token-www.example.com"
        );
        assert!(auth.resource.starts_with("token-www.example.com."));

        assert_eq!(
            client.renew(&key, "https://acme.test/cert/1").await.unwrap(),
            Renewal::RetryAfter(60)
        );
        assert!(client.new_cert(&key, "www.example.com", b"csr").await.is_err());

        assert_eq!(
            client.calls(),
            vec![
                AcmeCall::Register,
                AcmeCall::Authorize {
                    domain: "www.example.com".to_string()
                },
                AcmeCall::Renew {
                    cert_uri: "https://acme.test/cert/1".to_string()
                },
                AcmeCall::NewCert {
                    domain: "www.example.com".to_string()
                },
            ]
        );
    }
}
