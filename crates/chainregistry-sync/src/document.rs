//! Off-chain document retrieval and integrity verification.
//!
//! Fetch failures, hash mismatches and unparseable content are expected
//! steady-state conditions. They come back as a [`DocumentStatus`] on the
//! [`Resolution`], never as an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use chainregistry_core::{DocumentStatus, HashAlgorithm, RegistryError};
use chainregistry_rpc::abi::keccak256;

/// Retrieves raw document bytes by URI.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, RegistryError>;
}

// ─── HTTP fetcher ─────────────────────────────────────────────────────────────

/// Plain HTTP GET with a request timeout and a body size cap.
pub struct HttpDocumentFetcher {
    http: reqwest::Client,
    max_bytes: usize,
}

impl HttpDocumentFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::Document(e.to_string()))?;
        Ok(Self { http, max_bytes })
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, RegistryError> {
        let err = |e: reqwest::Error| RegistryError::Document(format!("{uri}: {e}"));
        let mut resp = self.http.get(uri).send().await.map_err(err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RegistryError::Document(format!("{uri}: HTTP {status}")));
        }
        let too_large = || RegistryError::Document(format!("{uri}: body exceeds {} bytes", self.max_bytes));
        if resp.content_length().is_some_and(|n| n > self.max_bytes as u64) {
            return Err(too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(err)? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

// ─── Verifier ─────────────────────────────────────────────────────────────────

/// Outcome of resolving one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The fetched content hashes to the on-chain commitment.
    pub verified: bool,
    /// Parsed content; only present when verified and well-formed.
    pub content: Option<Value>,
    pub status: DocumentStatus,
}

impl Resolution {
    fn unverified(status: DocumentStatus) -> Self {
        Self {
            verified: false,
            content: None,
            status,
        }
    }
}

/// `0x`-prefixed lowercase hex digest of `bytes`.
pub fn content_hash(algorithm: HashAlgorithm, bytes: &[u8]) -> String {
    let digest = match algorithm {
        HashAlgorithm::Keccak256 => keccak256(bytes),
        HashAlgorithm::Sha256 => {
            let mut out = [0u8; 32];
            out.copy_from_slice(&Sha256::digest(bytes));
            out
        }
    };
    format!("0x{}", hex::encode(digest))
}

fn normalize_hex(h: &str) -> String {
    let h = h.trim();
    h.strip_prefix("0x")
        .or_else(|| h.strip_prefix("0X"))
        .unwrap_or(h)
        .to_ascii_lowercase()
}

pub struct DocumentVerifier {
    fetcher: Arc<dyn DocumentFetcher>,
    algorithm: HashAlgorithm,
}

impl DocumentVerifier {
    pub fn new(fetcher: Arc<dyn DocumentFetcher>, algorithm: HashAlgorithm) -> Self {
        Self { fetcher, algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Fetch `uri` and check it against `expected`.
    pub async fn resolve(&self, uri: &str, expected: Option<&str>) -> Resolution {
        let expected = match expected.map(normalize_hex) {
            Some(h) if !h.is_empty() && !uri.trim().is_empty() => h,
            _ => return Resolution::unverified(DocumentStatus::Missing),
        };

        let bytes = match self.fetcher.fetch(uri).await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(uri, error = %e, "document unavailable");
                return Resolution::unverified(DocumentStatus::Unavailable {
                    reason: e.to_string(),
                });
            }
        };

        let computed = content_hash(self.algorithm, &bytes);
        if normalize_hex(&computed) != expected {
            tracing::warn!(uri, computed = %computed, expected = %expected, "document hash mismatch");
            return Resolution::unverified(DocumentStatus::Mismatch { computed });
        }

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(content) => Resolution {
                verified: true,
                content: Some(content),
                status: DocumentStatus::Verified,
            },
            Err(e) => {
                tracing::warn!(uri, error = %e, "verified document is not valid JSON");
                Resolution {
                    verified: true,
                    content: None,
                    status: DocumentStatus::Malformed {
                        reason: e.to_string(),
                    },
                }
            }
        }
    }
}
