//! Clients for the delegated-signer service.
//!
//! The service owns the session keys; the coordinator only ever sees an
//! opaque client id scoped to one key and chain. The same service exposes
//! signature recovery, used by the auth layer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tallyd_core::pipeline::traits::{SignatureVerifier, SignerClient, SignerProvider};
use tallyd_core::{CoordinatorError, Result};
use tallyd_model::SupportedChain;

#[derive(Debug, Clone)]
pub struct HttpSignerProvider {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSignerProvider {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

#[derive(Debug, Serialize)]
struct CreateClientRequest<'a> {
    session_key_address: &'a str,
    approval: &'a str,
    chain: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateClientResponse {
    client_id: String,
    address: String,
}

#[async_trait]
impl SignerProvider for HttpSignerProvider {
    async fn create_client(
        &self,
        session_key_address: &str,
        approval: &str,
        chain: SupportedChain,
    ) -> Result<Arc<dyn SignerClient>> {
        let url = format!("{}/v1/clients", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&CreateClientRequest {
                session_key_address,
                approval,
                chain: chain.as_slug(),
            })
            .send()
            .await
            .map_err(|e| CoordinatorError::Signer(format!("create client: {e}")))?;

        // The service answers 404 for deactivated or never-registered keys.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CoordinatorError::SessionKeyNotFound(
                session_key_address.to_string(),
            ));
        }
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CoordinatorError::Signer(format!(
                "create client returned {status}: {detail}"
            )));
        }

        let created: CreateClientResponse = response
            .json()
            .await
            .map_err(|e| CoordinatorError::Signer(format!("create client response: {e}")))?;

        Ok(Arc::new(HttpSignerClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            client_id: created.client_id,
            address: created.address,
        }))
    }
}

#[derive(Debug)]
pub struct HttpSignerClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    address: String,
}

#[derive(Debug, Serialize)]
struct SendTransactionRequest<'a> {
    to: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendTransactionResponse {
    transaction_hash: String,
}

#[async_trait]
impl SignerClient for HttpSignerClient {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn send_transaction(&self, to: &str, data: &str) -> Result<String> {
        let url = format!("{}/v1/clients/{}/transactions", self.base_url, self.client_id);
        let response = self
            .http
            .post(&url)
            .json(&SendTransactionRequest { to, data })
            .send()
            .await
            .map_err(|e| CoordinatorError::Signer(format!("send transaction: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CoordinatorError::Signer(format!(
                "send transaction returned {status}: {detail}"
            )));
        }

        let sent: SendTransactionResponse = response.json().await.map_err(|e| {
            CoordinatorError::Signer(format!("send transaction response: {e}"))
        })?;
        Ok(sent.transaction_hash)
    }
}

/// Signature recovery backed by the signer service's crypto endpoint.
#[derive(Debug, Clone)]
pub struct HttpSignatureVerifier {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSignatureVerifier {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

#[derive(Debug, Serialize)]
struct RecoverRequest<'a> {
    digest: &'a str,
    signature: &'a str,
}

#[derive(Debug, Deserialize)]
struct RecoverResponse {
    address: String,
}

#[async_trait]
impl SignatureVerifier for HttpSignatureVerifier {
    async fn recover_signer(&self, digest: &str, signature: &str) -> Result<String> {
        let url = format!("{}/v1/recover", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&RecoverRequest { digest, signature })
            .send()
            .await
            .map_err(|e| CoordinatorError::Signer(format!("recover signer: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CoordinatorError::Signer(format!(
                "recover signer returned {status}: {detail}"
            )));
        }

        let recovered: RecoverResponse = response
            .json()
            .await
            .map_err(|e| CoordinatorError::Signer(format!("recover response: {e}")))?;
        Ok(recovered.address)
    }
}
