//! Client for the proving-engine service.
//!
//! The engine computes but never signs: merge and submit respond with a
//! prepared transaction which is published through the delegated signer.
//! Generation streams newline-delimited JSON so batch progress reaches the
//! session while proving is still running.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use tallyd_core::pipeline::traits::{ProvingEngine, SignerClient};
use tallyd_core::{CoordinatorError, Result};
use tallyd_model::{
    GenerationProgress, Proof, ProofSessionRequest, TallyArtifact, VotingMode,
};

#[derive(Debug, Clone)]
pub struct HttpProvingEngine {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct StageRequest<'a> {
    contract_address: &'a str,
    poll_id: &'a str,
    chain: &'a str,
    signer_address: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contract_address: &'a str,
    poll_id: &'a str,
    chain: &'a str,
    voting_mode: VotingMode,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    contract_address: &'a str,
    poll_id: &'a str,
    chain: &'a str,
    signer_address: String,
    tally: &'a TallyArtifact,
}

/// Transaction prepared by the engine, to be published by the signer.
#[derive(Debug, Deserialize)]
struct PreparedTransaction {
    to: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    to: String,
    data: String,
    tally: TallyArtifact,
}

/// One line of the generate NDJSON stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum GenerateRecord {
    Progress(GenerationProgress),
    Complete {
        proofs: Vec<Proof>,
        tally: Option<TallyArtifact>,
    },
}

impl HttpProvingEngine {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| CoordinatorError::Engine(format!("POST {path}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CoordinatorError::Engine(format!(
                "POST {path} returned {status}: {detail}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProvingEngine for HttpProvingEngine {
    async fn merge(
        &self,
        request: &ProofSessionRequest,
        signer: &dyn SignerClient,
    ) -> Result<()> {
        let response = self
            .post_json(
                "/v1/merge",
                &StageRequest {
                    contract_address: &request.contract_address,
                    poll_id: &request.poll_id,
                    chain: request.chain.as_slug(),
                    signer_address: signer.address(),
                },
            )
            .await?;

        let tx: PreparedTransaction = response
            .json()
            .await
            .map_err(|e| CoordinatorError::Engine(format!("merge response: {e}")))?;

        let hash = signer.send_transaction(&tx.to, &tx.data).await?;
        debug!("Merge transaction for poll {} published: {}", request.poll_id, hash);
        Ok(())
    }

    async fn generate(
        &self,
        request: &ProofSessionRequest,
        voting_mode: VotingMode,
        progress: mpsc::Sender<GenerationProgress>,
    ) -> Result<(Vec<Proof>, Option<TallyArtifact>)> {
        let response = self
            .post_json(
                "/v1/generate",
                &GenerateRequest {
                    contract_address: &request.contract_address,
                    poll_id: &request.poll_id,
                    chain: request.chain.as_slug(),
                    voting_mode,
                },
            )
            .await?;

        let mut stream = response.bytes_stream();
        let mut buffer = Vec::new();
        let mut completion = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| CoordinatorError::Engine(format!("generate stream: {e}")))?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_str::<GenerateRecord>(line)? {
                    GenerateRecord::Progress(batch) => {
                        // A closed receiver means the run is being torn down;
                        // stop forwarding but let the stream finish.
                        let _ = progress.send(batch).await;
                    }
                    GenerateRecord::Complete { proofs, tally } => {
                        completion = Some((proofs, tally));
                    }
                }
            }
        }

        completion.ok_or_else(|| {
            CoordinatorError::Engine("generate stream ended without completion".into())
        })
    }

    async fn submit(
        &self,
        request: &ProofSessionRequest,
        signer: &dyn SignerClient,
        tally: &TallyArtifact,
    ) -> Result<TallyArtifact> {
        let response = self
            .post_json(
                "/v1/submit",
                &SubmitRequest {
                    contract_address: &request.contract_address,
                    poll_id: &request.poll_id,
                    chain: request.chain.as_slug(),
                    signer_address: signer.address(),
                    tally,
                },
            )
            .await?;

        let submit: SubmitResponse = response
            .json()
            .await
            .map_err(|e| CoordinatorError::Engine(format!("submit response: {e}")))?;

        let hash = signer.send_transaction(&submit.to, &submit.data).await?;
        debug!(
            "Submit transaction for poll {} published: {}",
            request.poll_id, hash
        );
        Ok(submit.tally)
    }
}
