//! Poll-ownership lookups against the per-chain subgraphs.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use tallyd_core::pipeline::traits::OwnershipOracle;
use tallyd_core::{CoordinatorError, Result};
use tallyd_model::SupportedChain;

const POLL_OWNER_QUERY: &str =
    "query PollOwner($pollId: String!) { polls(where: { pollId: $pollId }) { owner } }";

/// GraphQL client over the hosted indexer. One subgraph deployment exists per
/// supported chain, addressed by the chain slug.
#[derive(Debug, Clone)]
pub struct SubgraphOracle {
    http: reqwest::Client,
    project_id: String,
    version: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<PollsData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PollsData {
    polls: Vec<PollRecord>,
}

#[derive(Debug, Deserialize)]
struct PollRecord {
    owner: String,
}

impl SubgraphOracle {
    pub fn new(http: reqwest::Client, project_id: String, version: String) -> Self {
        Self {
            http,
            project_id,
            version,
        }
    }

    fn endpoint(&self, chain: SupportedChain) -> String {
        format!(
            "https://api.goldsky.com/api/public/{}/subgraphs/tallyd-{}/{}/gn",
            self.project_id,
            chain.as_slug(),
            self.version
        )
    }
}

#[async_trait]
impl OwnershipOracle for SubgraphOracle {
    async fn fetch_poll_owner(
        &self,
        poll_id: &str,
        chain: SupportedChain,
    ) -> Result<String> {
        let body = json!({
            "query": POLL_OWNER_QUERY,
            "variables": { "pollId": poll_id },
        });

        let response = self
            .http
            .post(self.endpoint(chain))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoordinatorError::Oracle(format!("subgraph query: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoordinatorError::Oracle(format!(
                "subgraph returned {status}"
            )));
        }

        let parsed: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| CoordinatorError::Oracle(format!("subgraph response: {e}")))?;

        if let Some(error) = parsed.errors.first() {
            return Err(CoordinatorError::Oracle(format!(
                "subgraph error: {}",
                error.message
            )));
        }

        parsed
            .data
            .and_then(|data| data.polls.into_iter().next())
            .map(|poll| poll.owner)
            .ok_or_else(|| {
                CoordinatorError::Oracle(format!(
                    "poll {poll_id} not found on {chain}"
                ))
            })
    }
}
