//! Request authorization.
//!
//! Every route declares one [`AuthPolicy`]; a single dispatcher enforces it
//! so no handler carries its own header-parsing logic. Coordinator identity
//! is proven by a signature whose recovered address must match the poll's
//! on-chain owner; the webhook uses a shared secret header instead.

use axum::http::HeaderMap;

use tallyd_core::pipeline::traits::{OwnershipOracle, SignatureVerifier};
use tallyd_model::SupportedChain;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Access rule attached to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
    /// No credentials required.
    Public,
    /// Proof-session routes: the caller must sign the poll digest with the
    /// key that owns the poll on-chain.
    RequiresCoordinatorSignature,
    /// Webhook routes: shared secret header from the indexing pipeline.
    RequiresWebhookSecret,
}

/// Poll scope a coordinator signature was validated against. Session
/// requests naming a different poll are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedPoll {
    pub poll_id: String,
    pub chain: SupportedChain,
}

/// Message the coordinator signs to open a proof session.
pub fn ownership_digest(poll_id: &str, chain: SupportedChain) -> String {
    format!("finalize:{chain}:{poll_id}")
}

/// Enforce `policy` against the request headers. Returns the authorized poll
/// scope for [`AuthPolicy::CoordinatorSignature`], `None` otherwise.
pub async fn authorize(
    state: &AppState,
    policy: AuthPolicy,
    headers: &HeaderMap,
) -> AppResult<Option<AuthorizedPoll>> {
    match policy {
        AuthPolicy::Public => Ok(None),
        AuthPolicy::RequiresWebhookSecret => {
            verify_webhook_secret(
                headers,
                &state.config.webhook_secret_header,
                &state.config.webhook_secret_value,
            )?;
            Ok(None)
        }
        AuthPolicy::RequiresCoordinatorSignature => {
            let authorized = verify_coordinator_signature(
                headers,
                state.oracle.as_ref(),
                state.verifier.as_ref(),
            )
            .await?;
            Ok(Some(authorized))
        }
    }
}

pub(crate) fn verify_webhook_secret(
    headers: &HeaderMap,
    header_name: &str,
    expected: &str,
) -> AppResult<()> {
    let presented = headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("missing webhook secret header"))?;

    if presented != expected {
        return Err(AppError::unauthorized("invalid webhook secret"));
    }
    Ok(())
}

/// Parse `Authorization: Bearer <poll_id> <chain_slug> <signature>`, recover
/// the signer of the ownership digest, and compare it (case-insensitively)
/// against the poll owner reported by the indexing oracle.
pub(crate) async fn verify_coordinator_signature(
    headers: &HeaderMap,
    oracle: &dyn OwnershipOracle,
    verifier: &dyn SignatureVerifier,
) -> AppResult<AuthorizedPoll> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("missing authorization header"))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::unauthorized("authorization must be a bearer token"))?;

    let mut parts = token.split_whitespace();
    let (Some(poll_id), Some(slug), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AppError::unauthorized(
            "bearer token must be `<poll_id> <chain> <signature>`",
        ));
    };

    let chain = SupportedChain::from_slug(slug)
        .ok_or_else(|| AppError::unauthorized(format!("unknown chain {slug:?}")))?;

    let digest = ownership_digest(poll_id, chain);
    let recovered = verifier.recover_signer(&digest, signature).await?;
    let owner = oracle.fetch_poll_owner(poll_id, chain).await?;

    if recovered.to_lowercase() != owner.to_lowercase() {
        return Err(AppError::forbidden(
            "signature does not match the poll owner",
        ));
    }

    Ok(AuthorizedPoll {
        poll_id: poll_id.to_string(),
        chain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use axum::http::{header::AUTHORIZATION, HeaderValue, StatusCode};

    use tallyd_core::{CoordinatorError, Result as CoreResult};

    struct StaticOracle {
        owner: String,
    }

    #[async_trait]
    impl OwnershipOracle for StaticOracle {
        async fn fetch_poll_owner(
            &self,
            _poll_id: &str,
            _chain: SupportedChain,
        ) -> CoreResult<String> {
            Ok(self.owner.clone())
        }
    }

    /// Echoes a fixed address for any signature, recording nothing.
    struct StaticVerifier {
        recovered: String,
    }

    #[async_trait]
    impl SignatureVerifier for StaticVerifier {
        async fn recover_signer(
            &self,
            _digest: &str,
            _signature: &str,
        ) -> CoreResult<String> {
            if self.recovered.is_empty() {
                return Err(CoordinatorError::Signer("malformed signature".into()));
            }
            Ok(self.recovered.clone())
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn owner_signature_is_accepted_case_insensitively() {
        let oracle = StaticOracle {
            owner: "0xABCDEF".into(),
        };
        let verifier = StaticVerifier {
            recovered: "0xabcdef".into(),
        };

        let authorized = verify_coordinator_signature(
            &bearer("7 optimism 0xsig"),
            &oracle,
            &verifier,
        )
        .await
        .unwrap();

        assert_eq!(authorized.poll_id, "7");
        assert_eq!(authorized.chain, SupportedChain::Optimism);
    }

    #[tokio::test]
    async fn foreign_signer_is_forbidden() {
        let oracle = StaticOracle {
            owner: "0xowner".into(),
        };
        let verifier = StaticVerifier {
            recovered: "0xintruder".into(),
        };

        let err = verify_coordinator_signature(
            &bearer("7 optimism 0xsig"),
            &oracle,
            &verifier,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let oracle = StaticOracle {
            owner: "0xowner".into(),
        };
        let verifier = StaticVerifier {
            recovered: "0xowner".into(),
        };

        let err = verify_coordinator_signature(&HeaderMap::new(), &oracle, &verifier)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_bearer_token_is_unauthorized() {
        let oracle = StaticOracle {
            owner: "0xowner".into(),
        };
        let verifier = StaticVerifier {
            recovered: "0xowner".into(),
        };

        for token in ["justsig", "7 optimism", "7 not_a_chain 0xsig", "a b c d"] {
            let err =
                verify_coordinator_signature(&bearer(token), &oracle, &verifier)
                    .await
                    .unwrap_err();
            assert_eq!(err.status, StatusCode::UNAUTHORIZED, "token {token:?}");
        }
    }

    #[test]
    fn webhook_secret_must_match() {
        let mut headers = HeaderMap::new();
        headers.insert("x-webhook-secret", HeaderValue::from_static("s3cret"));

        assert!(verify_webhook_secret(&headers, "x-webhook-secret", "s3cret").is_ok());
        assert_eq!(
            verify_webhook_secret(&headers, "x-webhook-secret", "other")
                .unwrap_err()
                .status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            verify_webhook_secret(&HeaderMap::new(), "x-webhook-secret", "s3cret")
                .unwrap_err()
                .status,
            StatusCode::UNAUTHORIZED
        );
    }
}
