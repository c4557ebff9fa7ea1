//! Websocket proof sessions.
//!
//! One session drives one finalization attempt. Authorization happens before
//! the upgrade, from the request headers; the first text frame is the start
//! request and every subsequent server-to-client frame is a JSON
//! [`ProofSessionEvent`].

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use tallyd_core::{EventSink, Lease, RunOptions};
use tallyd_model::{PollIdentity, ProofSessionEvent, ProofSessionRequest};

use crate::auth::{authorize, AuthPolicy, AuthorizedPoll};
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

pub async fn proof_session(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let authorized = authorize(&state, AuthPolicy::RequiresCoordinatorSignature, &headers)
        .await?
        .ok_or_else(|| AppError::unauthorized("missing session authorization"))?;

    Ok(ws.on_upgrade(move |socket| handle_session(socket, state, authorized)))
}

async fn handle_session(socket: WebSocket, state: AppState, authorized: AuthorizedPoll) {
    let (mut sender, mut receiver) = socket.split();

    let Some(request) = read_start_request(&mut receiver, &mut sender).await else {
        return;
    };

    // The signature authorized exactly one poll; the start request must not
    // widen that scope.
    if request.poll_id != authorized.poll_id || request.chain != authorized.chain {
        send_error(
            &mut sender,
            "session",
            "start request does not match the authorized poll".into(),
        )
        .await;
        return;
    }

    let identity = PollIdentity {
        contract_address: request.contract_address.clone(),
        poll_id: request.poll_id.clone(),
        chain: request.chain,
    };

    let poll = match state.registry.get(&identity).await {
        Ok(poll) => poll,
        Err(err) => {
            send_error(&mut sender, "session", err.to_string()).await;
            return;
        }
    };
    if poll.is_finalized() {
        send_error(&mut sender, "session", "poll is already finalized".into()).await;
        return;
    }

    let lease = match state
        .registry
        .acquire_lease(&identity, state.config.lease_ttl)
        .await
    {
        Ok(Some(lease)) => lease,
        Ok(None) => {
            send_error(
                &mut sender,
                "session",
                "finalization already in progress".into(),
            )
            .await;
            return;
        }
        Err(err) => {
            send_error(&mut sender, "session", err.to_string()).await;
            return;
        }
    };

    info!("Proof session opened for poll {}", identity);
    run_session(state, &identity, poll, request, lease, sender).await;
}

/// Skip control frames until the first text frame, which must decode as the
/// start request. Returns `None` when the client went away first.
async fn read_start_request(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    sender: &mut SplitSink<WebSocket, Message>,
) -> Option<ProofSessionRequest> {
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ProofSessionRequest>(text.as_str()) {
                    Ok(request) => return Some(request),
                    Err(err) => {
                        send_error(
                            sender,
                            "session",
                            format!("invalid start request: {err}"),
                        )
                        .await;
                        return None;
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!("Client closed before sending a start request");
                return None;
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                warn!("Websocket receive failed before start: {}", err);
                return None;
            }
        }
    }
}

async fn run_session(
    state: AppState,
    identity: &PollIdentity,
    poll: tallyd_model::ScheduledPoll,
    request: ProofSessionRequest,
    lease: Lease,
    mut sender: SplitSink<WebSocket, Message>,
) {
    let (sink, mut events) = EventSink::channel(64);

    // Forward pipeline events to the socket; a failed send ends forwarding
    // and, by dropping the receiver, flips the sink to disconnected.
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    error!("Failed to serialize session event: {}", err);
                    continue;
                }
            };
            if sender.send(Message::Text(frame.into())).await.is_err() {
                debug!("Session listener went away, stopping event forwarding");
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Bounded like scheduler runs: the session must not outlive its lease.
    let result = state
        .pipeline
        .run_bounded(
            &poll,
            &request,
            &sink,
            RunOptions {
                submit_requires_listener: true,
            },
            state.config.pipeline_timeout,
        )
        .await;

    if let Err(err) = state.registry.release_lease(identity, &lease).await {
        warn!("Failed to release lease for poll {}: {}", identity, err);
    }

    // Close the channel so the forwarder drains and exits.
    drop(sink);
    if forwarder.await.is_err() {
        warn!("Event forwarder for poll {} panicked", identity);
    }

    match result {
        Ok(_) => info!("Proof session for poll {} finalized", identity),
        Err(err) => warn!("Proof session for poll {} failed: {}", identity, err),
    }
}

/// Session-level error emitted before the pipeline owns the socket.
async fn send_error(sender: &mut SplitSink<WebSocket, Message>, stage: &str, message: String) {
    let event = ProofSessionEvent::Error {
        stage: stage.to_string(),
        message,
    };
    match serde_json::to_string(&event) {
        Ok(frame) => {
            let _ = sender.send(Message::Text(frame.into())).await;
            let _ = sender.close().await;
        }
        Err(err) => error!("Failed to serialize session error: {}", err),
    }
}
