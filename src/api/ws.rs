//! WebSocket transport for simulation sessions.
//!
//! Bridges an upgraded socket to [`SessionOrchestrator::run_connection`]:
//! the read half becomes a stream of [`Inbound`] frames and a writer task
//! drains the session's [`Outbound`] channel into the write half.

use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::AppState;
use crate::simulation::{Inbound, Outbound, SessionOrchestrator};

const OUTBOUND_BUFFER: usize = 32;

#[derive(Debug, Deserialize)]
pub struct TicketQuery {
    #[serde(default)]
    pub ticket: Option<String>,
}

/// GET /api/simulation?ticket=... - Upgrade to the simulation channel.
pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<TicketQuery>,
) -> Response {
    let orchestrator = state.orchestrator.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, orchestrator, query.ticket))
}

fn to_inbound(frame: Result<Message, axum::Error>) -> Option<Inbound> {
    match frame {
        Ok(Message::Text(text)) => Some(Inbound::Text(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => Some(Inbound::Binary(bytes.to_vec())),
        Ok(Message::Ping(_) | Message::Pong(_)) => None,
        Ok(Message::Close(_)) => Some(Inbound::Closed),
        Err(e) => {
            debug!(error = %e, "WebSocket read failed");
            Some(Inbound::Closed)
        }
    }
}

async fn serve_socket(socket: WebSocket, orchestrator: SessionOrchestrator, ticket: Option<String>) {
    let (mut sink, stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                Outbound::Message(message) => {
                    let text = match message.to_frame() {
                        Ok(text) => text,
                        Err(e) => {
                            error!(kind = message.kind(), error = %e, "Failed to encode frame");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close(reason) => {
                    let frame = CloseFrame {
                        code: reason.code,
                        reason: reason.reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    let inbound = stream.filter_map(|frame| futures::future::ready(to_inbound(frame)));
    orchestrator.run_connection(ticket, inbound, tx).await;

    if let Err(e) = writer.await {
        error!(error = %e, "WebSocket writer task failed");
    }
}
