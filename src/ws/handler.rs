//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{MatchHandle, ParticipantInput};
use crate::util::rate_limit::ParticipantRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let participant_id = Uuid::new_v4();
    info!(participant_id = %participant_id, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, participant_id, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, participant_id: Uuid, state: AppState) {
    info!(participant_id = %participant_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();

    // Single writer owns the sink; everything outbound goes through this queue
    let (out_tx, out_rx) = mpsc::channel::<ServerMsg>(128);
    let writer_handle = tokio::spawn(write_loop(participant_id, ws_sink, out_rx));

    let welcome = ServerMsg::Welcome {
        participant_id,
        server_time: unix_millis(),
    };
    if out_tx.send(welcome).await.is_err() {
        error!(participant_id = %participant_id, "Failed to queue welcome");
        writer_handle.abort();
        return;
    }

    let mut session = ConnectionSession::new(participant_id, out_tx);
    run_session(&mut session, ws_stream, &state).await;

    // Cleanup on disconnect
    session.leave(&state).await;
    writer_handle.abort();

    info!(participant_id = %participant_id, "WebSocket connection closed");
}

/// Reader loop: WebSocket -> match
async fn run_session(
    session: &mut ConnectionSession,
    mut ws_stream: SplitStream<WebSocket>,
    state: &AppState,
) {
    let participant_id = session.participant_id;
    let rate_limiter = ParticipantRateLimiter::new();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_action() {
                    warn!(participant_id = %participant_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::JoinMatch { match_id }) => session.join(state, match_id).await,
                    Ok(ClientMsg::LeaveMatch) => session.leave(state).await,
                    Ok(msg) => session.forward(msg).await,
                    Err(e) => {
                        warn!(participant_id = %participant_id, error = %e, "Failed to parse client message");
                        session
                            .reply_error("bad_message", format!("Unreadable message: {e}"))
                            .await;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(participant_id = %participant_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                debug!(participant_id = %participant_id, "Received control frame");
            }
            Ok(Message::Close(_)) => {
                info!(participant_id = %participant_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(participant_id = %participant_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}

/// One connection's link to the match it is placed in
struct ConnectionSession {
    participant_id: Uuid,
    out_tx: mpsc::Sender<ServerMsg>,
    current: Option<MatchHandle>,
    forwarder: Option<JoinHandle<()>>,
}

impl ConnectionSession {
    fn new(participant_id: Uuid, out_tx: mpsc::Sender<ServerMsg>) -> Self {
        Self {
            participant_id,
            out_tx,
            current: None,
            forwarder: None,
        }
    }

    fn input(&self, msg: ClientMsg) -> ParticipantInput {
        ParticipantInput {
            participant_id: self.participant_id,
            msg,
            received_at: unix_millis(),
        }
    }

    async fn reply_error(&self, code: &str, message: String) {
        let _ = self
            .out_tx
            .send(ServerMsg::Error {
                participant_id: Some(self.participant_id),
                code: code.to_string(),
                message,
            })
            .await;
    }

    async fn join(&mut self, state: &AppState, requested: Option<Uuid>) {
        let handle = match state.sessions.join(self.participant_id, requested) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(participant_id = %self.participant_id, error = %e, "Join refused");
                self.reply_error(e.code(), e.to_string()).await;
                return;
            }
        };

        // Subscribe before joining so the join confirmation is not missed
        let snapshot_rx = handle.snapshot_tx.subscribe();
        self.forwarder = Some(tokio::spawn(forward_loop(
            self.participant_id,
            snapshot_rx,
            self.out_tx.clone(),
        )));

        let join = self.input(ClientMsg::JoinMatch {
            match_id: Some(handle.id),
        });
        if handle.input_tx.send(join).await.is_err() {
            error!(participant_id = %self.participant_id, match_id = %handle.id, "Match stopped before join");
            state.sessions.leave(&self.participant_id);
            self.stop_forwarder();
            self.reply_error("match_closed", "Match is no longer running".to_string())
                .await;
            return;
        }
        self.current = Some(handle);
    }

    async fn forward(&mut self, msg: ClientMsg) {
        let Some(handle) = &self.current else {
            self.reply_error("not_in_match", "Join a match first".to_string())
                .await;
            return;
        };
        if handle.input_tx.send(self.input(msg)).await.is_err() {
            debug!(participant_id = %self.participant_id, "Input channel closed");
            self.current = None;
            self.stop_forwarder();
        }
    }

    async fn leave(&mut self, state: &AppState) {
        if let Some(handle) = self.current.take() {
            // Signal the leave to the match loop
            let _ = handle.input_tx.send(self.input(ClientMsg::LeaveMatch)).await;
        }
        state.sessions.leave(&self.participant_id);
        self.stop_forwarder();
    }

    fn stop_forwarder(&mut self) {
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
    }
}

/// Match broadcast -> this connection, dropping messages addressed to others
async fn forward_loop(
    participant_id: Uuid,
    mut snapshot_rx: broadcast::Receiver<ServerMsg>,
    out_tx: mpsc::Sender<ServerMsg>,
) {
    loop {
        match snapshot_rx.recv().await {
            Ok(msg) => {
                if !msg.is_for(participant_id) {
                    continue;
                }
                if out_tx.send(msg).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                // Next snapshot carries the full state again
                warn!(participant_id = %participant_id, lagged_count = n, "Client lagged, skipping messages");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(participant_id = %participant_id, "Match channel closed");
                break;
            }
        }
    }
}

/// Outbound queue -> WebSocket
async fn write_loop(
    participant_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = out_rx.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(participant_id = %participant_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
