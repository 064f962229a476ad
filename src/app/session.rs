//! Per-connection session engine.
//!
//! One WebSocket connection owns one provider instance, at most one universe
//! manager and one tick pump. The handler task itself is the reader and the
//! only place session configuration changes; a dedicated writer task is the
//! only socket sender. Closing the socket tears everything down.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::protocol::{parse_client_message, ClientMessage, ServerFrame};
use super::state::AppState;
use crate::core::domain::{FilterSpec, Order, UniverseUpdate};
use crate::core::instrument::InstrumentMaster;
use crate::core::provider::{build_provider, MarketDataProvider};
use crate::core::store::PaperFillStore;
use crate::core::universe::{UniverseManager, UniverseResolver};
use crate::error::Error;

/// Outbound queue depth per session.
const OUTBOUND_BUFFER: usize = 64;

/// Session flags shared between the reader (writes) and the pump/writer
/// tasks (read).
struct SessionFlags {
    protocol_version: AtomicU8,
    paper_trade: AtomicBool,
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self {
            protocol_version: AtomicU8::new(1),
            paper_trade: AtomicBool::new(true),
        }
    }
}

/// Handles to a running universe manager: the shutdown signal plus the
/// manager and forwarder tasks.
struct UniverseTask {
    stop: watch::Sender<bool>,
    manager: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl UniverseTask {
    /// Signal first so the loop does no further writes, then abort.
    fn shutdown(self) {
        let _ = self.stop.send(true);
        self.manager.abort();
        self.forwarder.abort();
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state))
}

pub async fn run_session(mut socket: WebSocket, state: AppState) {
    info!("Session opened");

    let provider =
        match build_provider(&state.config, None, &state.token_store, &state.master) {
            Ok(provider) => provider,
            Err(e) => {
                error!(error = %e, "Provider construction failed");
                send_error_frame(&mut socket, &e).await;
                return;
            }
        };

    if let Err(e) = provider.connect().await {
        error!(error = %e, "Provider connect failed");
        send_error_frame(&mut socket, &e).await;
        return;
    }

    let paper_path = state
        .config
        .paper_db_for_provider(&state.config.active_provider);
    let paper = match PaperFillStore::open(paper_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Paper store unavailable");
            send_error_frame(&mut socket, &e).await;
            return;
        }
    };

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_BUFFER);
    let flags = Arc::new(SessionFlags::default());

    let writer_flags = Arc::clone(&flags);
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let version = writer_flags.protocol_version.load(Ordering::Relaxed);
            match frame.to_wire(version) {
                Ok(wire) => {
                    if ws_tx.send(Message::Text(wire)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Failed to encode outbound frame"),
            }
        }
    });

    let mut tick_task: Option<JoinHandle<()>> = None;
    let mut universe: Option<UniverseTask> = None;

    while let Some(message) = ws_rx.next().await {
        let message = match message {
            Ok(message) => message,
            Err(_) => break,
        };
        match message {
            Message::Text(text) => match parse_client_message(&text) {
                Some(ClientMessage::Configure(payload)) => {
                    flags
                        .protocol_version
                        .store(payload.protocol_version, Ordering::Relaxed);
                    flags.paper_trade.store(payload.paper_trade, Ordering::Relaxed);
                    info!(
                        protocol_version = payload.protocol_version,
                        paper_trade = payload.paper_trade,
                        "Session configured"
                    );

                    if let Some(filter) = payload.filter {
                        // Exactly one manager may be active; the old one is
                        // stopped before it could race on subscriptions.
                        if let Some(previous) = universe.take() {
                            previous.shutdown();
                        }
                        universe = Some(start_universe(
                            filter,
                            Arc::clone(&provider),
                            Arc::clone(&state.master),
                            out_tx.clone(),
                        ));
                    } else if let Some(symbols) = payload.subscribe {
                        if let Some(previous) = universe.take() {
                            previous.shutdown();
                        }
                        static_subscribe(&provider, &out_tx, payload.protocol_version, symbols)
                            .await;
                    }

                    if tick_task.is_none() {
                        tick_task =
                            Some(spawn_tick_pump(Arc::clone(&provider), out_tx.clone()));
                    }
                }
                Some(ClientMessage::Order(order)) => handle_order(&paper, &flags, &order),
                None => debug!("Ignoring unintelligible client message"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(universe) = universe.take() {
        universe.shutdown();
    }
    if let Some(tick_task) = tick_task.take() {
        tick_task.abort();
    }
    writer.abort();
    info!("Session closed");
}

/// Replace the provider's subscriptions and, on v2, emit the synthetic
/// universe snapshot so clients learn their starting set.
async fn static_subscribe(
    provider: &Arc<dyn MarketDataProvider>,
    out_tx: &mpsc::Sender<ServerFrame>,
    protocol_version: u8,
    symbols: Vec<String>,
) {
    if let Err(e) = provider.set_subscriptions(&symbols).await {
        warn!(error = %e, "Static subscribe failed");
        return;
    }
    if protocol_version >= 2 {
        let update =
            UniverseUpdate::new(symbols.clone(), Vec::new(), symbols, "static_subscribe");
        let _ = out_tx.send(ServerFrame::Universe(update)).await;
    }
}

/// Spawn a manager plus the forwarder that maps its updates onto the
/// session's outbound channel. The manager gets only the send capability,
/// never the session itself.
fn start_universe(
    spec: FilterSpec,
    provider: Arc<dyn MarketDataProvider>,
    master: Arc<InstrumentMaster>,
    out_tx: mpsc::Sender<ServerFrame>,
) -> UniverseTask {
    let (update_tx, mut update_rx) = mpsc::channel::<UniverseUpdate>(32);
    let resolver = UniverseResolver::new(master);
    let (manager, stop) = UniverseManager::new(spec, provider, resolver, update_tx);
    let manager_task = tokio::spawn(manager.run());
    let forwarder = tokio::spawn(async move {
        while let Some(update) = update_rx.recv().await {
            if out_tx.send(ServerFrame::Universe(update)).await.is_err() {
                break;
            }
        }
    });
    UniverseTask {
        stop,
        manager: manager_task,
        forwarder,
    }
}

/// Forward the provider's tick sequence to the client in provider order.
fn spawn_tick_pump(
    provider: Arc<dyn MarketDataProvider>,
    out_tx: mpsc::Sender<ServerFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match provider.next_tick().await {
                Ok(tick) => {
                    if out_tx.send(ServerFrame::Tick(tick)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Tick stream ended");
                    break;
                }
            }
        }
    })
}

fn handle_order(paper: &PaperFillStore, flags: &SessionFlags, order: &Order) {
    if flags.paper_trade.load(Ordering::Relaxed) {
        match paper.execute_order(order) {
            Ok(order_id) => debug!(order_id, symbol = %order.symbol, "Paper order filled"),
            Err(e) => error!(error = %e, symbol = %order.symbol, "Paper order failed"),
        }
    } else {
        info!(symbol = %order.symbol, "Live order routing not implemented");
    }
}

/// Best-effort error frame on a socket that has not been split yet.
async fn send_error_frame(socket: &mut WebSocket, error: &Error) {
    if let Ok(wire) = ServerFrame::Error(error.to_string()).to_wire(2) {
        let _ = socket.send(Message::Text(wire)).await;
    }
}
