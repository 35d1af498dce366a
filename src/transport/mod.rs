//! Transport seam
//!
//! The core talks to clients through a narrow contract: a per-connection
//! handle carrying typed `ServerEvent`s out, and `ClientAction`s routed in
//! by the gateway. Wire framing (WebSocket, JSON text frames) lives in
//! `ws`; nothing in the engine knows about sockets.

pub mod ws;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::game::state::{Game, TurnPhase};
use crate::protocol::{Chips, ConnectionId, GameId, Slot, TokenMove, UserId, Winner};

/// Typed events pushed to clients. Gameplay errors are delivered only to
/// the requesting connection, never broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    Queued {
        stake: Chips,
    },
    QueueCancelled {
        stake: Chips,
    },
    MatchFound {
        game_id: GameId,
        slot: Slot,
        opponent: String,
        stake: Chips,
        prize_pool: Chips,
    },
    DiceResult {
        slot: Slot,
        value: u8,
        consecutive_sixes: u8,
        moves: Vec<TokenMove>,
    },
    MoveResult {
        slot: Slot,
        mv: TokenMove,
    },
    TurnChange {
        current_slot: Slot,
        phase: TurnPhase,
        deadline_secs: u64,
    },
    GameOver {
        winner: Winner,
    },
    OpponentDisconnected {
        slot: Slot,
        window_secs: u64,
    },
    OpponentReconnected {
        slot: Slot,
    },
    /// Full authoritative state, sent to a player on reconnection
    StateSync {
        game: Box<Game>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(err: &crate::error::Error) -> Self {
        ServerEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Outbound side of one client connection.
///
/// Sends never block and never fail the caller: a dead connection is a
/// transport concern, logged and otherwise ignored by the engine.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, user_id: UserId, tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { id, user_id, tx }
    }

    /// Fresh handle plus its event receiver; the gateway (or a test) drains
    /// the receiver.
    pub fn pair(user_id: &str) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self::new(uuid::Uuid::new_v4(), user_id.to_string(), tx),
            rx,
        )
    }

    pub fn send(&self, event: ServerEvent) {
        if self.tx.send(event).is_err() {
            warn!(connection = %self.id, user = %self.user_id, "event dropped, connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
