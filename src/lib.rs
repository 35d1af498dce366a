//! LudoRush - authoritative server core for two-player real-money Ludo
//!
//! The server is the sole source of truth for token positions, dice
//! outcomes, turn order and payouts. Three tightly coupled subsystems make
//! that hard, and they live here:
//! - game: the deterministic per-game state machine (dice, legal moves,
//!   captures, timeouts, disconnects, wins)
//! - matchmaking: race-free per-stake pairing with atomic fee reservation
//! - wallet: an idempotent, auditable ledger for every chip movement
//!
//! Everything else is reached through narrow seams: a `Repository` trait
//! for durable storage and a per-connection handle for the transport.

pub mod config;
pub mod error;
pub mod game;
pub mod matchmaking;
pub mod persistence;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod wallet;

// Re-export commonly used types for easy access
pub use config::{Config, MatchmakingConfig, ServerConfig, TimingConfig};
pub use error::{Error, Result};
pub use game::{Game, GameSession, GameStatus, SessionHandle};
pub use matchmaking::{MatchRequest, MatchmakingQueue};
pub use persistence::{InMemoryRepository, Repository};
pub use protocol::{Chips, ClientAction, ConnectionId, GameId, Slot, UserId, Winner};
pub use registry::{GameRegistry, MatchedPlayer};
pub use transport::{ConnectionHandle, ServerEvent};
pub use wallet::{TransactionKind, WalletLedger, WalletTransaction};
