//! Error types and handling for LudoRush

use thiserror::Error;

/// Result type alias for LudoRush operations
pub type Result<T> = std::result::Result<T, Error>;

/// LudoRush error types
///
/// Gameplay errors are returned synchronously to the requesting connection
/// and never broadcast; every validator runs before any state mutation, so
/// a rejected action leaves the game untouched.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Not your turn")]
    NotYourTurn,

    #[error("Action not valid in {0} phase")]
    InvalidPhase(&'static str),

    #[error("Game is not active")]
    GameNotActive,

    #[error("Invalid token index: {0}")]
    InvalidToken(u8),

    #[error("Move is not legal for the current dice value")]
    MoveNotLegal,

    #[error("Insufficient funds: need {needed} chips, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("Unknown game: {0}")]
    InvalidGame(String),

    #[error("Connection is not part of any game")]
    NotInGame,

    #[error("Already queued for this stake")]
    AlreadyQueued,

    #[error("Matching already in progress for this stake")]
    MatchingInProgress,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code carried in wire-level error events.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotYourTurn => "not_your_turn",
            Error::InvalidPhase(_) => "invalid_phase",
            Error::GameNotActive => "game_not_active",
            Error::InvalidToken(_) => "invalid_token",
            Error::MoveNotLegal => "move_not_legal",
            Error::InsufficientFunds { .. } => "insufficient_funds",
            Error::InvalidGame(_) => "invalid_game",
            Error::NotInGame => "not_in_game",
            Error::AlreadyQueued => "already_queued",
            Error::MatchingInProgress => "matching_in_progress",
            Error::InvalidAmount(_) => "invalid_amount",
            Error::InvalidData(_) => "invalid_data",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Persistence(_) => "persistence_error",
            Error::Transport(_) => "transport_error",
            Error::Config(_) => "config_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(format!("JSON error: {}", err))
    }
}
