//! Core protocol types for LudoRush
//!
//! Shared vocabulary between the game engine, matchmaking, wallet and the
//! transport gateway:
//! - Identifiers (users, games, connections)
//! - `Chips` currency newtype with checked arithmetic
//! - Board coordinates (`TokenPosition`) and computed moves (`TokenMove`)
//! - The closed `ClientAction` tagged union dispatched by pattern matching

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// External user identity, assigned by the identity layer upstream.
pub type UserId = String;

/// Game identifier
pub type GameId = Uuid;

/// Per-connection identifier assigned by the transport gateway
pub type ConnectionId = Uuid;

/// Players per game. The engine is two-player only.
pub const PLAYERS_PER_GAME: usize = 2;

/// Tokens per player
pub const TOKENS_PER_PLAYER: usize = 4;

/// House commission, percent of a single stake
pub const COMMISSION_PERCENT: u64 = 20;

/// Helper to mint a fresh game id
pub fn new_game_id() -> GameId {
    Uuid::new_v4()
}

/// Player seat, fixed for the lifetime of a game.
///
/// The slot determines board geometry (entry cell, lane-entry cell) and
/// display color; reconnection swaps the connection handle, never the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Slot {
    P0,
    P1,
}

impl Slot {
    pub fn index(self) -> usize {
        match self {
            Slot::P0 => 0,
            Slot::P1 => 1,
        }
    }

    pub fn opponent(self) -> Slot {
        match self {
            Slot::P0 => Slot::P1,
            Slot::P1 => Slot::P0,
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Slot::P0 => "red",
            Slot::P1 => "yellow",
        }
    }

    pub fn both() -> [Slot; 2] {
        [Slot::P0, Slot::P1]
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> u8 {
        slot.index() as u8
    }
}

impl TryFrom<u8> for Slot {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, String> {
        match value {
            0 => Ok(Slot::P0),
            1 => Ok(Slot::P1),
            other => Err(format!("invalid slot: {}", other)),
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Chip amount in the smallest currency unit
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Chips(u64);

impl Chips {
    pub const ZERO: Chips = Chips(0);

    pub fn new(amount: u64) -> Self {
        Chips(amount)
    }

    pub fn amount(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Add chips with overflow checking
    pub fn checked_add(&self, other: Chips) -> Result<Chips> {
        self.0
            .checked_add(other.0)
            .map(Chips)
            .ok_or_else(|| Error::InvalidAmount("chip addition overflow".to_string()))
    }

    /// Subtract chips, failing when the balance would go negative
    pub fn checked_sub(&self, other: Chips) -> Result<Chips> {
        self.0
            .checked_sub(other.0)
            .map(Chips)
            .ok_or(Error::InsufficientFunds {
                needed: other.0,
                available: self.0,
            })
    }

    /// House commission for a game at this stake
    pub fn commission(&self) -> Chips {
        Chips(self.0 * COMMISSION_PERCENT / 100)
    }

    /// Winner payout for a game at this stake: both entry fees less commission
    pub fn prize_pool(&self) -> Chips {
        Chips(self.0 * 2 - self.0 * COMMISSION_PERCENT / 100)
    }
}

impl std::fmt::Display for Chips {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} chips", self.0)
    }
}

/// Board coordinate of a single token.
///
/// The four well-formed (area, position) combinations are the only
/// representable states: home slot 1-4, board cell 1-52, private lane cell
/// 1-6, or finished with no position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "area", content = "cell", rename_all = "snake_case")]
pub enum TokenPosition {
    Home(u8),
    Board(u8),
    Lane(u8),
    Finished,
}

impl TokenPosition {
    pub fn home(slot: u8) -> Result<Self> {
        if (1..=4).contains(&slot) {
            Ok(TokenPosition::Home(slot))
        } else {
            Err(Error::InvalidData(format!("home slot out of range: {}", slot)))
        }
    }

    pub fn board(cell: u8) -> Result<Self> {
        if (1..=52).contains(&cell) {
            Ok(TokenPosition::Board(cell))
        } else {
            Err(Error::InvalidData(format!("board cell out of range: {}", cell)))
        }
    }

    pub fn lane(cell: u8) -> Result<Self> {
        if (1..=6).contains(&cell) {
            Ok(TokenPosition::Lane(cell))
        } else {
            Err(Error::InvalidData(format!("lane cell out of range: {}", cell)))
        }
    }

    pub fn is_well_formed(&self) -> bool {
        match *self {
            TokenPosition::Home(s) => (1..=4).contains(&s),
            TokenPosition::Board(c) => (1..=52).contains(&c),
            TokenPosition::Lane(c) => (1..=6).contains(&c),
            TokenPosition::Finished => true,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TokenPosition::Finished)
    }
}

/// A captured opponent token and the home slot it returns to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub slot: Slot,
    pub token: u8,
    pub to_home_slot: u8,
}

/// One legal move for the active player at the current dice value.
///
/// The cell-by-cell `path` is carried for client animation only; the engine
/// validates against `from`/`to`, never the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMove {
    pub token: u8,
    pub from: TokenPosition,
    pub to: TokenPosition,
    pub opens: bool,
    pub finishes: bool,
    pub capture: Option<Capture>,
    pub path: Vec<TokenPosition>,
}

/// Why a game ended with a winner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinReason {
    Finished,
    Forfeit,
    OpponentDisconnect,
}

/// Terminal result of a game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Winner {
    pub slot: Slot,
    pub user_id: UserId,
    pub payout: Chips,
    pub reason: WinReason,
}

/// Inbound client actions, dispatched by pattern matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    Enqueue { stake: u64 },
    CancelQueue { stake: u64 },
    Roll,
    Move { token: u8 },
    Forfeit,
    Reconnect { game_id: GameId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chips_arithmetic() {
        let a = Chips::new(100);
        let b = Chips::new(40);

        assert_eq!(a.checked_add(b).unwrap(), Chips::new(140));
        assert_eq!(a.checked_sub(b).unwrap(), Chips::new(60));
        assert!(b.checked_sub(a).is_err());
    }

    #[test]
    fn test_prize_pool_and_commission() {
        let stake = Chips::new(50);
        assert_eq!(stake.commission(), Chips::new(10));
        assert_eq!(stake.prize_pool(), Chips::new(90));
    }

    #[test]
    fn test_token_position_constructors() {
        assert!(TokenPosition::board(1).is_ok());
        assert!(TokenPosition::board(52).is_ok());
        assert!(TokenPosition::board(0).is_err());
        assert!(TokenPosition::board(53).is_err());
        assert!(TokenPosition::lane(6).is_ok());
        assert!(TokenPosition::lane(7).is_err());
        assert!(TokenPosition::home(4).is_ok());
        assert!(TokenPosition::home(5).is_err());
    }

    #[test]
    fn test_client_action_wire_format() {
        let action: ClientAction = serde_json::from_str(r#"{"action":"move","token":2}"#).unwrap();
        assert_eq!(action, ClientAction::Move { token: 2 });

        let roll: ClientAction = serde_json::from_str(r#"{"action":"roll"}"#).unwrap();
        assert_eq!(roll, ClientAction::Roll);
    }

    #[test]
    fn test_slot_round_trip() {
        assert_eq!(Slot::P0.opponent(), Slot::P1);
        assert_eq!(Slot::try_from(1u8).unwrap(), Slot::P1);
        assert!(Slot::try_from(2u8).is_err());
    }
}
