//! Game entity model
//!
//! The authoritative state for one two-player match: players, tokens, turn
//! state and the append-only history log. Everything here is plain data
//! with pure mutators; exactly one session task owns a `Game` at runtime,
//! so none of these types carry locks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{
    Chips, ConnectionId, GameId, Slot, TokenMove, TokenPosition, UserId, WinReason, Winner,
    TOKENS_PER_PLAYER,
};

/// Lifecycle status of a game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Active,
    Paused,
    Finished,
}

/// Phase within the active player's turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Roll,
    Move,
}

impl TurnPhase {
    pub fn name(self) -> &'static str {
        match self {
            TurnPhase::Roll => "roll",
            TurnPhase::Move => "move",
        }
    }
}

/// Why the same player keeps the turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraTurnReason {
    Six,
    Capture,
    Finish,
}

/// One seated player. The slot is fixed for the game's lifetime;
/// reconnection replaces the connection id in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(skip)]
    pub connection_id: Option<ConnectionId>,
    pub connected: bool,
    pub forfeited: bool,
    pub tokens: [TokenPosition; TOKENS_PER_PLAYER],
}

impl Player {
    fn new(user_id: UserId, display_name: String, connection_id: ConnectionId) -> Self {
        Self {
            user_id,
            display_name,
            connection_id: Some(connection_id),
            connected: true,
            forfeited: false,
            tokens: [
                TokenPosition::Home(1),
                TokenPosition::Home(2),
                TokenPosition::Home(3),
                TokenPosition::Home(4),
            ],
        }
    }

    pub fn finished_tokens(&self) -> usize {
        self.tokens.iter().filter(|t| t.is_finished()).count()
    }

    pub fn has_won(&self) -> bool {
        self.finished_tokens() == TOKENS_PER_PLAYER
    }

    pub fn tokens_on_ring(&self) -> usize {
        self.tokens
            .iter()
            .filter(|t| matches!(t, TokenPosition::Board(_)))
            .count()
    }

    pub fn tokens_at_home(&self) -> usize {
        self.tokens
            .iter()
            .filter(|t| matches!(t, TokenPosition::Home(_)))
            .count()
    }

    /// Lowest home slot (1-4) not currently occupied by one of this
    /// player's tokens; captured tokens return here.
    pub fn lowest_free_home_slot(&self) -> u8 {
        for slot in 1..=TOKENS_PER_PLAYER as u8 {
            let taken = self
                .tokens
                .iter()
                .any(|t| matches!(t, TokenPosition::Home(s) if *s == slot));
            if !taken {
                return slot;
            }
        }
        // All four tokens at home means every slot is taken and nothing
        // can be captured; unreachable from a capture path.
        1
    }
}

/// Turn state, recomputed on every roll.
///
/// `epoch` is the state-version token carried by scheduled timers: a fired
/// timer whose epoch no longer matches is a stale no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnState {
    pub current_slot: Slot,
    pub phase: TurnPhase,
    pub dice: Option<u8>,
    pub consecutive_sixes: u8,
    pub turn_started_at: DateTime<Utc>,
    pub legal_moves: Vec<TokenMove>,
    pub epoch: u64,
}

impl TurnState {
    fn new(starting_slot: Slot) -> Self {
        Self {
            current_slot: starting_slot,
            phase: TurnPhase::Roll,
            dice: None,
            consecutive_sixes: 0,
            turn_started_at: Utc::now(),
            legal_moves: Vec::new(),
            epoch: 0,
        }
    }
}

/// Append-only audit record; never consulted for gameplay decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub timestamp: DateTime<Utc>,
    pub slot: Option<Slot>,
    #[serde(flatten)]
    pub entry: HistoryEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEntry {
    GameCreated { stake: Chips },
    DiceRolled { value: u8, consecutive_sixes: u8 },
    MoveApplied { mv: TokenMove },
    ThreeSixesPenalty,
    NoLegalMoves { extra_turn: bool },
    ExtraTurn { reason: ExtraTurnReason },
    TurnPassed { to: Slot },
    TurnTimeout { phase: TurnPhase },
    PlayerForfeited,
    PlayerDisconnected,
    PlayerReconnected,
    GameFinished { reason: WinReason },
}

/// Complete state of one match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub game_id: GameId,
    pub status: GameStatus,
    pub stake: Chips,
    pub commission: Chips,
    pub prize_pool: Chips,
    pub players: [Player; 2],
    pub turn: TurnState,
    pub history: Vec<HistoryEvent>,
    pub winner: Option<Winner>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Seat assignment input for `Game::new`
#[derive(Debug, Clone)]
pub struct SeatedPlayer {
    pub user_id: UserId,
    pub display_name: String,
    pub connection_id: ConnectionId,
}

impl Game {
    /// Create a new active game. Commission and prize pool are derived from
    /// the stake here and never recomputed afterwards.
    pub fn new(game_id: GameId, stake: Chips, seats: [SeatedPlayer; 2], starting_slot: Slot) -> Self {
        let players = seats.map(|s| Player::new(s.user_id, s.display_name, s.connection_id));
        let mut game = Self {
            game_id,
            status: GameStatus::Active,
            stake,
            commission: stake.commission(),
            prize_pool: stake.prize_pool(),
            players,
            turn: TurnState::new(starting_slot),
            history: Vec::new(),
            winner: None,
            created_at: Utc::now(),
            ended_at: None,
        };
        game.record(None, HistoryEntry::GameCreated { stake });
        game
    }

    pub fn player(&self, slot: Slot) -> &Player {
        &self.players[slot.index()]
    }

    pub fn player_mut(&mut self, slot: Slot) -> &mut Player {
        &mut self.players[slot.index()]
    }

    pub fn active_player(&self) -> &Player {
        self.player(self.turn.current_slot)
    }

    pub fn slot_of_user(&self, user_id: &str) -> Option<Slot> {
        Slot::both()
            .into_iter()
            .find(|slot| self.player(*slot).user_id == user_id)
    }

    pub fn slot_of_connection(&self, connection_id: ConnectionId) -> Option<Slot> {
        Slot::both()
            .into_iter()
            .find(|slot| self.player(*slot).connection_id == Some(connection_id))
    }

    pub fn is_active(&self) -> bool {
        self.status == GameStatus::Active
    }

    /// Opponent tokens of `slot` standing on a given ring cell
    pub fn opponent_tokens_on_cell(&self, slot: Slot, cell: u8) -> Vec<u8> {
        self.player(slot.opponent())
            .tokens
            .iter()
            .enumerate()
            .filter(|(_, pos)| matches!(pos, TokenPosition::Board(c) if *c == cell))
            .map(|(idx, _)| idx as u8)
            .collect()
    }

    /// Append an audit event
    pub fn record(&mut self, slot: Option<Slot>, entry: HistoryEntry) {
        self.history.push(HistoryEvent {
            timestamp: Utc::now(),
            slot,
            entry,
        });
    }

    /// Mark terminal state with a winner; idempotent callers guard on status.
    pub fn finish(&mut self, winner: Winner) {
        self.record(Some(winner.slot), HistoryEntry::GameFinished {
            reason: winner.reason,
        });
        self.status = GameStatus::Finished;
        self.ended_at = Some(Utc::now());
        self.winner = Some(winner);
    }

    /// Structural invariant check used by debug assertions and tests:
    /// every player holds exactly 4 well-formed token coordinates.
    pub fn tokens_well_formed(&self) -> bool {
        self.players
            .iter()
            .all(|p| p.tokens.iter().all(|t| t.is_well_formed()))
    }
}
