//! Game engine for two-player Ludo
//!
//! Layered bottom-up:
//! - `board`: pure geometry (ring, lanes, safe cells, landings, paths)
//! - `dice`: CSPRNG die rolls, deterministic sources for tests
//! - `state`: the entity model owned by one session
//! - `moves`: legal-move computation for the active player
//! - `turns`: the roll/move state machine, penalties and win detection
//! - `session`: the actor serializing all mutations to one game

pub mod board;
pub mod dice;
pub mod moves;
pub mod session;
pub mod state;
pub mod turns;

pub use dice::{DiceSource, ScriptedDice, SecureDice, SeededDice};
pub use session::{GameEnded, GameSession, SessionCommand, SessionHandle};
pub use state::{Game, GameStatus, Player, TurnPhase, TurnState};
