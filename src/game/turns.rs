//! Turn-phase state machine
//!
//! Transitions for the Roll and Move phases, the three-sixes penalty, extra
//! turns, forfeit and disconnect resolution, and win detection. Every
//! function validates fully before mutating, so a rejected action leaves
//! the game exactly as it was.

use chrono::Utc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::game::moves::legal_moves;
use crate::game::state::{ExtraTurnReason, Game, GameStatus, HistoryEntry, TurnPhase};
use crate::protocol::{Slot, TokenMove, WinReason, Winner};

/// Rolling this many sixes in a row forfeits the move and passes the turn
pub const MAX_CONSECUTIVE_SIXES: u8 = 3;

/// What a roll resolved to
#[derive(Debug, Clone)]
pub enum RollOutcome {
    /// Third consecutive six: no move phase, turn passes immediately
    ThreeSixesPenalty { value: u8, next_slot: Slot },
    /// Nothing can move; the turn ended automatically. A 6 still grants
    /// the same player another roll.
    NoMoves { value: u8, extra_roll: bool },
    /// Legal moves exist; the player must now choose one
    AwaitMove { value: u8, moves: Vec<TokenMove> },
}

/// What applying a move resolved to
#[derive(Debug, Clone)]
pub enum MoveOutcome {
    /// Same player rolls again
    ExtraTurn {
        applied: TokenMove,
        reason: ExtraTurnReason,
    },
    /// Turn passed to the opponent
    TurnPassed { applied: TokenMove, next_slot: Slot },
    /// The move finished the mover's last token
    GameWon { applied: TokenMove, winner: Winner },
}

/// Resolve a roll request from `slot` with an already-drawn die value.
pub fn handle_roll(game: &mut Game, slot: Slot, value: u8) -> Result<RollOutcome> {
    ensure_active(game)?;
    ensure_turn(game, slot)?;
    if game.turn.phase != TurnPhase::Roll {
        return Err(Error::InvalidPhase("move"));
    }
    debug_assert!((1..=6).contains(&value));

    game.turn.dice = Some(value);
    game.turn.consecutive_sixes = if value == 6 {
        game.turn.consecutive_sixes + 1
    } else {
        0
    };
    let sixes = game.turn.consecutive_sixes;
    game.record(Some(slot), HistoryEntry::DiceRolled {
        value,
        consecutive_sixes: sixes,
    });

    if value == 6 && sixes >= MAX_CONSECUTIVE_SIXES {
        game.record(Some(slot), HistoryEntry::ThreeSixesPenalty);
        pass_turn(game);
        return Ok(RollOutcome::ThreeSixesPenalty {
            value,
            next_slot: game.turn.current_slot,
        });
    }

    let moves = legal_moves(game);
    if moves.is_empty() {
        let extra_roll = value == 6;
        game.record(Some(slot), HistoryEntry::NoLegalMoves {
            extra_turn: extra_roll,
        });
        if extra_roll {
            // Six always grants another action; the six counter survives
            // so three fruitless sixes still trip the penalty.
            grant_roll(game);
        } else {
            pass_turn(game);
        }
        return Ok(RollOutcome::NoMoves { value, extra_roll });
    }

    game.turn.phase = TurnPhase::Move;
    game.turn.legal_moves = moves.clone();
    game.turn.epoch += 1;
    Ok(RollOutcome::AwaitMove {
        value,
        moves,
    })
}

/// Apply the chosen token's move from the current legal-move set.
pub fn apply_move(game: &mut Game, slot: Slot, token: u8) -> Result<MoveOutcome> {
    ensure_active(game)?;
    ensure_turn(game, slot)?;
    if game.turn.phase != TurnPhase::Move {
        return Err(Error::InvalidPhase("roll"));
    }
    if token as usize >= crate::protocol::TOKENS_PER_PLAYER {
        return Err(Error::InvalidToken(token));
    }
    let mv = game
        .turn
        .legal_moves
        .iter()
        .find(|m| m.token == token)
        .cloned()
        .ok_or(Error::MoveNotLegal)?;
    let dice = game.turn.dice.ok_or(Error::MoveNotLegal)?;

    // Commit
    game.player_mut(slot).tokens[token as usize] = mv.to;
    if let Some(capture) = mv.capture {
        game.player_mut(capture.slot).tokens[capture.token as usize] =
            crate::protocol::TokenPosition::Home(capture.to_home_slot);
    }
    game.record(Some(slot), HistoryEntry::MoveApplied { mv: mv.clone() });
    debug_assert!(game.tokens_well_formed());

    if game.player(slot).has_won() {
        let winner = Winner {
            slot,
            user_id: game.player(slot).user_id.clone(),
            payout: game.prize_pool,
            reason: WinReason::Finished,
        };
        game.finish(winner.clone());
        debug!(game_id = %game.game_id, slot = %slot, "all tokens finished");
        return Ok(MoveOutcome::GameWon {
            applied: mv,
            winner,
        });
    }

    let reason = if dice == 6 {
        Some(ExtraTurnReason::Six)
    } else if mv.capture.is_some() {
        Some(ExtraTurnReason::Capture)
    } else if mv.finishes {
        Some(ExtraTurnReason::Finish)
    } else {
        None
    };

    match reason {
        Some(reason) => {
            if reason != ExtraTurnReason::Six {
                // The six counter tracks consecutive sixes only
                game.turn.consecutive_sixes = 0;
            }
            game.record(Some(slot), HistoryEntry::ExtraTurn { reason });
            grant_roll(game);
            Ok(MoveOutcome::ExtraTurn {
                applied: mv,
                reason,
            })
        }
        None => {
            pass_turn(game);
            Ok(MoveOutcome::TurnPassed {
                applied: mv,
                next_slot: game.turn.current_slot,
            })
        }
    }
}

/// Explicit forfeit: the opponent wins immediately.
pub fn forfeit(game: &mut Game, slot: Slot) -> Result<Winner> {
    if game.status == GameStatus::Finished {
        return Err(Error::GameNotActive);
    }
    game.player_mut(slot).forfeited = true;
    game.record(Some(slot), HistoryEntry::PlayerForfeited);

    let winner_slot = slot.opponent();
    let winner = Winner {
        slot: winner_slot,
        user_id: game.player(winner_slot).user_id.clone(),
        payout: game.prize_pool,
        reason: WinReason::Forfeit,
    };
    game.finish(winner.clone());
    Ok(winner)
}

/// Reconnection window expired: the connected player wins.
pub fn resolve_disconnect_win(game: &mut Game, disconnected: Slot) -> Winner {
    let winner_slot = disconnected.opponent();
    let winner = Winner {
        slot: winner_slot,
        user_id: game.player(winner_slot).user_id.clone(),
        payout: game.prize_pool,
        reason: WinReason::OpponentDisconnect,
    };
    game.finish(winner.clone());
    winner
}

fn ensure_active(game: &Game) -> Result<()> {
    match game.status {
        GameStatus::Active => Ok(()),
        _ => Err(Error::GameNotActive),
    }
}

fn ensure_turn(game: &Game, slot: Slot) -> Result<()> {
    if game.turn.current_slot != slot {
        return Err(Error::NotYourTurn);
    }
    Ok(())
}

/// Pass the turn to the opponent. Resets the dice, the legal-move set and
/// the six counter, and bumps the timer epoch so stale timers no-op.
fn pass_turn(game: &mut Game) {
    let next = game.turn.current_slot.opponent();
    game.turn.current_slot = next;
    game.turn.phase = TurnPhase::Roll;
    game.turn.dice = None;
    game.turn.legal_moves.clear();
    game.turn.consecutive_sixes = 0;
    game.turn.turn_started_at = Utc::now();
    game.turn.epoch += 1;
    game.record(None, HistoryEntry::TurnPassed { to: next });
}

/// Same player rolls again (extra turn); the six counter is left alone.
fn grant_roll(game: &mut Game) {
    game.turn.phase = TurnPhase::Roll;
    game.turn.dice = None;
    game.turn.legal_moves.clear();
    game.turn.turn_started_at = Utc::now();
    game.turn.epoch += 1;
}
