//! Legal-move computation
//!
//! Pure function of the game state and the current dice value. The session
//! computes this set once per roll, hands it to the client, and later
//! validates the chosen move against it — the client never decides
//! legality.

use crate::game::board;
use crate::game::state::Game;
use crate::protocol::{Capture, TokenMove, TokenPosition};

/// Compute the legal-move set for the active player at the current dice
/// value. Empty when no dice value is set or no token can move.
pub fn legal_moves(game: &Game) -> Vec<TokenMove> {
    let Some(dice) = game.turn.dice else {
        return Vec::new();
    };
    let slot = game.turn.current_slot;
    let player = game.player(slot);

    // Forced opening: a 6 with tokens waiting at home and nothing on the
    // ring must open. A lane token can never move on a 6 (it would always
    // overshoot), so this gate drops no otherwise-legal move.
    let must_open = dice == 6 && player.tokens_at_home() > 0 && player.tokens_on_ring() == 0;

    let mut moves = Vec::new();
    for (idx, &from) in player.tokens.iter().enumerate() {
        if must_open && !matches!(from, TokenPosition::Home(_)) {
            continue;
        }
        let Some(to) = board::advance(slot, from, dice) else {
            continue;
        };

        let capture = match to {
            TokenPosition::Board(cell) if !board::is_safe_cell(cell) => {
                let opponents = game.opponent_tokens_on_cell(slot, cell);
                // Only the sole opponent token on a cell can be captured;
                // a stack of two or more stands.
                if opponents.len() == 1 {
                    Some(Capture {
                        slot: slot.opponent(),
                        token: opponents[0],
                        to_home_slot: game.player(slot.opponent()).lowest_free_home_slot(),
                    })
                } else {
                    None
                }
            }
            _ => None,
        };

        moves.push(TokenMove {
            token: idx as u8,
            from,
            to,
            opens: matches!(from, TokenPosition::Home(_)),
            finishes: to.is_finished(),
            capture,
            path: board::path(slot, from, dice),
        });
    }
    moves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Game, SeatedPlayer};
    use crate::protocol::{new_game_id, Chips, Slot};
    use uuid::Uuid;

    fn game_with_dice(dice: u8) -> Game {
        let mut game = Game::new(
            new_game_id(),
            Chips::new(50),
            [
                SeatedPlayer {
                    user_id: "alice".to_string(),
                    display_name: "Alice".to_string(),
                    connection_id: Uuid::new_v4(),
                },
                SeatedPlayer {
                    user_id: "bob".to_string(),
                    display_name: "Bob".to_string(),
                    connection_id: Uuid::new_v4(),
                },
            ],
            Slot::P0,
        );
        game.turn.dice = Some(dice);
        game
    }

    #[test]
    fn test_all_home_without_six_has_no_moves() {
        for dice in 1..=5 {
            let game = game_with_dice(dice);
            assert!(legal_moves(&game).is_empty());
        }
    }

    #[test]
    fn test_single_home_token_six_opens_to_entry() {
        let mut game = game_with_dice(6);
        {
            let player = game.player_mut(Slot::P0);
            player.tokens[1] = TokenPosition::Finished;
            player.tokens[2] = TokenPosition::Finished;
            player.tokens[3] = TokenPosition::Finished;
        }

        let moves = legal_moves(&game);
        assert_eq!(moves.len(), 1);
        let mv = &moves[0];
        assert!(mv.opens);
        assert_eq!(mv.to, TokenPosition::Board(board::entry_cell(Slot::P0)));
        assert_eq!(mv.path, vec![TokenPosition::Board(1)]);
    }

    #[test]
    fn test_must_open_suppresses_lane_moves_never() {
        // A lane token has no legal move on a 6 regardless of the gate
        let mut game = game_with_dice(6);
        {
            let player = game.player_mut(Slot::P0);
            player.tokens[0] = TokenPosition::Lane(3);
        }

        let moves = legal_moves(&game);
        // Three home tokens open; the lane token overshoots
        assert_eq!(moves.len(), 3);
        assert!(moves.iter().all(|m| m.opens));
    }

    #[test]
    fn test_six_with_ring_token_offers_both() {
        let mut game = game_with_dice(6);
        {
            let player = game.player_mut(Slot::P0);
            player.tokens[0] = TokenPosition::Board(10);
        }

        let moves = legal_moves(&game);
        assert_eq!(moves.len(), 4);
        assert_eq!(moves.iter().filter(|m| m.opens).count(), 3);
        assert!(moves
            .iter()
            .any(|m| m.token == 0 && m.to == TokenPosition::Board(16)));
    }

    #[test]
    fn test_capture_of_sole_opponent_token() {
        let mut game = game_with_dice(3);
        game.player_mut(Slot::P0).tokens[0] = TokenPosition::Board(10);
        game.player_mut(Slot::P1).tokens[2] = TokenPosition::Board(13);

        let moves = legal_moves(&game);
        assert_eq!(moves.len(), 1);
        let capture = moves[0].capture.expect("capture expected");
        assert_eq!(capture.slot, Slot::P1);
        assert_eq!(capture.token, 2);
        assert_eq!(capture.to_home_slot, 3);
    }

    #[test]
    fn test_no_capture_on_safe_cell() {
        let mut game = game_with_dice(4);
        game.player_mut(Slot::P0).tokens[0] = TokenPosition::Board(5);
        game.player_mut(Slot::P1).tokens[0] = TokenPosition::Board(9); // safe cell

        let moves = legal_moves(&game);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].to, TokenPosition::Board(9));
        assert!(moves[0].capture.is_none());
    }

    #[test]
    fn test_no_capture_of_opponent_stack() {
        let mut game = game_with_dice(3);
        game.player_mut(Slot::P0).tokens[0] = TokenPosition::Board(10);
        game.player_mut(Slot::P1).tokens[0] = TokenPosition::Board(13);
        game.player_mut(Slot::P1).tokens[1] = TokenPosition::Board(13);

        let moves = legal_moves(&game);
        assert_eq!(moves.len(), 1);
        assert!(moves[0].capture.is_none());
    }

    #[test]
    fn test_own_tokens_stack_freely() {
        let mut game = game_with_dice(3);
        game.player_mut(Slot::P0).tokens[0] = TokenPosition::Board(10);
        game.player_mut(Slot::P0).tokens[1] = TokenPosition::Board(13);

        let moves = legal_moves(&game);
        let mv = moves.iter().find(|m| m.token == 0).expect("move for token 0");
        assert_eq!(mv.to, TokenPosition::Board(13));
        assert!(mv.capture.is_none());
    }

    #[test]
    fn test_lane_overshoot_produces_no_move() {
        let mut game = game_with_dice(5);
        {
            let player = game.player_mut(Slot::P0);
            player.tokens[0] = TokenPosition::Lane(4);
            player.tokens[1] = TokenPosition::Finished;
            player.tokens[2] = TokenPosition::Finished;
            player.tokens[3] = TokenPosition::Finished;
        }

        assert!(legal_moves(&game).is_empty());
    }

    #[test]
    fn test_finish_move_flagged() {
        let mut game = game_with_dice(2);
        game.player_mut(Slot::P0).tokens[0] = TokenPosition::Lane(4);

        let moves = legal_moves(&game);
        assert_eq!(moves.len(), 1);
        assert!(moves[0].finishes);
        assert_eq!(moves[0].to, TokenPosition::Finished);
    }
}
