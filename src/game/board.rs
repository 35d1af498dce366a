//! Board geometry and position calculation
//!
//! Pure functions over the fixed two-player Ludo board: a 52-cell cyclic
//! ring, one 6-cell private lane per seat, and 8 capture-proof safe cells.
//! Nothing here touches game state; the move validator layers policy
//! (opening, captures, forced moves) on top of these calculations.

use crate::protocol::{Slot, TokenPosition};

/// Cells on the shared cyclic ring
pub const BOARD_CELLS: u8 = 52;

/// Cells in each private lane; landing exactly on the last one finishes
pub const LANE_CELLS: u8 = 6;

/// Capture-proof cells, fixed for every game
pub const SAFE_CELLS: [u8; 8] = [1, 9, 14, 22, 27, 35, 40, 48];

// Per-seat geometry. Seats sit on opposite quadrants of the standard board.
const ENTRY_CELLS: [u8; 2] = [1, 27];
const LANE_ENTRY_CELLS: [u8; 2] = [51, 25];

/// Ring cell where a seat's tokens enter from home
pub fn entry_cell(slot: Slot) -> u8 {
    ENTRY_CELLS[slot.index()]
}

/// Last ring cell a seat occupies before diverting into its private lane
pub fn lane_entry_cell(slot: Slot) -> u8 {
    LANE_ENTRY_CELLS[slot.index()]
}

pub fn is_safe_cell(cell: u8) -> bool {
    SAFE_CELLS.contains(&cell)
}

/// Ring distance from `cell` forward to the seat's lane-entry cell
pub fn distance_to_lane(slot: Slot, cell: u8) -> u8 {
    let entry = lane_entry_cell(slot);
    ((entry as u16 + BOARD_CELLS as u16 - cell as u16) % BOARD_CELLS as u16) as u8
}

fn wrap(cell: u8, steps: u8) -> u8 {
    ((cell as u16 - 1 + steps as u16) % BOARD_CELLS as u16) as u8 + 1
}

/// Compute the landing coordinate for a token moved `steps` cells.
///
/// Returns `None` when no landing exists: a home token on anything but a 6,
/// a lane advance past the lane end (no bounce, no clamp), or a token that
/// already finished.
pub fn advance(slot: Slot, from: TokenPosition, steps: u8) -> Option<TokenPosition> {
    match from {
        TokenPosition::Home(_) => {
            if steps == 6 {
                Some(TokenPosition::Board(entry_cell(slot)))
            } else {
                None
            }
        }
        TokenPosition::Board(cell) => {
            let to_lane = distance_to_lane(slot, cell);
            if steps <= to_lane {
                Some(TokenPosition::Board(wrap(cell, steps)))
            } else {
                let lane_cell = steps - to_lane;
                match lane_cell {
                    c if c < LANE_CELLS => Some(TokenPosition::Lane(c)),
                    c if c == LANE_CELLS => Some(TokenPosition::Finished),
                    _ => None,
                }
            }
        }
        TokenPosition::Lane(cell) => {
            let target = cell + steps;
            match target {
                t if t < LANE_CELLS => Some(TokenPosition::Lane(t)),
                t if t == LANE_CELLS => Some(TokenPosition::Finished),
                _ => None,
            }
        }
        TokenPosition::Finished => None,
    }
}

/// Ordered cell-by-cell path for a legal move, used by clients for
/// animation only. The final finishing hop is rendered as the last lane
/// cell; the move's `to` field carries the Finished coordinate.
pub fn path(slot: Slot, from: TokenPosition, steps: u8) -> Vec<TokenPosition> {
    if matches!(from, TokenPosition::Home(_)) {
        return vec![TokenPosition::Board(entry_cell(slot))];
    }

    let mut cells = Vec::with_capacity(steps as usize);
    let mut current = from;
    for _ in 0..steps {
        current = match current {
            TokenPosition::Board(cell) if cell == lane_entry_cell(slot) => TokenPosition::Lane(1),
            TokenPosition::Board(cell) => TokenPosition::Board(wrap(cell, 1)),
            TokenPosition::Lane(cell) => TokenPosition::Lane(cell + 1),
            other => other,
        };
        cells.push(current);
    }
    cells
}
