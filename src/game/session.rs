//! Game session actor
//!
//! Exactly one tokio task owns each game's state; every mutation flows
//! through the session's command channel, so concurrent roll and move
//! requests can never interleave. Timers (turn budget, reconnection
//! window) are messages into the same channel, stamped with an epoch at
//! scheduling time — a firing whose epoch no longer matches the current
//! state is a stale no-op.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::TimingConfig;
use crate::error::{Error, Result};
use crate::game::dice::DiceSource;
use crate::game::state::{Game, GameStatus, HistoryEntry, TurnPhase};
use crate::game::turns::{self, MoveOutcome, RollOutcome};
use crate::persistence::{retry_with_backoff, Repository};
use crate::protocol::{Chips, ConnectionId, GameId, Slot, UserId, Winner};
use crate::transport::{ConnectionHandle, ServerEvent};

/// Commands routed to a session by the registry and by its own timers
#[derive(Debug)]
pub enum SessionCommand {
    Roll {
        connection: ConnectionId,
    },
    Move {
        connection: ConnectionId,
        token: u8,
    },
    Forfeit {
        connection: ConnectionId,
    },
    Disconnected {
        connection: ConnectionId,
    },
    Reconnect {
        user_id: UserId,
        connection: ConnectionHandle,
    },
    TurnTimeout {
        epoch: u64,
    },
    ReconnectTimeout {
        slot: Slot,
        epoch: u64,
    },
}

/// Terminal notification to the registry, which settles and evicts
#[derive(Debug, Clone)]
pub struct GameEnded {
    pub game_id: GameId,
    pub winner: Winner,
    pub stake: Chips,
    pub commission: Chips,
}

/// Cheap handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub game_id: GameId,
    pub users: [UserId; 2],
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Enqueue a command; a closed channel means the session already
    /// reached its terminal state.
    pub fn send(&self, command: SessionCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::GameNotActive)
    }
}

/// The actor owning one game's authoritative state.
pub struct GameSession {
    game: Game,
    connections: [ConnectionHandle; 2],
    dice: Box<dyn DiceSource>,
    timing: TimingConfig,
    repository: Arc<dyn Repository>,
    ended_tx: mpsc::UnboundedSender<GameEnded>,
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    /// Per-seat disconnect generation; reconnection windows are keyed to
    /// the generation they were scheduled against.
    disconnect_epochs: [u64; 2],
}

impl GameSession {
    /// Spawn the session task and return its handle.
    pub fn spawn(
        game: Game,
        connections: [ConnectionHandle; 2],
        dice: Box<dyn DiceSource>,
        timing: TimingConfig,
        repository: Arc<dyn Repository>,
        ended_tx: mpsc::UnboundedSender<GameEnded>,
    ) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            game_id: game.game_id,
            users: [
                game.player(Slot::P0).user_id.clone(),
                game.player(Slot::P1).user_id.clone(),
            ],
            tx: command_tx.clone(),
        };

        let session = GameSession {
            game,
            connections,
            dice,
            timing,
            repository,
            ended_tx,
            command_tx,
            command_rx,
            disconnect_epochs: [0, 0],
        };
        tokio::spawn(session.run());
        handle
    }

    async fn run(mut self) {
        info!(game_id = %self.game.game_id, stake = %self.game.stake, "session started");
        self.announce_match();
        self.broadcast_turn();
        self.schedule_turn_timer();
        self.persist_snapshot();

        while let Some(command) = self.command_rx.recv().await {
            self.handle_command(command);
            if self.game.status == GameStatus::Finished {
                break;
            }
        }

        if let Some(winner) = self.game.winner.clone() {
            let ended = GameEnded {
                game_id: self.game.game_id,
                winner,
                stake: self.game.stake,
                commission: self.game.commission,
            };
            if self.ended_tx.send(ended).is_err() {
                error!(game_id = %self.game.game_id, "registry gone, settlement not triggered");
            }
        }
        info!(game_id = %self.game.game_id, "session stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Roll { connection } => {
                match self.game.slot_of_connection(connection) {
                    Some(slot) => {
                        if let Err(err) = self.do_roll(slot) {
                            self.error_to(connection, &err);
                        }
                    }
                    None => self.error_to(connection, &Error::NotInGame),
                }
            }
            SessionCommand::Move { connection, token } => {
                match self.game.slot_of_connection(connection) {
                    Some(slot) => {
                        if let Err(err) = self.do_move(slot, token) {
                            self.error_to(connection, &err);
                        }
                    }
                    None => self.error_to(connection, &Error::NotInGame),
                }
            }
            SessionCommand::Forfeit { connection } => {
                match self.game.slot_of_connection(connection) {
                    Some(slot) => {
                        if let Err(err) = self.do_forfeit(slot) {
                            self.error_to(connection, &err);
                        }
                    }
                    None => self.error_to(connection, &Error::NotInGame),
                }
            }
            SessionCommand::Disconnected { connection } => self.on_disconnected(connection),
            SessionCommand::Reconnect {
                user_id,
                connection,
            } => self.on_reconnect(&user_id, connection),
            SessionCommand::TurnTimeout { epoch } => self.on_turn_timeout(epoch),
            SessionCommand::ReconnectTimeout { slot, epoch } => {
                self.on_reconnect_timeout(slot, epoch)
            }
        }
    }

    fn do_roll(&mut self, slot: Slot) -> Result<()> {
        let value = self.dice.roll();
        let outcome = turns::handle_roll(&mut self.game, slot, value)?;

        let moves = match &outcome {
            RollOutcome::AwaitMove { moves, .. } => moves.clone(),
            _ => Vec::new(),
        };
        self.broadcast(ServerEvent::DiceResult {
            slot,
            value,
            consecutive_sixes: self.game.turn.consecutive_sixes,
            moves,
        });

        match outcome {
            RollOutcome::ThreeSixesPenalty { .. } => {
                debug!(game_id = %self.game.game_id, slot = %slot, "three sixes, turn forfeited");
            }
            RollOutcome::NoMoves { extra_roll, .. } => {
                debug!(game_id = %self.game.game_id, slot = %slot, extra_roll, "no legal moves");
            }
            RollOutcome::AwaitMove { .. } => {}
        }

        self.broadcast_turn();
        self.schedule_turn_timer();
        self.persist_snapshot();
        Ok(())
    }

    fn do_move(&mut self, slot: Slot, token: u8) -> Result<()> {
        let outcome = turns::apply_move(&mut self.game, slot, token)?;

        match outcome {
            MoveOutcome::GameWon { applied, winner } => {
                self.broadcast(ServerEvent::MoveResult { slot, mv: applied });
                self.broadcast(ServerEvent::GameOver { winner });
            }
            MoveOutcome::ExtraTurn { applied, .. }
            | MoveOutcome::TurnPassed { applied, .. } => {
                self.broadcast(ServerEvent::MoveResult { slot, mv: applied });
                self.broadcast_turn();
                self.schedule_turn_timer();
            }
        }
        self.persist_snapshot();
        Ok(())
    }

    fn do_forfeit(&mut self, slot: Slot) -> Result<()> {
        let winner = turns::forfeit(&mut self.game, slot)?;
        info!(game_id = %self.game.game_id, slot = %slot, "player forfeited");
        self.broadcast(ServerEvent::GameOver { winner });
        self.persist_snapshot();
        Ok(())
    }

    fn on_disconnected(&mut self, connection: ConnectionId) {
        if self.game.status == GameStatus::Finished {
            return;
        }
        let Some(slot) = self.game.slot_of_connection(connection) else {
            return;
        };

        {
            let player = self.game.player_mut(slot);
            player.connected = false;
            player.connection_id = None;
        }
        self.game.record(Some(slot), HistoryEntry::PlayerDisconnected);
        info!(game_id = %self.game.game_id, slot = %slot, "player disconnected, pausing");

        if self.game.status == GameStatus::Active {
            self.game.status = GameStatus::Paused;
            // Invalidate any pending turn timer
            self.game.turn.epoch += 1;
        }

        self.disconnect_epochs[slot.index()] += 1;
        self.schedule_reconnect_timer(slot);

        self.send_to(
            slot.opponent(),
            ServerEvent::OpponentDisconnected {
                slot,
                window_secs: self.timing.reconnect_window.as_secs(),
            },
        );
        self.persist_snapshot();
    }

    fn on_reconnect(&mut self, user_id: &str, connection: ConnectionHandle) {
        if self.game.status == GameStatus::Finished {
            connection.send(ServerEvent::error(&Error::GameNotActive));
            return;
        }
        let Some(slot) = self.game.slot_of_user(user_id) else {
            connection.send(ServerEvent::error(&Error::NotInGame));
            return;
        };

        {
            let player = self.game.player_mut(slot);
            player.connected = true;
            player.connection_id = Some(connection.id);
        }
        self.connections[slot.index()] = connection;
        self.game.record(Some(slot), HistoryEntry::PlayerReconnected);
        // Invalidate this seat's reconnection window
        self.disconnect_epochs[slot.index()] += 1;
        info!(game_id = %self.game.game_id, slot = %slot, "player reconnected");

        self.send_to(slot, ServerEvent::StateSync {
            game: Box::new(self.game.clone()),
        });
        self.send_to(slot.opponent(), ServerEvent::OpponentReconnected { slot });

        let both_connected = self.game.players.iter().all(|p| p.connected);
        if self.game.status == GameStatus::Paused && both_connected {
            // Resume exactly where the game was paused, with a fresh phase
            // budget and a fresh timer epoch.
            self.game.status = GameStatus::Active;
            self.game.turn.epoch += 1;
            self.broadcast_turn();
            self.schedule_turn_timer();
        }
        self.persist_snapshot();
    }

    fn on_turn_timeout(&mut self, epoch: u64) {
        if self.game.status != GameStatus::Active || epoch != self.game.turn.epoch {
            return;
        }
        let slot = self.game.turn.current_slot;
        let phase = self.game.turn.phase;
        self.game.record(Some(slot), HistoryEntry::TurnTimeout { phase });
        warn!(game_id = %self.game.game_id, slot = %slot, phase = ?phase, "turn budget expired, auto-acting");

        let result = match phase {
            TurnPhase::Roll => self.do_roll(slot),
            TurnPhase::Move => {
                let token = self.game.turn.legal_moves.first().map(|m| m.token);
                match token {
                    Some(token) => self.do_move(slot, token),
                    // Move phase with no legal moves cannot be reached;
                    // rolls with an empty set pass the turn immediately.
                    None => Ok(()),
                }
            }
        };
        if let Err(err) = result {
            error!(game_id = %self.game.game_id, error = %err, "auto-action failed");
        }
    }

    fn on_reconnect_timeout(&mut self, slot: Slot, epoch: u64) {
        if self.game.status != GameStatus::Paused
            || epoch != self.disconnect_epochs[slot.index()]
            || self.game.player(slot).connected
        {
            return;
        }
        info!(game_id = %self.game.game_id, slot = %slot, "reconnection window expired");
        let winner = turns::resolve_disconnect_win(&mut self.game, slot);
        self.broadcast(ServerEvent::GameOver { winner });
        self.persist_snapshot();
    }

    fn announce_match(&self) {
        for slot in Slot::both() {
            let opponent = self.game.player(slot.opponent()).display_name.clone();
            self.send_to(
                slot,
                ServerEvent::MatchFound {
                    game_id: self.game.game_id,
                    slot,
                    opponent,
                    stake: self.game.stake,
                    prize_pool: self.game.prize_pool,
                },
            );
        }
    }

    fn broadcast_turn(&self) {
        if self.game.status != GameStatus::Active {
            return;
        }
        self.broadcast(ServerEvent::TurnChange {
            current_slot: self.game.turn.current_slot,
            phase: self.game.turn.phase,
            deadline_secs: self.phase_budget().as_secs(),
        });
    }

    fn phase_budget(&self) -> Duration {
        match self.game.turn.phase {
            TurnPhase::Roll => self.timing.roll_timeout,
            TurnPhase::Move => self.timing.move_timeout,
        }
    }

    fn schedule_turn_timer(&self) {
        if self.game.status != GameStatus::Active {
            return;
        }
        let epoch = self.game.turn.epoch;
        let budget = self.phase_budget();
        let tx = self.command_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            let _ = tx.send(SessionCommand::TurnTimeout { epoch });
        });
    }

    fn schedule_reconnect_timer(&self, slot: Slot) {
        let epoch = self.disconnect_epochs[slot.index()];
        let window = self.timing.reconnect_window;
        let tx = self.command_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = tx.send(SessionCommand::ReconnectTimeout { slot, epoch });
        });
    }

    fn broadcast(&self, event: ServerEvent) {
        for connection in &self.connections {
            connection.send(event.clone());
        }
    }

    fn send_to(&self, slot: Slot, event: ServerEvent) {
        self.connections[slot.index()].send(event);
    }

    fn error_to(&self, connection: ConnectionId, err: &Error) {
        if let Some(handle) = self.connections.iter().find(|c| c.id == connection) {
            handle.send(ServerEvent::error(err));
        } else {
            debug!(connection = %connection, error = %err, "error for unknown connection");
        }
    }

    // Snapshot writes run off the hot path; in-memory state is
    // authoritative while the session lives.
    fn persist_snapshot(&self) {
        let repository = self.repository.clone();
        let game = self.game.clone();
        tokio::spawn(async move {
            let result =
                retry_with_backoff("save_game", 3, Duration::from_millis(50), || {
                    let repository = repository.clone();
                    let game = game.clone();
                    async move { repository.save_game(&game).await }
                })
                .await;
            if let Err(err) = result {
                error!(game_id = %game.game_id, error = %err, "game snapshot not persisted");
            }
        });
    }
}
