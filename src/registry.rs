//! Process-wide game registry
//!
//! Owns the gameId -> session and connection -> game indices, routes every
//! inbound action to the session that owns the game, and settles the wallet
//! exactly once when a session reaches its terminal state. Constructed once
//! at process start and passed by reference — there are no module-level
//! singletons.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::TimingConfig;
use crate::error::{Error, Result};
use crate::game::dice::{DiceSource, SecureDice};
use crate::game::session::{GameEnded, GameSession, SessionCommand, SessionHandle};
use crate::game::state::{Game, SeatedPlayer};
use crate::persistence::{retry_with_backoff, CommissionRecord, GameResult, Repository};
use crate::protocol::{new_game_id, Chips, ClientAction, ConnectionId, GameId, Slot, UserId};
use crate::transport::ConnectionHandle;
use crate::wallet::{TransactionKind, WalletLedger};

/// Factory for per-session dice sources; injectable so tests can script
/// every roll.
pub type DiceFactory = Box<dyn Fn() -> Box<dyn DiceSource> + Send + Sync>;

/// A matched player handed over by matchmaking
#[derive(Debug, Clone)]
pub struct MatchedPlayer {
    pub user_id: UserId,
    pub display_name: String,
    pub connection: ConnectionHandle,
}

pub struct GameRegistry {
    sessions: DashMap<GameId, SessionHandle>,
    connections: DashMap<ConnectionId, GameId>,
    user_games: DashMap<UserId, GameId>,
    wallet: Arc<WalletLedger>,
    repository: Arc<dyn Repository>,
    timing: TimingConfig,
    ended_tx: mpsc::UnboundedSender<GameEnded>,
    dice_factory: DiceFactory,
}

impl GameRegistry {
    pub fn new(
        wallet: Arc<WalletLedger>,
        repository: Arc<dyn Repository>,
        timing: TimingConfig,
    ) -> Arc<Self> {
        Self::with_dice_factory(wallet, repository, timing, Box::new(|| Box::new(SecureDice::new())))
    }

    pub fn with_dice_factory(
        wallet: Arc<WalletLedger>,
        repository: Arc<dyn Repository>,
        timing: TimingConfig,
        dice_factory: DiceFactory,
    ) -> Arc<Self> {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            sessions: DashMap::new(),
            connections: DashMap::new(),
            user_games: DashMap::new(),
            wallet,
            repository,
            timing,
            ended_tx,
            dice_factory,
        });
        tokio::spawn(Self::settlement_loop(registry.clone(), ended_rx));
        registry
    }

    /// Stand up a new session for two matched players. Entry fees were
    /// already reserved by matchmaking; this only creates and indexes the
    /// session.
    pub fn create_game(&self, stake: Chips, players: [MatchedPlayer; 2]) -> Result<GameId> {
        let game_id = new_game_id();
        let starting_slot = if rand::random::<bool>() {
            Slot::P0
        } else {
            Slot::P1
        };

        let seats = [
            SeatedPlayer {
                user_id: players[0].user_id.clone(),
                display_name: players[0].display_name.clone(),
                connection_id: players[0].connection.id,
            },
            SeatedPlayer {
                user_id: players[1].user_id.clone(),
                display_name: players[1].display_name.clone(),
                connection_id: players[1].connection.id,
            },
        ];
        let game = Game::new(game_id, stake, seats, starting_slot);

        for player in &players {
            self.connections.insert(player.connection.id, game_id);
            self.user_games.insert(player.user_id.clone(), game_id);
        }

        let handle = GameSession::spawn(
            game,
            [players[0].connection.clone(), players[1].connection.clone()],
            (self.dice_factory)(),
            self.timing.clone(),
            self.repository.clone(),
            self.ended_tx.clone(),
        );
        self.sessions.insert(game_id, handle);

        info!(
            game_id = %game_id,
            stake = %stake,
            p0 = %players[0].user_id,
            p1 = %players[1].user_id,
            "game created"
        );
        Ok(game_id)
    }

    /// Route a gameplay action to the owning session.
    pub fn dispatch(&self, connection: ConnectionId, action: &ClientAction) -> Result<()> {
        let game_id = *self
            .connections
            .get(&connection)
            .ok_or(Error::NotInGame)?;
        let session = self
            .sessions
            .get(&game_id)
            .ok_or_else(|| Error::InvalidGame(game_id.to_string()))?;

        let command = match action {
            ClientAction::Roll => SessionCommand::Roll { connection },
            ClientAction::Move { token } => SessionCommand::Move {
                connection,
                token: *token,
            },
            ClientAction::Forfeit => SessionCommand::Forfeit { connection },
            _ => {
                return Err(Error::InvalidData(
                    "not a gameplay action".to_string(),
                ))
            }
        };
        session.send(command)
    }

    /// A connection dropped; the owning session pauses the game and starts
    /// the reconnection window.
    pub fn handle_disconnect(&self, connection: ConnectionId) {
        let Some((_, game_id)) = self.connections.remove(&connection) else {
            return;
        };
        if let Some(session) = self.sessions.get(&game_id) {
            let _ = session.send(SessionCommand::Disconnected { connection });
        }
    }

    /// Attach a fresh connection for a user back onto their running game.
    pub fn handle_reconnect(
        &self,
        game_id: GameId,
        user_id: &str,
        connection: ConnectionHandle,
    ) -> Result<()> {
        let session = self
            .sessions
            .get(&game_id)
            .ok_or_else(|| Error::InvalidGame(game_id.to_string()))?;
        if !session.users.iter().any(|u| u == user_id) {
            return Err(Error::NotInGame);
        }
        let connection_id = connection.id;
        self.connections.insert(connection_id, game_id);
        session
            .send(SessionCommand::Reconnect {
                user_id: user_id.to_string(),
                connection,
            })
            .inspect_err(|_| {
                // Session reached terminal state between lookup and send
                self.connections.remove(&connection_id);
            })
    }

    /// The running game a user belongs to, if any
    pub fn find_game_for_user(&self, user_id: &str) -> Option<GameId> {
        let game_id = *self.user_games.get(user_id)?;
        self.sessions.contains_key(&game_id).then_some(game_id)
    }

    /// Evict a finished (or abandoned) session and all its indices.
    pub fn destroy(&self, game_id: GameId) {
        self.sessions.remove(&game_id);
        self.connections.retain(|_, g| *g != game_id);
        self.user_games.retain(|_, g| *g != game_id);
    }

    pub fn active_games(&self) -> usize {
        self.sessions.len()
    }

    async fn settlement_loop(registry: Arc<Self>, mut ended_rx: mpsc::UnboundedReceiver<GameEnded>) {
        while let Some(ended) = ended_rx.recv().await {
            let game_id = ended.game_id;
            if let Err(err) = registry.settle(ended).await {
                error!(game_id = %game_id, error = %err, "settlement failed");
            }
        }
    }

    /// Credit the winner and record the outcome. The payout credit keys on
    /// the game id, so a retried settlement is a no-op in the ledger.
    async fn settle(&self, ended: GameEnded) -> Result<()> {
        let reference = ended.game_id.to_string();
        if self
            .wallet
            .is_processed(&reference, TransactionKind::Payout)
            .await
        {
            warn!(game_id = %ended.game_id, "settlement already applied, skipping");
            self.destroy(ended.game_id);
            return Ok(());
        }

        self.wallet
            .credit(
                &ended.winner.user_id,
                ended.winner.payout,
                TransactionKind::Payout,
                &reference,
                Some(serde_json::json!({ "reason": ended.winner.reason })),
            )
            .await?;

        let result = GameResult {
            game_id: ended.game_id,
            stake: ended.stake,
            winner_user_id: ended.winner.user_id.clone(),
            winner_slot: ended.winner.slot,
            payout: ended.winner.payout,
            reason: ended.winner.reason,
            ended_at: Utc::now(),
        };
        let repository = self.repository.clone();
        if let Err(err) = retry_with_backoff(
            "append_game_result",
            3,
            Duration::from_millis(50),
            || {
                let repository = repository.clone();
                let result = result.clone();
                async move { repository.append_game_result(&result).await }
            },
        )
        .await
        {
            error!(game_id = %ended.game_id, error = %err, "game result not persisted");
        }

        let record = CommissionRecord {
            game_id: ended.game_id,
            amount: ended.commission,
            recorded_at: Utc::now(),
        };
        if let Err(err) = retry_with_backoff(
            "append_commission_record",
            3,
            Duration::from_millis(50),
            || {
                let repository = repository.clone();
                let record = record.clone();
                async move { repository.append_commission_record(&record).await }
            },
        )
        .await
        {
            error!(game_id = %ended.game_id, error = %err, "commission not persisted");
        }

        info!(
            game_id = %ended.game_id,
            winner = %ended.winner.user_id,
            payout = %ended.winner.payout,
            commission = %ended.commission,
            "game settled"
        );
        self.destroy(ended.game_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::dice::ScriptedDice;
    use crate::persistence::InMemoryRepository;
    use crate::transport::ServerEvent;
    use std::time::Duration;

    fn test_timing() -> TimingConfig {
        TimingConfig {
            roll_timeout: Duration::from_secs(5),
            move_timeout: Duration::from_secs(5),
            reconnect_window: Duration::from_secs(5),
        }
    }

    async fn funded_wallet(repo: Arc<InMemoryRepository>) -> Arc<WalletLedger> {
        let wallet = Arc::new(WalletLedger::new(repo));
        for user in ["alice", "bob"] {
            wallet
                .credit(
                    user,
                    Chips::new(1000),
                    TransactionKind::AddFunds,
                    &format!("seed-{}", user),
                    None,
                )
                .await
                .unwrap();
        }
        wallet
    }

    fn matched(user: &str, name: &str) -> (MatchedPlayer, tokio::sync::mpsc::UnboundedReceiver<ServerEvent>) {
        let (connection, rx) = ConnectionHandle::pair(user);
        (
            MatchedPlayer {
                user_id: user.to_string(),
                display_name: name.to_string(),
                connection,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_dispatch_unknown_connection_rejected() {
        let repo = Arc::new(InMemoryRepository::new());
        let wallet = funded_wallet(repo.clone()).await;
        let registry = GameRegistry::new(wallet, repo, test_timing());

        let err = registry
            .dispatch(uuid::Uuid::new_v4(), &ClientAction::Roll)
            .unwrap_err();
        assert!(matches!(err, Error::NotInGame));
    }

    #[tokio::test]
    async fn test_forfeit_settles_exactly_once_and_evicts() {
        let repo = Arc::new(InMemoryRepository::new());
        let wallet = funded_wallet(repo.clone()).await;
        let registry = GameRegistry::with_dice_factory(
            wallet.clone(),
            repo.clone(),
            test_timing(),
            Box::new(|| Box::new(ScriptedDice::new(&[]))),
        );

        let (p0, _rx0) = matched("alice", "Alice");
        let (p1, mut rx1) = matched("bob", "Bob");
        let p0_conn = p0.connection.id;
        let game_id = registry
            .create_game(Chips::new(50), [p0, p1])
            .unwrap();
        assert_eq!(registry.active_games(), 1);
        assert_eq!(registry.find_game_for_user("alice"), Some(game_id));

        registry.dispatch(p0_conn, &ClientAction::Forfeit).unwrap();

        // Winner notified, then settled and evicted
        loop {
            match tokio::time::timeout(Duration::from_secs(2), rx1.recv())
                .await
                .unwrap()
                .unwrap()
            {
                ServerEvent::GameOver { winner } => {
                    assert_eq!(winner.user_id, "bob");
                    break;
                }
                _ => continue,
            }
        }
        tokio::time::timeout(Duration::from_secs(2), async {
            while registry.active_games() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session not evicted");

        // Payout applied once, keyed on the game id
        assert_eq!(wallet.get_balance("bob").await, Chips::new(1090));
        assert!(
            wallet
                .is_processed(&game_id.to_string(), TransactionKind::Payout)
                .await
        );
        assert_eq!(repo.results().await.len(), 1);
        assert_eq!(repo.commissions().await.len(), 1);
        assert_eq!(repo.commissions().await[0].amount, Chips::new(10));

        // Further actions on the destroyed game fail with a typed error
        let err = registry
            .dispatch(p0_conn, &ClientAction::Roll)
            .unwrap_err();
        assert!(matches!(err, Error::NotInGame));
    }

    #[tokio::test]
    async fn test_reconnect_requires_membership() {
        let repo = Arc::new(InMemoryRepository::new());
        let wallet = funded_wallet(repo.clone()).await;
        let registry = GameRegistry::with_dice_factory(
            wallet,
            repo,
            test_timing(),
            Box::new(|| Box::new(ScriptedDice::new(&[]))),
        );

        let (p0, _rx0) = matched("alice", "Alice");
        let (p1, _rx1) = matched("bob", "Bob");
        let game_id = registry.create_game(Chips::new(50), [p0, p1]).unwrap();

        let (intruder, _rx) = ConnectionHandle::pair("mallory");
        let err = registry
            .handle_reconnect(game_id, "mallory", intruder)
            .unwrap_err();
        assert!(matches!(err, Error::NotInGame));

        let (ghost, _rx) = ConnectionHandle::pair("alice");
        let err = registry
            .handle_reconnect(uuid::Uuid::new_v4(), "alice", ghost)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGame(_)));
    }
}
