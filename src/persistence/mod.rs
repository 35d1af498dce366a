//! Durable storage seam
//!
//! The core treats the relational store as opaque: a `Repository` trait with
//! the handful of writes the engine needs, called at session creation, after
//! each applied turn, and at settlement. Write failures are retried with
//! backoff and then logged — in-memory state stays authoritative for a live
//! session, so persistence failure never corrupts gameplay.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::game::state::{Game, GameStatus};
use crate::protocol::{Chips, GameId, Slot, UserId, WinReason};
use crate::wallet::WalletTransaction;

/// Final outcome row appended once per game at settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameResult {
    pub game_id: GameId,
    pub stake: Chips,
    pub winner_user_id: UserId,
    pub winner_slot: Slot,
    pub payout: Chips,
    pub reason: WinReason,
    pub ended_at: DateTime<Utc>,
}

/// House commission row appended once per game at settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub game_id: GameId,
    pub amount: Chips,
    pub recorded_at: DateTime<Utc>,
}

/// Narrow contract to the durable store.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn save_game(&self, game: &Game) -> Result<()>;
    async fn load_active_game_for_user(&self, user_id: &str) -> Result<Option<Game>>;
    async fn append_game_result(&self, result: &GameResult) -> Result<()>;
    async fn append_commission_record(&self, record: &CommissionRecord) -> Result<()>;
    async fn append_wallet_transaction(&self, tx: &WalletTransaction) -> Result<()>;
}

/// In-memory repository used by tests and single-node development runs.
#[derive(Default)]
pub struct InMemoryRepository {
    games: RwLock<HashMap<GameId, Game>>,
    results: RwLock<Vec<GameResult>>,
    commissions: RwLock<Vec<CommissionRecord>>,
    wallet_log: RwLock<Vec<WalletTransaction>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn results(&self) -> Vec<GameResult> {
        self.results.read().await.clone()
    }

    pub async fn commissions(&self) -> Vec<CommissionRecord> {
        self.commissions.read().await.clone()
    }

    pub async fn wallet_log_len(&self) -> usize {
        self.wallet_log.read().await.len()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn save_game(&self, game: &Game) -> Result<()> {
        self.games.write().await.insert(game.game_id, game.clone());
        Ok(())
    }

    async fn load_active_game_for_user(&self, user_id: &str) -> Result<Option<Game>> {
        let games = self.games.read().await;
        Ok(games
            .values()
            .find(|g| {
                g.status != GameStatus::Finished && g.players.iter().any(|p| p.user_id == user_id)
            })
            .cloned())
    }

    async fn append_game_result(&self, result: &GameResult) -> Result<()> {
        self.results.write().await.push(result.clone());
        Ok(())
    }

    async fn append_commission_record(&self, record: &CommissionRecord) -> Result<()> {
        self.commissions.write().await.push(record.clone());
        Ok(())
    }

    async fn append_wallet_transaction(&self, tx: &WalletTransaction) -> Result<()> {
        self.wallet_log.write().await.push(tx.clone());
        Ok(())
    }
}

/// Retry an idempotent write with exponential backoff. Returns the last
/// error once attempts are exhausted; callers decide whether that is fatal
/// for the enclosing operation.
pub async fn retry_with_backoff<T, F, Fut>(
    operation: &str,
    max_attempts: u32,
    base_delay: Duration,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    warn!(operation, attempts = attempt, error = %err, "write failed, giving up");
                    return Err(err);
                }
                let delay = base_delay * 2u32.saturating_pow(attempt - 1);
                debug!(operation, attempt, ?delay, error = %err, "write failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::game::state::SeatedPlayer;
    use crate::protocol::{new_game_id, Chips, Slot, WinReason, Winner};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_active_game_lookup_by_user() {
        let repo = InMemoryRepository::new();
        let mut game = Game::new(
            new_game_id(),
            Chips::new(50),
            [
                SeatedPlayer {
                    user_id: "alice".to_string(),
                    display_name: "Alice".to_string(),
                    connection_id: uuid::Uuid::new_v4(),
                },
                SeatedPlayer {
                    user_id: "bob".to_string(),
                    display_name: "Bob".to_string(),
                    connection_id: uuid::Uuid::new_v4(),
                },
            ],
            Slot::P0,
        );
        repo.save_game(&game).await.unwrap();

        let loaded = repo.load_active_game_for_user("bob").await.unwrap();
        assert_eq!(loaded.unwrap().game_id, game.game_id);
        assert!(repo
            .load_active_game_for_user("mallory")
            .await
            .unwrap()
            .is_none());

        // Finished games are no longer resumable
        game.finish(Winner {
            slot: Slot::P0,
            user_id: "alice".to_string(),
            payout: game.prize_pool,
            reason: WinReason::Forfeit,
        });
        repo.save_game(&game).await.unwrap();
        assert!(repo
            .load_active_game_for_user("bob")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("test_write", 5, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Persistence("transient".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff("test_write", 3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Persistence("down".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
