//! Matchmaking queue
//!
//! One FIFO queue per stake plus a per-stake in-flight flag: only one
//! matching attempt runs for a stake at any moment, so two concurrent
//! attempts can never both observe two waiting players and double-match
//! them. Entry fees are reserved through the wallet before the game is
//! created; a failed reservation refunds whatever was already debited and
//! returns the unaffected player to the front of the queue.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::MatchmakingConfig;
use crate::error::{Error, Result};
use crate::protocol::{Chips, UserId};
use crate::registry::{GameRegistry, MatchedPlayer};
use crate::transport::{ConnectionHandle, ServerEvent};
use crate::wallet::{TransactionKind, WalletLedger};

/// One waiting player
#[derive(Debug)]
pub struct MatchRequest {
    pub user_id: UserId,
    pub display_name: String,
    pub connection: ConnectionHandle,
    pub enqueued_at: Instant,
}

impl MatchRequest {
    pub fn new(user_id: &str, display_name: &str, connection: ConnectionHandle) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            connection,
            enqueued_at: Instant::now(),
        }
    }
}

struct StakeQueue {
    queue: Mutex<VecDeque<MatchRequest>>,
    /// Mutual-exclusion flag: a single matching attempt per stake
    matching: AtomicBool,
}

impl StakeQueue {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            matching: AtomicBool::new(false),
        }
    }
}

pub struct MatchmakingQueue {
    stakes: DashMap<u64, Arc<StakeQueue>>,
    wallet: Arc<WalletLedger>,
    registry: Arc<GameRegistry>,
    config: MatchmakingConfig,
}

impl MatchmakingQueue {
    pub fn new(
        wallet: Arc<WalletLedger>,
        registry: Arc<GameRegistry>,
        config: MatchmakingConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            stakes: DashMap::new(),
            wallet,
            registry,
            config,
        })
    }

    /// Append a player to the stake's queue and schedule a matching
    /// attempt. One queue entry per user per stake.
    pub async fn enqueue(self: &Arc<Self>, stake: Chips, request: MatchRequest) -> Result<()> {
        if stake.amount() < self.config.min_stake || stake.amount() > self.config.max_stake {
            return Err(Error::InvalidAmount(format!(
                "stake {} outside [{}, {}]",
                stake, self.config.min_stake, self.config.max_stake
            )));
        }
        // Early balance gate for fast feedback; the authoritative check is
        // the debit at match time.
        let balance = self.wallet.get_balance(&request.user_id).await;
        if balance < stake {
            return Err(Error::InsufficientFunds {
                needed: stake.amount(),
                available: balance.amount(),
            });
        }

        let entry = self
            .stakes
            .entry(stake.amount())
            .or_insert_with(|| Arc::new(StakeQueue::new()))
            .clone();
        let connection = request.connection.clone();
        {
            let mut queue = entry.queue.lock();
            if queue.iter().any(|r| r.user_id == request.user_id) {
                return Err(Error::AlreadyQueued);
            }
            queue.push_back(request);
        }
        connection.send(ServerEvent::Queued { stake });
        debug!(user = %connection.user_id, stake = %stake, "queued");

        let this = self.clone();
        let debounce = self.config.match_debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _ = this.try_match(stake).await;
        });
        Ok(())
    }

    /// Remove a waiting player. Returns whether an entry was removed.
    pub fn cancel(&self, stake: Chips, user_id: &str) -> bool {
        let Some(entry) = self.stakes.get(&stake.amount()).map(|e| e.clone()) else {
            return false;
        };
        let removed = {
            let mut queue = entry.queue.lock();
            queue
                .iter()
                .position(|r| r.user_id == user_id)
                .and_then(|pos| queue.remove(pos))
        };
        match removed {
            Some(request) => {
                request
                    .connection
                    .send(ServerEvent::QueueCancelled { stake });
                debug!(user = %user_id, stake = %stake, "dequeued");
                true
            }
            None => false,
        }
    }

    /// Drop a user from every stake queue (connection closed).
    pub fn cancel_all_for_user(&self, user_id: &str) {
        for entry in self.stakes.iter() {
            let mut queue = entry.queue.lock();
            queue.retain(|r| r.user_id != user_id);
        }
    }

    pub fn queue_len(&self, stake: Chips) -> usize {
        self.stakes
            .get(&stake.amount())
            .map(|e| e.queue.lock().len())
            .unwrap_or(0)
    }

    /// Run one matching pass for a stake. Returns the number of games
    /// created, or `MatchingInProgress` when another attempt holds the
    /// stake's flag.
    pub async fn try_match(&self, stake: Chips) -> Result<usize> {
        let Some(entry) = self.stakes.get(&stake.amount()).map(|e| e.clone()) else {
            return Ok(0);
        };
        if entry.matching.swap(true, Ordering::AcqRel) {
            return Err(Error::MatchingInProgress);
        }

        let mut created = 0;
        loop {
            let pair = {
                let mut queue = entry.queue.lock();
                if queue.len() >= 2 {
                    let first = queue.pop_front().expect("len checked");
                    let second = queue.pop_front().expect("len checked");
                    Some((first, second))
                } else {
                    None
                }
            };
            let Some((first, second)) = pair else {
                break;
            };
            if self.pair_players(stake, first, second, &entry).await {
                created += 1;
            }
        }

        // Release on every path; errors inside the loop are handled, not
        // propagated.
        entry.matching.store(false, Ordering::Release);
        Ok(created)
    }

    /// Reserve both entry fees and stand up the game. On any failure the
    /// unaffected player keeps their position (front of the queue) and any
    /// applied debit is refunded before returning.
    async fn pair_players(
        &self,
        stake: Chips,
        first: MatchRequest,
        second: MatchRequest,
        entry: &Arc<StakeQueue>,
    ) -> bool {
        if first.connection.is_closed() {
            debug!(user = %first.user_id, "dropped from queue, connection closed");
            entry.queue.lock().push_front(second);
            return false;
        }
        if second.connection.is_closed() {
            debug!(user = %second.user_id, "dropped from queue, connection closed");
            entry.queue.lock().push_front(first);
            return false;
        }

        let match_id = uuid::Uuid::new_v4();
        let first_ref = format!("match:{}:{}", match_id, first.user_id);
        let second_ref = format!("match:{}:{}", match_id, second.user_id);

        if let Err(err) = self
            .wallet
            .debit(
                &first.user_id,
                stake,
                TransactionKind::EntryFee,
                &first_ref,
                None,
            )
            .await
        {
            warn!(user = %first.user_id, error = %err, "entry fee reservation failed");
            first.connection.send(ServerEvent::error(&err));
            entry.queue.lock().push_front(second);
            return false;
        }

        if let Err(err) = self
            .wallet
            .debit(
                &second.user_id,
                stake,
                TransactionKind::EntryFee,
                &second_ref,
                None,
            )
            .await
        {
            warn!(user = %second.user_id, error = %err, "entry fee reservation failed");
            self.refund(&first.user_id, stake, &first_ref).await;
            second.connection.send(ServerEvent::error(&err));
            entry.queue.lock().push_front(first);
            return false;
        }

        let players = [
            MatchedPlayer {
                user_id: first.user_id.clone(),
                display_name: first.display_name.clone(),
                connection: first.connection.clone(),
            },
            MatchedPlayer {
                user_id: second.user_id.clone(),
                display_name: second.display_name.clone(),
                connection: second.connection.clone(),
            },
        ];
        match self.registry.create_game(stake, players) {
            Ok(game_id) => {
                info!(
                    game_id = %game_id,
                    stake = %stake,
                    p0 = %first.user_id,
                    p1 = %second.user_id,
                    "players matched"
                );
                true
            }
            Err(err) => {
                // Session could not be stood up: undo both reservations and
                // put both players back in their original order.
                warn!(error = %err, "game creation failed, rolling back");
                self.refund(&first.user_id, stake, &first_ref).await;
                self.refund(&second.user_id, stake, &second_ref).await;
                let event = ServerEvent::error(&err);
                first.connection.send(event.clone());
                second.connection.send(event);
                let mut queue = entry.queue.lock();
                queue.push_front(second);
                queue.push_front(first);
                false
            }
        }
    }

    async fn refund(&self, user_id: &str, stake: Chips, reference: &str) {
        if let Err(err) = self
            .wallet
            .credit(user_id, stake, TransactionKind::Refund, reference, None)
            .await
        {
            // The debit row exists, so this only fails on ledger overflow;
            // surfaced loudly for operator reconciliation.
            tracing::error!(user = %user_id, reference, error = %err, "refund failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingConfig;
    use crate::game::dice::ScriptedDice;
    use crate::persistence::InMemoryRepository;
    use std::time::Duration;

    struct Rig {
        wallet: Arc<WalletLedger>,
        registry: Arc<GameRegistry>,
        queue: Arc<MatchmakingQueue>,
    }

    async fn rig() -> Rig {
        rig_with_debounce(Duration::from_millis(1)).await
    }

    async fn rig_with_debounce(debounce: Duration) -> Rig {
        let repo = Arc::new(InMemoryRepository::new());
        let wallet = Arc::new(WalletLedger::new(repo.clone()));
        let registry = GameRegistry::with_dice_factory(
            wallet.clone(),
            repo,
            TimingConfig {
                roll_timeout: Duration::from_secs(5),
                move_timeout: Duration::from_secs(5),
                reconnect_window: Duration::from_secs(5),
            },
            Box::new(|| Box::new(ScriptedDice::new(&[]))),
        );
        let queue = MatchmakingQueue::new(
            wallet.clone(),
            registry.clone(),
            MatchmakingConfig {
                match_debounce: debounce,
                min_stake: 10,
                max_stake: 10_000,
            },
        );
        Rig {
            wallet,
            registry,
            queue,
        }
    }

    async fn fund(wallet: &WalletLedger, user: &str, amount: u64) {
        wallet
            .credit(
                user,
                Chips::new(amount),
                TransactionKind::AddFunds,
                &format!("seed-{}", user),
                None,
            )
            .await
            .unwrap();
    }

    fn request(user: &str) -> (MatchRequest, tokio::sync::mpsc::UnboundedReceiver<ServerEvent>) {
        let (connection, rx) = ConnectionHandle::pair(user);
        (MatchRequest::new(user, user, connection), rx)
    }

    #[tokio::test]
    async fn test_two_players_match_into_one_game() {
        let rig = rig().await;
        fund(&rig.wallet, "alice", 500).await;
        fund(&rig.wallet, "bob", 500).await;
        let stake = Chips::new(50);

        let (alice, _rx_a) = request("alice");
        let (bob, _rx_b) = request("bob");
        rig.queue.enqueue(stake, alice).await.unwrap();
        rig.queue.enqueue(stake, bob).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while rig.registry.active_games() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no game created");

        assert_eq!(rig.registry.active_games(), 1);
        assert_eq!(rig.queue.queue_len(stake), 0);
        assert_eq!(rig.wallet.get_balance("alice").await, Chips::new(450));
        assert_eq!(rig.wallet.get_balance("bob").await, Chips::new(450));
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_rejected() {
        let rig = rig().await;
        fund(&rig.wallet, "alice", 500).await;
        let stake = Chips::new(50);

        let (first, _rx1) = request("alice");
        rig.queue.enqueue(stake, first).await.unwrap();
        let (second, _rx2) = request("alice");
        let err = rig.queue.enqueue(stake, second).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyQueued));
        assert_eq!(rig.queue.queue_len(stake), 1);
    }

    #[tokio::test]
    async fn test_concurrent_match_attempts_create_one_game() {
        let rig = rig_with_debounce(Duration::from_secs(30)).await;
        fund(&rig.wallet, "alice", 500).await;
        fund(&rig.wallet, "bob", 500).await;
        let stake = Chips::new(50);

        let (alice, _rx_a) = request("alice");
        let (bob, _rx_b) = request("bob");
        rig.queue.enqueue(stake, alice).await.unwrap();
        rig.queue.enqueue(stake, bob).await.unwrap();

        // Hammer the matcher from many tasks; the per-stake flag admits one
        let mut handles = Vec::new();
        for _ in 0..10 {
            let queue = rig.queue.clone();
            handles.push(tokio::spawn(async move { queue.try_match(stake).await }));
        }
        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(n) => created += n,
                Err(Error::MatchingInProgress) => {}
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(rig.registry.active_games(), 1);
        assert_eq!(rig.wallet.get_balance("alice").await, Chips::new(450));
        assert_eq!(rig.wallet.get_balance("bob").await, Chips::new(450));
        assert_eq!(rig.queue.queue_len(stake), 0);
    }

    #[tokio::test]
    async fn test_failed_reservation_refunds_and_requeues_partner() {
        // Long debounce keeps the scheduled matcher out of the way so the
        // drain lands before the explicit matching attempt below.
        let rig = rig_with_debounce(Duration::from_secs(30)).await;
        fund(&rig.wallet, "alice", 500).await;
        fund(&rig.wallet, "bob", 500).await;
        let stake = Chips::new(50);

        let (alice, _rx_a) = request("alice");
        let (bob, mut rx_b) = request("bob");
        rig.queue.enqueue(stake, alice).await.unwrap();
        rig.queue.enqueue(stake, bob).await.unwrap();

        // Drain bob's funds between enqueue and match
        rig.wallet
            .debit(
                "bob",
                Chips::new(480),
                TransactionKind::Withdrawal,
                "drain",
                None,
            )
            .await
            .unwrap();

        let created = rig.queue.try_match(stake).await.unwrap();
        assert_eq!(created, 0);

        // Alice is back at the front with her balance intact
        assert_eq!(rig.queue.queue_len(stake), 1);
        assert_eq!(rig.wallet.get_balance("alice").await, Chips::new(500));
        assert_eq!(rig.registry.active_games(), 0);

        // Bob was told why
        let mut saw_error = false;
        while let Ok(event) = rx_b.try_recv() {
            if let ServerEvent::Error { code, .. } = event {
                assert_eq!(code, "insufficient_funds");
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_cancel_removes_entry() {
        let rig = rig().await;
        fund(&rig.wallet, "alice", 500).await;
        let stake = Chips::new(50);

        let (alice, mut rx) = request("alice");
        rig.queue.enqueue(stake, alice).await.unwrap();
        assert!(rig.queue.cancel(stake, "alice"));
        assert_eq!(rig.queue.queue_len(stake), 0);
        assert!(!rig.queue.cancel(stake, "alice"));

        let mut cancelled = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ServerEvent::QueueCancelled { .. }) {
                cancelled = true;
            }
        }
        assert!(cancelled);
    }

    #[tokio::test]
    async fn test_stake_bounds_enforced() {
        let rig = rig().await;
        fund(&rig.wallet, "alice", 500).await;

        let (low, _rx) = request("alice");
        let err = rig.queue.enqueue(Chips::new(5), low).await.unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));

        let (poor, _rx) = request("charlie");
        let err = rig.queue.enqueue(Chips::new(50), poor).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { .. }));
    }
}
