//! Shared integration-test harness: wired registry + matchmaking + wallet
//! over the in-memory repository, with fully scripted dice.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use ludorush::config::{MatchmakingConfig, TimingConfig};
use ludorush::game::ScriptedDice;
use ludorush::matchmaking::MatchmakingQueue;
use ludorush::persistence::InMemoryRepository;
use ludorush::registry::GameRegistry;
use ludorush::transport::ServerEvent;
use ludorush::wallet::{TransactionKind, WalletLedger};
use ludorush::Chips;

pub struct Harness {
    pub repo: Arc<InMemoryRepository>,
    pub wallet: Arc<WalletLedger>,
    pub registry: Arc<GameRegistry>,
    pub queue: Arc<MatchmakingQueue>,
}

/// Build a fully wired stack. Every session created by the registry gets
/// the same scripted roll sequence.
pub fn harness(rolls: &'static [u8], timing: TimingConfig) -> Harness {
    let repo = Arc::new(InMemoryRepository::new());
    let wallet = Arc::new(WalletLedger::new(repo.clone()));
    let registry = GameRegistry::with_dice_factory(
        wallet.clone(),
        repo.clone(),
        timing,
        Box::new(move || Box::new(ScriptedDice::new(rolls))),
    );
    let queue = MatchmakingQueue::new(
        wallet.clone(),
        registry.clone(),
        MatchmakingConfig {
            match_debounce: Duration::from_millis(1),
            min_stake: 10,
            max_stake: 10_000,
        },
    );
    Harness {
        repo,
        wallet,
        registry,
        queue,
    }
}

pub fn default_timing() -> TimingConfig {
    TimingConfig {
        roll_timeout: Duration::from_secs(10),
        move_timeout: Duration::from_secs(10),
        reconnect_window: Duration::from_secs(10),
    }
}

pub async fn fund(wallet: &WalletLedger, user: &str, amount: u64) {
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

/// Wait for the next event matching the predicate, skipping others.
pub async fn wait_for<F>(rx: &mut UnboundedReceiver<ServerEvent>, mut pred: F) -> ServerEvent
where
    F: FnMut(&ServerEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

/// Poll until the condition holds or a few seconds pass.
pub async fn eventually<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(3), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never became true");
}
