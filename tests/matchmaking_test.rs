//! Matchmaking integration: concurrent enqueue produces exactly one game
//! with exactly one debit per player, and partial failures roll back.

mod common;

use common::{default_timing, fund, harness, wait_for};
use ludorush::matchmaking::MatchRequest;
use ludorush::transport::{ConnectionHandle, ServerEvent};
use ludorush::Chips;

#[tokio::test]
async fn concurrent_enqueue_creates_exactly_one_game() {
    let h = harness(&[], default_timing());
    fund(&h.wallet, "alice", 500).await;
    fund(&h.wallet, "bob", 500).await;
    let stake = Chips::new(50);

    let (conn_a, mut rx_a) = ConnectionHandle::pair("alice");
    let (conn_b, mut rx_b) = ConnectionHandle::pair("bob");

    // Enqueue from two tasks at the same time
    let q1 = h.queue.clone();
    let q2 = h.queue.clone();
    let t1 = tokio::spawn(async move {
        q1.enqueue(stake, MatchRequest::new("alice", "Alice", conn_a))
            .await
    });
    let t2 = tokio::spawn(async move {
        q2.enqueue(stake, MatchRequest::new("bob", "Bob", conn_b))
            .await
    });
    t1.await.unwrap().unwrap();
    t2.await.unwrap().unwrap();

    // Exactly one game_created pair: both players see MatchFound for the
    // same game id
    let found_a = wait_for(&mut rx_a, |e| matches!(e, ServerEvent::MatchFound { .. })).await;
    let found_b = wait_for(&mut rx_b, |e| matches!(e, ServerEvent::MatchFound { .. })).await;
    let (game_a, game_b) = match (found_a, found_b) {
        (
            ServerEvent::MatchFound {
                game_id: a,
                prize_pool,
                ..
            },
            ServerEvent::MatchFound { game_id: b, .. },
        ) => {
            assert_eq!(prize_pool, Chips::new(90));
            (a, b)
        }
        _ => unreachable!(),
    };
    assert_eq!(game_a, game_b);
    assert_eq!(h.registry.active_games(), 1);

    // Each balance reduced by the stake exactly once; queue drained
    assert_eq!(h.wallet.get_balance("alice").await, Chips::new(450));
    assert_eq!(h.wallet.get_balance("bob").await, Chips::new(450));
    assert_eq!(h.queue.queue_len(stake), 0);
}

#[tokio::test]
async fn underfunded_player_cannot_even_queue() {
    let h = harness(&[], default_timing());
    fund(&h.wallet, "alice", 20).await;

    let (conn, _rx) = ConnectionHandle::pair("alice");
    let err = h
        .queue
        .enqueue(Chips::new(50), MatchRequest::new("alice", "Alice", conn))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ludorush::Error::InsufficientFunds {
            needed: 50,
            available: 20
        }
    ));
}

#[tokio::test]
async fn closed_connection_is_dropped_without_charge() {
    let h = harness(&[], default_timing());
    fund(&h.wallet, "alice", 500).await;
    fund(&h.wallet, "bob", 500).await;
    let stake = Chips::new(50);

    let (conn_a, rx_a) = ConnectionHandle::pair("alice");
    let (conn_b, mut _rx_b) = ConnectionHandle::pair("bob");
    h.queue
        .enqueue(stake, MatchRequest::new("alice", "Alice", conn_a))
        .await
        .unwrap();
    // Alice's socket dies while she waits
    drop(rx_a);
    h.queue
        .enqueue(stake, MatchRequest::new("bob", "Bob", conn_b))
        .await
        .unwrap();

    // Bob stays queued at the front, nobody was charged
    common::eventually(|| h.queue.queue_len(stake) == 1).await;
    assert_eq!(h.registry.active_games(), 0);
    assert_eq!(h.wallet.get_balance("alice").await, Chips::new(500));
    assert_eq!(h.wallet.get_balance("bob").await, Chips::new(500));
}
