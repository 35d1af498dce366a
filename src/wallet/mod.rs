//! Wallet ledger
//!
//! Atomic balance mutation with a durable, idempotent transaction log:
//! - Every movement appends a full row with balance before and after
//! - A `(reference_id, kind)` pair is applied at most once; replays are
//!   no-op successes, so at-least-once delivery yields exactly-once effect
//! - Per-user read-modify-write happens under one write lock, so a
//!   concurrent debit and credit can never race past each other
//!
//! Settlement rows carry the game id as their reference, which makes a
//! crashed settlement safe to retry without double-paying.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::persistence::{retry_with_backoff, Repository};
use crate::protocol::{Chips, UserId};

/// Ledger movement categories. The kind decides the sign of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    EntryFee,
    Payout,
    Refund,
    AddFunds,
    Withdrawal,
    Commission,
}

impl TransactionKind {
    pub fn is_debit(self) -> bool {
        matches!(self, TransactionKind::EntryFee | TransactionKind::Withdrawal)
    }
}

/// Append-only ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: String,
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount: Chips,
    pub balance_before: Chips,
    pub balance_after: Chips,
    pub reference_id: String,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl WalletTransaction {
    /// Amount signed by the row's kind, for reporting
    pub fn signed_amount(&self) -> i64 {
        let amount = self.amount.amount() as i64;
        if self.kind.is_debit() {
            -amount
        } else {
            amount
        }
    }
}

#[derive(Default)]
struct LedgerInner {
    balances: HashMap<UserId, Chips>,
    /// (reference_id, kind) -> transaction id of the applied row
    processed: HashMap<(String, TransactionKind), String>,
    transactions: Vec<WalletTransaction>,
}

/// Summary snapshot for reporting
#[derive(Debug, Clone)]
pub struct LedgerStats {
    pub total_accounts: usize,
    pub total_transactions: usize,
    pub total_balance: Chips,
}

/// Ledger over all user balances.
pub struct WalletLedger {
    inner: RwLock<LedgerInner>,
    repository: Arc<dyn Repository>,
}

impl WalletLedger {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            inner: RwLock::new(LedgerInner::default()),
            repository,
        }
    }

    pub async fn get_balance(&self, user_id: &str) -> Chips {
        self.inner
            .read()
            .await
            .balances
            .get(user_id)
            .copied()
            .unwrap_or(Chips::ZERO)
    }

    /// Whether a `(reference, kind)` pair has already been applied. Callers
    /// handling externally-retried events check this before acting; the
    /// ledger enforces it again on insert.
    pub async fn is_processed(&self, reference_id: &str, kind: TransactionKind) -> bool {
        self.inner
            .read()
            .await
            .processed
            .contains_key(&(reference_id.to_string(), kind))
    }

    /// Add chips to a balance. Replays of the same `(reference, kind)` are
    /// no-op successes returning the original transaction id.
    pub async fn credit(
        &self,
        user_id: &str,
        amount: Chips,
        kind: TransactionKind,
        reference_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<String> {
        if amount.is_zero() {
            return Err(Error::InvalidAmount("credit of zero chips".to_string()));
        }
        if kind.is_debit() {
            return Err(Error::InvalidAmount(format!(
                "{:?} is not a credit kind",
                kind
            )));
        }

        let tx = {
            let mut inner = self.inner.write().await;
            let key = (reference_id.to_string(), kind);
            if let Some(existing) = inner.processed.get(&key) {
                debug!(user_id, reference_id, ?kind, "duplicate credit ignored");
                return Ok(existing.clone());
            }

            let before = inner.balances.get(user_id).copied().unwrap_or(Chips::ZERO);
            let after = before.checked_add(amount)?;
            let tx = self.build_transaction(user_id, kind, amount, before, after, reference_id, metadata);
            inner.balances.insert(user_id.to_string(), after);
            inner.processed.insert(key, tx.id.clone());
            inner.transactions.push(tx.clone());
            tx
        };

        info!(
            user_id,
            amount = %amount,
            ?kind,
            reference_id,
            "credit applied"
        );
        self.persist(tx.clone());
        Ok(tx.id)
    }

    /// Remove chips from a balance, failing with `InsufficientFunds` and no
    /// mutation when the balance cannot cover the amount.
    pub async fn debit(
        &self,
        user_id: &str,
        amount: Chips,
        kind: TransactionKind,
        reference_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<String> {
        if amount.is_zero() {
            return Err(Error::InvalidAmount("debit of zero chips".to_string()));
        }
        if !kind.is_debit() {
            return Err(Error::InvalidAmount(format!(
                "{:?} is not a debit kind",
                kind
            )));
        }

        let tx = {
            let mut inner = self.inner.write().await;
            let key = (reference_id.to_string(), kind);
            if let Some(existing) = inner.processed.get(&key) {
                debug!(user_id, reference_id, ?kind, "duplicate debit ignored");
                return Ok(existing.clone());
            }

            let before = inner.balances.get(user_id).copied().unwrap_or(Chips::ZERO);
            let after = before.checked_sub(amount)?;
            let tx = self.build_transaction(user_id, kind, amount, before, after, reference_id, metadata);
            inner.balances.insert(user_id.to_string(), after);
            inner.processed.insert(key, tx.id.clone());
            inner.transactions.push(tx.clone());
            tx
        };

        info!(
            user_id,
            amount = %amount,
            ?kind,
            reference_id,
            "debit applied"
        );
        self.persist(tx.clone());
        Ok(tx.id)
    }

    /// Full ledger history for one user, oldest first
    pub async fn transactions_for_user(&self, user_id: &str) -> Vec<WalletTransaction> {
        self.inner
            .read()
            .await
            .transactions
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> LedgerStats {
        let inner = self.inner.read().await;
        let total_balance = inner
            .balances
            .values()
            .fold(Chips::ZERO, |acc, b| acc.checked_add(*b).unwrap_or(acc));
        LedgerStats {
            total_accounts: inner.balances.len(),
            total_transactions: inner.transactions.len(),
            total_balance,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_transaction(
        &self,
        user_id: &str,
        kind: TransactionKind,
        amount: Chips,
        before: Chips,
        after: Chips,
        reference_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> WalletTransaction {
        WalletTransaction {
            id: derive_transaction_id(user_id, kind, reference_id),
            user_id: user_id.to_string(),
            kind,
            amount,
            balance_before: before,
            balance_after: after,
            reference_id: reference_id.to_string(),
            metadata,
            timestamp: Utc::now(),
        }
    }

    // Durable append runs off the hot path; the in-memory row is already
    // authoritative for the live process.
    fn persist(&self, tx: WalletTransaction) {
        let repository = self.repository.clone();
        tokio::spawn(async move {
            let result = retry_with_backoff(
                "append_wallet_transaction",
                5,
                Duration::from_millis(50),
                || {
                    let repository = repository.clone();
                    let tx = tx.clone();
                    async move { repository.append_wallet_transaction(&tx).await }
                },
            )
            .await;
            if let Err(err) = result {
                error!(tx_id = %tx.id, error = %err, "wallet row not persisted");
            }
        });
    }
}

fn derive_transaction_id(user_id: &str, kind: TransactionKind, reference_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([kind as u8]);
    hasher.update(reference_id.as_bytes());
    hasher.update(
        Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_be_bytes(),
    );
    hasher.update(rand::random::<[u8; 16]>());
    hex::encode(&hasher.finalize()[..16])
}
