//! Decision ledger - append-only audit store for autonomous decisions
//!
//! Receipts buffer in memory and flush to SQLite once ten are pending or on
//! explicit flush (always before a read). Sensitive input values are one-way
//! hashed before they ever reach the buffer, so plaintext identifiers never
//! touch storage. Retention is a rolling 90 days, enforced lazily on read
//! and by a periodic sweep.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::models::receipt::{ActionKind, DecisionReceipt, NewReceipt, Outcome};

/// Input keys whose values are hashed before storage
const SENSITIVE_KEYS: [&str; 3] = ["user_id", "device_token", "calendar_id"];

/// ---------------------------------------------------------------------------
/// Query Filter
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ReceiptFilter {
  pub action: Option<ActionKind>,
  pub since: Option<DateTime<Utc>>,
  pub until: Option<DateTime<Utc>>,
  pub limit: Option<i64>,
}

impl ReceiptFilter {
  pub fn action(kind: ActionKind) -> Self {
    Self {
      action: Some(kind),
      ..Self::default()
    }
  }

  pub fn trailing_days(mut self, days: i64) -> Self {
    self.since = Some(Utc::now() - Duration::days(days));
    self
  }

  pub fn limit(mut self, limit: i64) -> Self {
    self.limit = Some(limit);
    self
  }
}

/// ---------------------------------------------------------------------------
/// Ledger
/// ---------------------------------------------------------------------------

pub struct DecisionLedger {
  pool: SqlitePool,
  retention_days: i64,
  flush_threshold: usize,
  buffer: Mutex<Vec<DecisionReceipt>>,
  next_id: AtomicI64,
}

type ReceiptRow = (
  i64,
  String,
  DateTime<Utc>,
  DateTime<Utc>,
  String,
  String,
  f64,
  String,
  Option<String>,
  Option<f64>,
);

fn receipt_from_row(row: ReceiptRow) -> Option<DecisionReceipt> {
  let (id, action, created_at, expires_at, inputs, alternatives, confidence, tag, reason, delta) =
    row;
  Some(DecisionReceipt {
    id,
    action: action.parse().ok()?,
    created_at,
    expires_at,
    inputs: serde_json::from_str(&inputs).ok()?,
    alternatives: serde_json::from_str(&alternatives).ok()?,
    confidence,
    outcome: Outcome::from_columns(&tag, reason),
    trust_delta: delta,
  })
}

const RECEIPT_COLUMNS: &str = "id, action, created_at, expires_at, inputs_json, \
  alternatives_json, confidence, outcome, outcome_reason, trust_delta";

impl DecisionLedger {
  /// Open a ledger on an initialized pool. Ids continue from whatever is
  /// already persisted.
  pub async fn new(
    pool: SqlitePool,
    retention_days: i64,
    flush_threshold: usize,
  ) -> Result<Self, CoreError> {
    let (max_id,): (Option<i64>,) =
      sqlx::query_as("SELECT MAX(id) FROM decision_receipts")
        .fetch_one(&pool)
        .await?;

    Ok(Self {
      pool,
      retention_days,
      flush_threshold,
      buffer: Mutex::new(Vec::new()),
      next_id: AtomicI64::new(max_id.unwrap_or(0) + 1),
    })
  }

  /// Record one autonomous decision. Sensitive input values are hashed
  /// here, before the receipt exists anywhere.
  pub async fn record(&self, draft: NewReceipt) -> Result<i64, CoreError> {
    let now = Utc::now();
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);

    let inputs = draft
      .inputs
      .into_iter()
      .map(|(key, value)| {
        if SENSITIVE_KEYS.contains(&key.as_str()) {
          let digest = Sha256::digest(value.as_bytes());
          (key, format!("sha256:{}", hex::encode(digest)))
        } else {
          (key, value)
        }
      })
      .collect();

    let receipt = DecisionReceipt {
      id,
      action: draft.action,
      created_at: now,
      expires_at: now + Duration::days(self.retention_days),
      inputs,
      alternatives: draft.alternatives,
      confidence: draft.confidence.clamp(0.0, 1.0),
      outcome: draft.outcome,
      trust_delta: draft.trust_delta,
    };

    let pending = {
      let mut buffer = self.buffer.lock().await;
      buffer.push(receipt);
      buffer.len()
    };

    if pending >= self.flush_threshold {
      self.flush().await?;
    }

    Ok(id)
  }

  /// Write all buffered receipts to storage. Buffered receipts go back on
  /// the buffer if the write fails, so nothing is silently dropped.
  pub async fn flush(&self) -> Result<(), CoreError> {
    let pending: Vec<DecisionReceipt> = {
      let mut buffer = self.buffer.lock().await;
      buffer.drain(..).collect()
    };

    if pending.is_empty() {
      return Ok(());
    }

    for (i, receipt) in pending.iter().enumerate() {
      if let Err(e) = self.insert(receipt).await {
        tracing::warn!(error = %e, "ledger flush failed, re-buffering receipts");
        let mut buffer = self.buffer.lock().await;
        for receipt in pending[i..].iter().rev() {
          buffer.insert(0, receipt.clone());
        }
        return Err(e);
      }
    }

    Ok(())
  }

  async fn insert(&self, receipt: &DecisionReceipt) -> Result<(), CoreError> {
    sqlx::query(
      r#"
      INSERT INTO decision_receipts (
        id, action, created_at, expires_at, inputs_json, alternatives_json,
        confidence, outcome, outcome_reason, trust_delta
      )
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
      "#,
    )
    .bind(receipt.id)
    .bind(receipt.action.as_str())
    .bind(receipt.created_at)
    .bind(receipt.expires_at)
    .bind(serde_json::to_string(&receipt.inputs)?)
    .bind(serde_json::to_string(&receipt.alternatives)?)
    .bind(receipt.confidence)
    .bind(receipt.outcome.tag())
    .bind(receipt.outcome.reason())
    .bind(receipt.trust_delta)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  /// Query receipts newest-first. Flushes the buffer first so reads always
  /// see a consistent view; expired receipts are filtered even if the sweep
  /// has not run yet.
  pub async fn query(&self, filter: ReceiptFilter) -> Result<Vec<DecisionReceipt>, CoreError> {
    self.flush().await?;

    let now = Utc::now();
    let since = filter.since.unwrap_or_else(|| now - Duration::days(36500));
    let until = filter.until.unwrap_or_else(|| now + Duration::days(36500));
    let limit = filter.limit.unwrap_or(i64::MAX);

    let rows: Vec<ReceiptRow> = match filter.action {
      Some(action) => {
        sqlx::query_as(&format!(
          r#"
          SELECT {}
          FROM decision_receipts
          WHERE action = ?1 AND created_at >= ?2 AND created_at <= ?3 AND expires_at > ?4
          ORDER BY created_at DESC, id DESC
          LIMIT ?5
          "#,
          RECEIPT_COLUMNS
        ))
        .bind(action.as_str())
        .bind(since)
        .bind(until)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
      }
      None => {
        sqlx::query_as(&format!(
          r#"
          SELECT {}
          FROM decision_receipts
          WHERE created_at >= ?1 AND created_at <= ?2 AND expires_at > ?3
          ORDER BY created_at DESC, id DESC
          LIMIT ?4
          "#,
          RECEIPT_COLUMNS
        ))
        .bind(since)
        .bind(until)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
      }
    };

    Ok(rows.into_iter().filter_map(receipt_from_row).collect())
  }

  /// Set the outcome of a pending receipt. Receipts are immutable once
  /// their outcome is set; a second call is a no-op returning false.
  pub async fn set_outcome(&self, id: i64, outcome: Outcome) -> Result<bool, CoreError> {
    {
      let mut buffer = self.buffer.lock().await;
      if let Some(receipt) = buffer.iter_mut().find(|r| r.id == id) {
        if receipt.outcome != Outcome::Pending {
          return Ok(false);
        }
        receipt.outcome = outcome;
        return Ok(true);
      }
    }

    let result = sqlx::query(
      r#"
      UPDATE decision_receipts
      SET outcome = ?1, outcome_reason = ?2
      WHERE id = ?3 AND outcome = 'pending'
      "#,
    )
    .bind(outcome.tag())
    .bind(outcome.reason())
    .bind(id)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() > 0)
  }

  /// ---------------------------------------------------------------------------
  /// Analytics
  /// ---------------------------------------------------------------------------

  /// Fraction of decided receipts (non-pending) that succeeded, over a
  /// trailing window. None when nothing has been decided.
  pub async fn success_rate(&self, action: ActionKind, days: i64) -> Result<Option<f64>, CoreError> {
    let receipts = self
      .query(ReceiptFilter::action(action).trailing_days(days))
      .await?;

    let decided: Vec<_> = receipts
      .iter()
      .filter(|r| r.outcome != Outcome::Pending)
      .collect();

    if decided.is_empty() {
      return Ok(None);
    }

    let successes = decided
      .iter()
      .filter(|r| r.outcome == Outcome::Success)
      .count();

    Ok(Some(successes as f64 / decided.len() as f64))
  }

  /// Mean confidence for an action kind over a trailing window
  pub async fn average_confidence(
    &self,
    action: ActionKind,
    days: i64,
  ) -> Result<Option<f64>, CoreError> {
    let receipts = self
      .query(ReceiptFilter::action(action).trailing_days(days))
      .await?;

    if receipts.is_empty() {
      return Ok(None);
    }

    let sum: f64 = receipts.iter().map(|r| r.confidence).sum();
    Ok(Some(sum / receipts.len() as f64))
  }

  /// Per-action receipt counts over a trailing window, for the weekly report
  pub async fn action_counts(&self, days: i64) -> Result<Vec<(ActionKind, i64)>, CoreError> {
    self.flush().await?;
    let since = Utc::now() - Duration::days(days);

    let rows: Vec<(String, i64)> = sqlx::query_as(
      r#"
      SELECT action, COUNT(*)
      FROM decision_receipts
      WHERE created_at >= ?1 AND expires_at > ?2
      GROUP BY action
      "#,
    )
    .bind(since)
    .bind(Utc::now())
    .fetch_all(&self.pool)
    .await?;

    Ok(
      rows
        .into_iter()
        .filter_map(|(action, count)| Some((action.parse().ok()?, count)))
        .collect(),
    )
  }

  /// ---------------------------------------------------------------------------
  /// Retention
  /// ---------------------------------------------------------------------------

  /// Delete receipts past their expiry. The sweep runs against storage only
  /// and never holds the buffer lock, so concurrent reads and writes of
  /// recent receipts proceed normally.
  pub async fn prune_expired(&self) -> Result<u64, CoreError> {
    let result = sqlx::query("DELETE FROM decision_receipts WHERE expires_at <= ?1")
      .bind(Utc::now())
      .execute(&self.pool)
      .await?;

    let deleted = result.rows_affected();
    if deleted > 0 {
      tracing::info!(deleted, "pruned expired decision receipts");
    }

    Ok(deleted)
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
