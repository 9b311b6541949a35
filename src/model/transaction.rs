use crate::model::{Amount, Category, MirrorRef, Month};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Processing state of a stored transaction. Only `Processed` transactions are mirrored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    #[default]
    Processed,
    Error,
}

serde_plain::derive_display_from_serialize!(Status);
serde_plain::derive_fromstr_from_deserialize!(Status);

/// A transaction as persisted in the store. `id` is assigned by the store and never reused; it is
/// also the key written to the first column of the mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub original_message: String,
    pub sender_id: Option<String>,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub description: String,
    pub amount: Amount,
    pub category: Category,
    pub date: NaiveDate,
    pub confidence: f64,
    pub status: Status,
    pub error_message: Option<String>,
    pub mirror_ref: Option<MirrorRef>,
    pub mirror_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// The month sheet this transaction belongs to.
    pub fn month(&self) -> Month {
        Month::of(self.date)
    }
}

/// Where a message came from. All fields are optional because the CLI has no chat context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSource {
    pub sender_id: Option<String>,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
}

/// A transaction that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub original_message: String,
    pub source: MessageSource,
    pub description: String,
    pub amount: Amount,
    pub category: Category,
    pub date: NaiveDate,
    pub confidence: f64,
    pub status: Status,
}

impl NewTransaction {
    /// Checks the invariants the store relies on: a positive amount, a confidence in `[0, 1]` and
    /// a non-empty description.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.amount.is_positive(),
            "Amount must be positive, got {}",
            self.amount
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.confidence),
            "Confidence must be between 0 and 1, got {}",
            self.confidence
        );
        anyhow::ensure!(
            !self.description.trim().is_empty(),
            "Description must not be empty"
        );
        Ok(())
    }
}
