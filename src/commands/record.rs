//! `spendsheet record`: interpret a message, store the transaction and project it to the mirror.

use crate::api::{self, Mode};
use crate::args::RecordArgs;
use crate::commands::Out;
use crate::error::{Error, ErrorType, IntoResult, Res};
use crate::interpret;
use crate::mirror::Mirror;
use crate::model::{MessageSource, MirrorRef, NewTransaction, Status, Transaction};
use crate::reconcile::lock_mirror;
use crate::{Config, Result};
use anyhow::Context;
use chrono::Local;
use serde::Serialize;
use tracing::{debug, warn};

/// What `record` did.
#[derive(Debug, Clone, Serialize)]
pub struct Recorded {
    pub transaction: Transaction,
    /// Where the transaction was written in the mirror, if that succeeded.
    pub mirror_ref: Option<MirrorRef>,
    pub rollup_updated: bool,
    /// Mirror problems. The transaction is stored regardless and `spendsheet sync` repairs the
    /// mirror.
    pub warnings: Vec<String>,
}

/// Interprets `args.text()`, appends the result to the store and projects it to the mirror.
///
/// Only interpretation and store failures are errors. Once the transaction is stored, problems
/// with the spreadsheet are returned as warnings.
pub async fn record(config: Config, mode: Mode, args: RecordArgs) -> Result<Out<Recorded>> {
    let text = args.text().trim();
    if text.is_empty() {
        return Err(Error::validation("The message to record is empty"));
    }

    let interpreter = interpret::interpreter(&config, mode).pub_result(ErrorType::Interpretation)?;
    let interpretation = interpreter
        .interpret(text, Local::now().date_naive())
        .await
        .with_context(|| format!("Unable to interpret '{text}'"))
        .pub_result(ErrorType::Interpretation)?;
    debug!("Interpreted as {interpretation:?}");

    let new_txn = NewTransaction {
        original_message: text.to_string(),
        source: MessageSource {
            sender_id: args.sender().map(str::to_string),
            conversation_id: args.conversation().map(str::to_string),
            message_id: args.message().map(str::to_string),
        },
        description: interpretation.description,
        amount: interpretation.amount,
        category: interpretation.category,
        date: interpretation.date,
        confidence: interpretation.confidence,
        status: Status::Processed,
    };
    let db = config.db();
    let id = db.append(&new_txn).await.pub_result(ErrorType::Persistence)?;
    let txn = stored(&config, id).await?;

    let mut warnings = Vec::new();
    let mut mirror_ref = None;
    let mut rollup_updated = false;
    match api::sheet(&config, mode).await {
        Ok(sheet) => {
            let mut mirror = Mirror::new(sheet, config.locale());
            let _guard = lock_mirror(config.spreadsheet_id()).await;
            match project(&mut mirror, &txn).await {
                Ok(placed) => {
                    db.update_mirror_ref(id, &placed)
                        .await
                        .pub_result(ErrorType::Persistence)?;
                    mirror_ref = Some(placed);
                }
                Err(e) => {
                    warn!("Transaction {id} is stored but not in the spreadsheet: {e:#}");
                    warnings.push(format!("Unable to write to the spreadsheet: {e:#}"));
                }
            }
            match mirror.recompute_rollup().await {
                Ok(updated) => rollup_updated = updated,
                Err(e) => {
                    warn!("Unable to update the summary sheet: {e:#}");
                    warnings.push(format!("Unable to update the summary sheet: {e:#}"));
                }
            }
        }
        Err(e) => {
            warn!("Unable to open the spreadsheet: {e:#}");
            warnings.push(format!("Unable to open the spreadsheet: {e:#}"));
        }
    }

    let txn = stored(&config, id).await?;
    let mut message = format!(
        "Recorded #{}: {} {} ({}) on {}",
        txn.id,
        txn.description,
        txn.amount.grouped(),
        config.locale().category_label(txn.category),
        config.locale().format_date(txn.date),
    );
    if !warnings.is_empty() {
        message.push_str(". The spreadsheet was not fully updated, run 'spendsheet sync'");
    }
    Ok(Out::new(
        message,
        Recorded {
            transaction: txn,
            mirror_ref,
            rollup_updated,
            warnings,
        },
    ))
}

async fn stored(config: &Config, id: i64) -> Result<Transaction> {
    config
        .db()
        .get(id)
        .await
        .and_then(|found| found.with_context(|| format!("Transaction {id} vanished")))
        .pub_result(ErrorType::Persistence)
}

async fn project(mirror: &mut Mirror, txn: &Transaction) -> Res<MirrorRef> {
    let created = mirror
        .create_missing_sheets()
        .await
        .context("Unable to create missing sheets")?;
    if !created.is_empty() {
        debug!("Created sheets {created:?}");
    }
    mirror.project(txn).await
}
