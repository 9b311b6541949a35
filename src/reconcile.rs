//! Keeps the spreadsheet mirror in line with the transaction store.
//!
//! The store is the source of truth. Every invocation re-derives what to do from the current
//! contents of the store and the mirror; nothing about a reconciliation is persisted, so a crash
//! mid-way is repaired by simply running again.
//!
//! A reconciliation walks `Idle -> Checking -> {Skipped | BulkSyncing | Cleaning} ->
//! RollupUpdating -> Idle`. Spreadsheet failures are contained to the smallest unit of work (a
//! month during bulk sync, a sheet or row during cleaning) and logged. Store failures abort.

use crate::api::{self, Mode};
use crate::config::Pacing;
use crate::db::{Db, PeriodFilter};
use crate::error::{ErrorType, IntoResult};
use crate::mirror::{self, Mirror};
use crate::model::{MirrorRef, Month, Transaction};
use crate::{Config, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Which path a reconciliation takes after the check.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Bulk sync only if a month sheet is missing data the store has.
    #[default]
    Auto,
    /// Bulk sync without checking first.
    Force,
    /// Remove empty and foreign rows instead of syncing.
    Clean,
}

/// The states a reconciliation passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Idle,
    Checking,
    Skipped,
    BulkSyncing,
    Cleaning,
    RollupUpdating,
}

serde_plain::derive_display_from_serialize!(SyncState);

/// Row counts of one month sheet. Counts exclude the header row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SheetIntegrity {
    pub sheet: String,
    pub total_rows: usize,
    pub valid_rows: usize,
    /// Rows whose id is not in the store.
    pub invalid_rows: usize,
    /// Rows without an id.
    pub empty_rows: usize,
    /// Set when the sheet could not be read. Counts are zero in that case.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Row counts across all month sheets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
    pub empty_rows: usize,
    pub integrity_ok: bool,
    pub sheets: Vec<SheetIntegrity>,
}

impl IntegrityReport {
    fn from_sheets(sheets: Vec<SheetIntegrity>) -> Self {
        let total_rows = sheets.iter().map(|s| s.total_rows).sum();
        let valid_rows = sheets.iter().map(|s| s.valid_rows).sum();
        let invalid_rows = sheets.iter().map(|s| s.invalid_rows).sum();
        let empty_rows = sheets.iter().map(|s| s.empty_rows).sum();
        Self {
            total_rows,
            valid_rows,
            invalid_rows,
            empty_rows,
            integrity_ok: invalid_rows == 0 && empty_rows == 0,
            sheets,
        }
    }

    pub fn sheet(&self, name: &str) -> Option<&SheetIntegrity> {
        self.sheets.iter().find(|s| s.sheet == name)
    }
}

/// What a bulk sync did, month by month.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkSyncReport {
    pub months_written: Vec<String>,
    /// Months left alone because their sheet already had data rows.
    pub months_skipped: Vec<String>,
    pub months_failed: Vec<String>,
    pub rows_written: usize,
    /// Only set by a standalone bulk sync. A reconciliation run recomputes the rollup in its own
    /// step and reports it on `SyncReport`.
    pub rollup_updated: bool,
}

/// What a clean did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub rows_deleted: usize,
    pub rows_failed: usize,
    pub sheets_failed: Vec<String>,
    /// Integrity of the mirror after cleaning.
    pub integrity: IntegrityReport,
}

/// The outcome of a startup structure check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StructureReport {
    pub sheets_created: Vec<String>,
    pub sync_performed: bool,
    pub rollup_updated: bool,
}

/// The outcome of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub states: Vec<SyncState>,
    pub sheets_created: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulk_sync: Option<BulkSyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_before: Option<IntegrityReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clean: Option<CleanReport>,
    pub rollup_updated: bool,
}

/// Aligns the mirror with the store.
pub(crate) struct Reconciler {
    db: Db,
    mirror: Mirror,
    pacing: Pacing,
    spreadsheet_id: String,
}

impl Reconciler {
    pub(crate) fn new(
        db: Db,
        mirror: Mirror,
        pacing: Pacing,
        spreadsheet_id: impl Into<String>,
    ) -> Self {
        Self {
            db,
            mirror,
            pacing,
            spreadsheet_id: spreadsheet_id.into(),
        }
    }

    /// Connects to the configured spreadsheet.
    pub(crate) async fn open(config: &Config, mode: Mode) -> Result<Self> {
        let sheet = api::sheet(config, mode)
            .await
            .pub_result(ErrorType::Auth)?;
        Ok(Self::new(
            config.db().clone(),
            Mirror::new(sheet, config.locale()),
            config.pacing(),
            config.spreadsheet_id(),
        ))
    }

    /// Runs one reconciliation while holding the mirror's writer lock.
    pub(crate) async fn run(&mut self, mode: SyncMode) -> Result<SyncReport> {
        let _guard = lock_mirror(&self.spreadsheet_id).await;
        let mut states = vec![SyncState::Idle];
        enter(&mut states, SyncState::Checking);

        let sheets_created = self.create_missing_sheets().await?;
        let mut report = SyncReport {
            mode,
            states: Vec::new(),
            sheets_created,
            bulk_sync: None,
            integrity_before: None,
            clean: None,
            rollup_updated: false,
        };

        match mode {
            SyncMode::Clean => {
                enter(&mut states, SyncState::Cleaning);
                report.integrity_before = Some(self.validate_integrity().await?);
                report.clean = Some(self.clean_inconsistent_data().await?);
            }
            SyncMode::Force => {
                enter(&mut states, SyncState::BulkSyncing);
                report.bulk_sync = Some(self.sync_months().await?);
            }
            SyncMode::Auto => {
                if !report.sheets_created.is_empty() || self.sync_needed().await? {
                    enter(&mut states, SyncState::BulkSyncing);
                    report.bulk_sync = Some(self.sync_months().await?);
                } else {
                    enter(&mut states, SyncState::Skipped);
                }
            }
        }

        enter(&mut states, SyncState::RollupUpdating);
        report.rollup_updated = self.update_rollup().await;
        enter(&mut states, SyncState::Idle);
        report.states = states;
        Ok(report)
    }

    /// Creates missing sheets and bulk syncs when they were just created, when `force` is set or
    /// when a month sheet is missing data. Meant to run when a long-lived process starts.
    pub(crate) async fn ensure_structure(&mut self, force: bool) -> Result<StructureReport> {
        let _guard = lock_mirror(&self.spreadsheet_id).await;
        let sheets_created = self.create_missing_sheets().await?;
        let sync_performed = force || !sheets_created.is_empty() || self.sync_needed().await?;
        let rollup_updated = if sync_performed {
            self.bulk_sync().await?.rollup_updated
        } else {
            self.update_rollup().await
        };
        Ok(StructureReport {
            sheets_created,
            sync_performed,
            rollup_updated,
        })
    }

    /// True when some month has processed transactions in the store but only a header in its
    /// sheet, or when a month sheet cannot be read at all.
    pub(crate) async fn sync_needed(&mut self) -> Result<bool> {
        let months_with_data: HashSet<Month> = self
            .db
            .list_processed(PeriodFilter::All)
            .await
            .pub_result(ErrorType::Persistence)?
            .iter()
            .map(Transaction::month)
            .collect();

        for month in Month::ALL {
            if !months_with_data.contains(&month) {
                continue;
            }
            match self.mirror.has_data(month).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Sync needed, {month} has no rows in the mirror");
                    return Ok(true);
                }
                Err(e) => {
                    warn!("Unable to read the sheet for {month}, assuming a sync is needed: {e:#}");
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Writes every month whose sheet has no data rows, then recomputes the rollup.
    pub(crate) async fn bulk_sync(&mut self) -> Result<BulkSyncReport> {
        let mut report = self.sync_months().await?;
        report.rollup_updated = self.update_rollup().await;
        Ok(report)
    }

    /// Bulk sync without the rollup step.
    ///
    /// A month whose sheet already has any data row is skipped entirely, even if it is missing
    /// some transactions. Cleaning followed by a forced sync does not fill such a month either;
    /// the rows are only added one at a time by `project`.
    async fn sync_months(&mut self) -> Result<BulkSyncReport> {
        let mut report = BulkSyncReport::default();
        let mut refs: Vec<(i64, MirrorRef)> = Vec::new();
        let mut visited = 0;
        for month in Month::ALL {
            let month_txns = self
                .db
                .list_processed(PeriodFilter::Month(month))
                .await
                .pub_result(ErrorType::Persistence)?;
            if month_txns.is_empty() {
                continue;
            }
            if visited > 0 {
                pause(self.pacing.month()).await;
            }
            visited += 1;

            let sheet_name = self.mirror.month_sheet(month);
            match self.mirror.has_data(month).await {
                Ok(true) => {
                    debug!("Skipping {sheet_name}, it already has data");
                    report.months_skipped.push(sheet_name);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Unable to read {sheet_name}, skipping it: {e:#}");
                    report.months_failed.push(sheet_name);
                    continue;
                }
            }
            match self.mirror.write_month(month, &month_txns).await {
                Ok(written) => {
                    debug!("Wrote {} rows to {sheet_name}", written.len());
                    report.rows_written += written.len();
                    refs.extend(written);
                    report.months_written.push(sheet_name);
                }
                Err(e) => {
                    warn!("Unable to write {sheet_name}, skipping it: {e:#}");
                    report.months_failed.push(sheet_name);
                }
            }
        }

        self.db
            .update_mirror_refs(&refs)
            .await
            .pub_result(ErrorType::Persistence)?;
        info!(
            "Bulk sync wrote {} rows ({} months written, {} skipped, {} failed)",
            report.rows_written,
            report.months_written.len(),
            report.months_skipped.len(),
            report.months_failed.len()
        );
        Ok(report)
    }

    /// Deletes rows without an id and rows whose id is not in the store from every month sheet,
    /// bottom to top so that earlier deletions do not move the rows still to be deleted.
    pub(crate) async fn clean_inconsistent_data(&mut self) -> Result<CleanReport> {
        let valid_ids = self
            .db
            .processed_ids()
            .await
            .pub_result(ErrorType::Persistence)?;

        let mut report = CleanReport::default();
        let mut refs: Vec<(i64, MirrorRef)> = Vec::new();
        for (i, sheet_name) in self.mirror.month_sheets().into_iter().enumerate() {
            if i > 0 {
                pause(self.pacing.sheet()).await;
            }
            let rows = match self.mirror.read(&sheet_name).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("Unable to read {sheet_name}, not cleaning it: {e:#}");
                    report.sheets_failed.push(sheet_name);
                    continue;
                }
            };

            let doomed: Vec<usize> = data_rows(&rows)
                .filter(|(_, row)| classify(row, &valid_ids) != RowKind::Valid)
                .map(|(row_number, _)| row_number)
                .collect();
            if doomed.is_empty() {
                continue;
            }

            debug!("Deleting {} rows from {sheet_name}", doomed.len());
            let mut failed = 0;
            for (j, row_number) in doomed.iter().rev().enumerate() {
                if j > 0 {
                    pause(self.pacing.row()).await;
                }
                match self.mirror.delete_row(&sheet_name, *row_number).await {
                    Ok(()) => report.rows_deleted += 1,
                    Err(e) => {
                        warn!("Unable to delete row {row_number} from {sheet_name}: {e:#}");
                        failed += 1;
                    }
                }
            }
            report.rows_failed += failed;

            // Surviving rows moved up; their positions are only known when every deletion landed
            if failed == 0 {
                let doomed: HashSet<usize> = doomed.into_iter().collect();
                let survivors = data_rows(&rows)
                    .filter(|(row_number, _)| !doomed.contains(row_number))
                    .enumerate();
                for (k, (_, row)) in survivors {
                    if let Ok(id) = mirror::row_id(row).parse::<i64>() {
                        refs.push((id, MirrorRef::new(sheet_name.clone(), k + 2)));
                    }
                }
            }
        }

        self.db
            .update_mirror_refs(&refs)
            .await
            .pub_result(ErrorType::Persistence)?;
        info!(
            "Clean deleted {} rows, {} deletions failed",
            report.rows_deleted, report.rows_failed
        );
        report.integrity = self.validate_integrity().await?;
        Ok(report)
    }

    /// Counts valid, invalid and empty rows in every month sheet. Never writes.
    pub(crate) async fn validate_integrity(&mut self) -> Result<IntegrityReport> {
        let valid_ids = self
            .db
            .processed_ids()
            .await
            .pub_result(ErrorType::Persistence)?;

        let mut sheets = Vec::new();
        for sheet_name in self.mirror.month_sheets() {
            let mut sheet = SheetIntegrity {
                sheet: sheet_name.clone(),
                ..SheetIntegrity::default()
            };
            match self.mirror.read(&sheet_name).await {
                Ok(rows) => {
                    for (_, row) in data_rows(&rows) {
                        sheet.total_rows += 1;
                        match classify(row, &valid_ids) {
                            RowKind::Valid => sheet.valid_rows += 1,
                            RowKind::Invalid => sheet.invalid_rows += 1,
                            RowKind::Empty => sheet.empty_rows += 1,
                        }
                    }
                }
                Err(e) => {
                    warn!("Unable to read {sheet_name} for the integrity check: {e:#}");
                    sheet.error = Some(format!("{e:#}"));
                }
            }
            sheets.push(sheet);
        }
        Ok(IntegrityReport::from_sheets(sheets))
    }

    async fn create_missing_sheets(&mut self) -> Result<Vec<String>> {
        let created = self
            .mirror
            .create_missing_sheets()
            .await
            .pub_result(ErrorType::Mirror)?;
        if !created.is_empty() {
            info!("Created sheets: {}", created.join(", "));
        }
        Ok(created)
    }

    /// Recomputes the rollup. Failures are logged, not returned: the month sheets are intact and
    /// the next reconciliation retries.
    async fn update_rollup(&mut self) -> bool {
        match self.mirror.recompute_rollup().await {
            Ok(updated) => updated,
            Err(e) => {
                warn!("Unable to update the rollup: {e:#}");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowKind {
    Valid,
    Invalid,
    Empty,
}

fn classify(row: &[String], valid_ids: &HashSet<String>) -> RowKind {
    let id = mirror::row_id(row);
    if id.is_empty() {
        RowKind::Empty
    } else if valid_ids.contains(id) {
        RowKind::Valid
    } else {
        RowKind::Invalid
    }
}

/// Data rows with their 1-based row numbers.
fn data_rows(rows: &[Vec<String>]) -> impl Iterator<Item = (usize, &Vec<String>)> {
    rows.iter().enumerate().skip(1).map(|(i, row)| (i + 1, row))
}

fn enter(states: &mut Vec<SyncState>, state: SyncState) {
    debug!("Reconciler state: {state}");
    states.push(state);
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Serialises mirror writes within this process, per spreadsheet. Bulk sync checks a sheet and
/// then writes it, so two writers interleaving would insert rows twice.
pub(crate) async fn lock_mirror(spreadsheet_id: &str) -> OwnedMutexGuard<()> {
    static LOCKS: OnceLock<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>> = OnceLock::new();
    let lock = {
        let mut locks = LOCKS
            .get_or_init(|| Mutex::new(HashMap::new()))
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        locks
            .entry(spreadsheet_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    };
    lock.lock_owned().await
}
