//! `spendsheet sync`: bring the spreadsheet in line with the store.

use crate::api::Mode;
use crate::args::SyncArgs;
use crate::commands::Out;
use crate::error::{ErrorType, IntoResult};
use crate::reconcile::{Reconciler, SyncMode, SyncReport};
use crate::{Config, Result};
use tracing::info;

/// Runs one reconciliation. `--clean` removes rows that do not belong in the mirror, `--force`
/// bulk syncs without checking first, and by default a bulk sync only happens when some month
/// sheet is missing data.
pub async fn sync(config: Config, mode: Mode, args: SyncArgs) -> Result<Out<SyncReport>> {
    let sync_mode = if args.clean() {
        SyncMode::Clean
    } else if args.force() {
        SyncMode::Force
    } else {
        SyncMode::Auto
    };

    if sync_mode != SyncMode::Clean
        && config
            .db()
            .count_processed()
            .await
            .pub_result(ErrorType::Persistence)?
            == 0
    {
        return Ok("There are no transactions, nothing to sync".into());
    }

    let mut reconciler = Reconciler::open(&config, mode).await?;
    let report = reconciler.run(sync_mode).await?;
    info!(
        "Sync went through {}",
        report
            .states
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    Ok(Out::new(describe(&report), report))
}

fn describe(report: &SyncReport) -> String {
    let mut parts = Vec::new();
    if !report.sheets_created.is_empty() {
        parts.push(format!("Created {} sheets", report.sheets_created.len()));
    }
    if let Some(bulk) = &report.bulk_sync {
        parts.push(format!(
            "Wrote {} rows to {} months ({} skipped, {} failed)",
            bulk.rows_written,
            bulk.months_written.len(),
            bulk.months_skipped.len(),
            bulk.months_failed.len()
        ));
    }
    if let Some(clean) = &report.clean {
        let mut line = format!("Removed {} rows", clean.rows_deleted);
        if clean.rows_failed > 0 || !clean.sheets_failed.is_empty() {
            line.push_str(&format!(
                " ({} rows and {} sheets failed)",
                clean.rows_failed,
                clean.sheets_failed.len()
            ));
        }
        if let Some(before) = &report.integrity_before {
            line.push_str(&format!(
                ", invalid rows went from {} to {}",
                before.invalid_rows + before.empty_rows,
                clean.integrity.invalid_rows + clean.integrity.empty_rows
            ));
        }
        parts.push(line);
    }
    if report.bulk_sync.is_none() && report.clean.is_none() {
        parts.push("The spreadsheet already has every month".to_string());
    }
    if report.rollup_updated {
        parts.push("Updated the summary sheet".to_string());
    }
    parts.join(". ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use crate::reconcile::SyncState;
    use crate::test::TestEnv;

    #[tokio::test]
    async fn test_sync_empty_store() {
        let env = TestEnv::new().await;
        let out = sync(env.config(), Mode::Testing, SyncArgs::new(false, false))
            .await
            .unwrap();
        assert!(out.structure().is_none());
        assert!(out.message().contains("nothing to sync"));
        assert_eq!(env.get_state().writes, 0);
    }

    #[tokio::test]
    async fn test_sync_then_skip() {
        let env = TestEnv::new().await;
        env.insert_transaction("2025-01-05", "20", Category::Food).await;
        env.insert_transaction("2025-03-07", "5", Category::Transport).await;

        let out = sync(env.config(), Mode::Testing, SyncArgs::new(false, false))
            .await
            .unwrap();
        let report = out.structure().unwrap();
        let bulk = report.bulk_sync.as_ref().unwrap();
        assert_eq!(bulk.rows_written, 2);
        assert_eq!(bulk.months_written, vec!["January", "March"]);
        assert!(report.rollup_updated);

        let writes = env.get_state().writes;
        let out = sync(env.config(), Mode::Testing, SyncArgs::new(false, false))
            .await
            .unwrap();
        let report = out.structure().unwrap();
        assert!(report.states.contains(&SyncState::Skipped));
        assert!(!report.rollup_updated);
        assert_eq!(env.get_state().writes, writes);
    }

    #[tokio::test]
    async fn test_clean_removes_foreign_rows() {
        let env = TestEnv::new().await;
        env.insert_transaction("2025-02-01", "10", Category::Food).await;
        sync(env.config(), Mode::Testing, SyncArgs::new(false, false))
            .await
            .unwrap();

        let mut state = env.get_state();
        let mut rows = state.rows("February").unwrap().clone();
        rows.push(vec!["999".into(), "2025-02-02".into(), "Ghost".into()]);
        rows.push(vec![String::new(), "2025-02-03".into(), "No id".into()]);
        state.set_rows("February", rows);
        env.set_state(state);

        let out = sync(env.config(), Mode::Testing, SyncArgs::new(true, false))
            .await
            .unwrap();
        let report = out.structure().unwrap();
        assert_eq!(report.integrity_before.as_ref().unwrap().invalid_rows, 1);
        assert_eq!(report.integrity_before.as_ref().unwrap().empty_rows, 1);
        let clean = report.clean.as_ref().unwrap();
        assert_eq!(clean.rows_deleted, 2);
        assert!(clean.integrity.integrity_ok);
        assert_eq!(env.get_state().rows("February").unwrap().len(), 2);
    }
}
