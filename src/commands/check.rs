use crate::api::Mode;
use crate::commands::Out;
use crate::reconcile::{IntegrityReport, Reconciler};
use crate::{Config, Result};

/// Counts valid, foreign and id-less rows in every month sheet. Never writes to the spreadsheet.
pub async fn check(config: Config, mode: Mode) -> Result<Out<IntegrityReport>> {
    let mut reconciler = Reconciler::open(&config, mode).await?;
    let report = reconciler.validate_integrity().await?;
    let unreadable = report.sheets.iter().filter(|s| s.error.is_some()).count();

    let mut message = if report.integrity_ok {
        format!("All {} rows in the spreadsheet match the store", report.total_rows)
    } else {
        format!(
            "{} of {} rows do not match the store ({} unknown ids, {} without an id). \
            Run 'spendsheet sync --clean' to remove them",
            report.invalid_rows + report.empty_rows,
            report.total_rows,
            report.invalid_rows,
            report.empty_rows
        )
    };
    if unreadable > 0 {
        message.push_str(&format!(". {unreadable} sheets could not be read"));
    }
    Ok(Out::new(message, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::SyncArgs;
    use crate::commands::sync;
    use crate::model::Category;
    use crate::test::TestEnv;

    #[tokio::test]
    async fn test_check_reports_without_writing() {
        let env = TestEnv::new().await;
        env.insert_transaction("2025-04-10", "12.30", Category::Health).await;
        sync(env.config(), Mode::Testing, SyncArgs::new(false, false))
            .await
            .unwrap();

        let out = check(env.config(), Mode::Testing).await.unwrap();
        assert!(out.structure().unwrap().integrity_ok);

        let id = env.get_state().rows("April").unwrap()[1][0].clone();
        env.set_csv(
            "April",
            &format!(
                "ID,Date,Description,Category,Amount,Notes
                {id},2025-04-10,Test Health,Health,12.30,Confidence: 90%
                4242,2025-04-11,Typed by hand,Health,5.00,"
            ),
        );
        let writes = env.get_state().writes;

        let out = check(env.config(), Mode::Testing).await.unwrap();
        let report = out.structure().unwrap();
        assert!(!report.integrity_ok);
        assert_eq!(report.sheet("April").unwrap().invalid_rows, 1);
        assert!(out.message().contains("--clean"));
        assert_eq!(env.get_state().writes, writes);
    }
}
