//! `spendsheet summary` and `spendsheet stats`: read-only reports computed from the store.

use crate::args::SummaryArgs;
use crate::commands::Out;
use crate::error::{Error, ErrorType, IntoResult};
use crate::model::{Category, Locale, Month, MonthlySummary, StoreStats, YearlySummary};
use crate::{Config, Result};
use chrono::{Datelike, Local};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Summary {
    Monthly(MonthlySummary),
    Yearly(YearlySummary),
}

/// Totals for one month (by default the current one) or, with `--yearly`, for a whole year.
pub async fn summary(config: Config, args: SummaryArgs) -> Result<Out<Summary>> {
    let locale = config.locale();
    let today = Local::now().date_naive();
    let year = args.year().unwrap_or_else(|| today.year());
    let db = config.db();

    if args.yearly() {
        let yearly = db
            .yearly_summary(year)
            .await
            .pub_result(ErrorType::Persistence)?;
        return Ok(Out::new(describe_year(&yearly, locale), Summary::Yearly(yearly)));
    }

    let month = match args.month() {
        Some(s) => parse_month(s, locale)?,
        None => Month::of(today),
    };
    let monthly = db
        .monthly_summary(month, year)
        .await
        .pub_result(ErrorType::Persistence)?;
    Ok(Out::new(
        describe_month(&monthly, locale),
        Summary::Monthly(monthly),
    ))
}

/// Transaction count, date range and total spending over the whole store.
pub async fn stats(config: Config) -> Result<Out<StoreStats>> {
    let stats = config
        .db()
        .stats()
        .await
        .pub_result(ErrorType::Persistence)?;
    let message = match (stats.first_date, stats.last_date) {
        (Some(first), Some(last)) => {
            let locale = config.locale();
            format!(
                "{} transactions from {} to {} ({} days), {} spent",
                stats.transaction_count,
                locale.format_date(first),
                locale.format_date(last),
                stats.period_days,
                stats.total_spent.grouped()
            )
        }
        _ => "There are no transactions yet".to_string(),
    };
    Ok(Out::new(message, stats))
}

fn parse_month(s: &str, locale: Locale) -> Result<Month> {
    locale.parse_month(s).ok_or_else(|| {
        let names = Month::ALL
            .iter()
            .map(|m| locale.month_name(*m))
            .collect::<Vec<_>>()
            .join(", ");
        Error::validation(format!(
            "'{s}' is not a month. Use one of {names}, the English name, or a number from 1 to 12"
        ))
    })
}

fn describe_month(summary: &MonthlySummary, locale: Locale) -> String {
    let name = summary
        .month
        .map(|m| locale.month_name(m))
        .unwrap_or_default();
    if summary.transaction_count == 0 {
        return format!("No transactions in {name} {}", summary.year);
    }
    let breakdown = Category::SPENDING
        .iter()
        .filter_map(|c| {
            summary
                .by_category
                .get(c)
                .map(|amount| format!("{} {}", locale.category_label(*c), amount.grouped()))
        })
        .collect::<Vec<_>>()
        .join(", ");
    let mut message = format!(
        "{name} {}: {} spent in {} transactions",
        summary.year,
        summary.total_spent.grouped(),
        summary.transaction_count
    );
    if !breakdown.is_empty() {
        message.push_str(&format!(" ({breakdown})"));
    }
    if summary.savings.is_positive() {
        message.push_str(&format!(", {} saved", summary.savings.grouped()));
    }
    message
}

fn describe_year(summary: &YearlySummary, locale: Locale) -> String {
    if summary.transaction_count == 0 {
        return format!("No transactions in {}", summary.year);
    }
    let months = summary
        .months
        .iter()
        .filter_map(|m| {
            m.month
                .map(|month| format!("{} {}", locale.month_name(month), m.total_spent.grouped()))
        })
        .collect::<Vec<_>>()
        .join(", ");
    let mut message = format!(
        "{}: {} spent in {} transactions ({months})",
        summary.year,
        summary.total_spent.grouped(),
        summary.transaction_count
    );
    if summary.savings.is_positive() {
        message.push_str(&format!(", {} saved", summary.savings.grouped()));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestEnv;

    #[tokio::test]
    async fn test_monthly_summary_by_name() {
        let env = TestEnv::with_locale(Locale::PtBr).await;
        env.insert_transaction("2024-03-02", "20", Category::Food).await;
        env.insert_transaction("2024-03-09", "1234.5", Category::Home).await;
        env.insert_transaction("2024-03-10", "100", Category::Savings).await;
        env.insert_transaction("2025-03-10", "7", Category::Food).await;

        let out = summary(
            env.config(),
            SummaryArgs::new(Some("março".into()), Some(2024), false),
        )
        .await
        .unwrap();
        let Some(Summary::Monthly(monthly)) = out.structure() else {
            panic!("expected a monthly summary");
        };
        assert_eq!(monthly.transaction_count, 3);
        assert_eq!(monthly.total_spent.to_string(), "1254.50");
        assert_eq!(monthly.savings.to_string(), "100.00");
        assert_eq!(
            out.message(),
            "Março 2024: 1,254.50 spent in 3 transactions \
            (Alimentação 20.00, Casa 1,234.50), 100.00 saved"
        );
    }

    #[tokio::test]
    async fn test_yearly_summary() {
        let env = TestEnv::new().await;
        env.insert_transaction("2024-01-02", "10", Category::Food).await;
        env.insert_transaction("2024-05-09", "30", Category::Leisure).await;

        let out = summary(env.config(), SummaryArgs::new(None, Some(2024), true))
            .await
            .unwrap();
        let Some(Summary::Yearly(yearly)) = out.structure() else {
            panic!("expected a yearly summary");
        };
        assert_eq!(yearly.months.len(), 2);
        assert_eq!(
            out.message(),
            "2024: 40.00 spent in 2 transactions (January 10.00, May 30.00)"
        );
    }

    #[tokio::test]
    async fn test_bad_month_is_a_validation_error() {
        let env = TestEnv::new().await;
        let err = summary(env.config(), SummaryArgs::new(Some("Smarch".into()), None, false))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Validation);
        assert!(err.to_string().contains("January"));

        let err = summary(env.config(), SummaryArgs::new(Some("13".into()), None, false))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Validation);
    }

    #[tokio::test]
    async fn test_stats() {
        let env = TestEnv::new().await;
        let out = stats(env.config()).await.unwrap();
        assert_eq!(out.message(), "There are no transactions yet");

        env.insert_transaction("2024-01-01", "10", Category::Food).await;
        env.insert_transaction("2024-01-10", "500", Category::Savings).await;
        let out = stats(env.config()).await.unwrap();
        let stats = out.structure().unwrap();
        assert_eq!(stats.transaction_count, 2);
        assert_eq!(stats.period_days, 10);
        assert_eq!(stats.total_spent.to_string(), "10.00");
    }
}
