//! The spreadsheet mirror: one sheet per calendar month plus a rollup sheet, all written from the
//! transaction store.
//!
//! Month sheet layout (row 1 is the header):
//!
//! | ID | Date | Description | Category | Amount | Notes |
//!
//! The ID column holds the store id and is the only thing used to match rows to transactions.

use crate::api::Sheet;
use crate::error::Res;
use crate::model::{Amount, Category, Locale, MirrorRef, Month, Transaction};
use anyhow::Context;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, trace, warn};

const ID_COLUMN: usize = 0;
const CATEGORY_COLUMN: usize = 3;
const AMOUNT_COLUMN: usize = 4;

/// Writes transactions into month sheets and keeps the rollup sheet in line with them.
pub(crate) struct Mirror {
    sheet: Box<dyn Sheet>,
    locale: Locale,
}

/// Aggregates of one month sheet, as written to the rollup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct MonthTotals {
    pub(crate) total_spent: Amount,
    pub(crate) by_category: BTreeMap<Category, Amount>,
    pub(crate) savings: Amount,
    pub(crate) count: u64,
}

impl MonthTotals {
    /// Sums the data rows of a month sheet. Blank rows are ignored. Cells that cannot be read as an
    /// amount are skipped. Rows with an unknown category still count toward the total.
    pub(crate) fn from_rows(rows: &[Vec<String>]) -> Self {
        let mut totals = MonthTotals::default();
        for (i, row) in rows.iter().enumerate().skip(1) {
            if is_blank(row) {
                continue;
            }
            totals.count += 1;
            let amount_cell = cell(row, AMOUNT_COLUMN);
            let amount = match Amount::from_str(amount_cell) {
                Ok(amount) => amount,
                Err(e) => {
                    debug!("Skipping amount in row {}: {e}", i + 1);
                    continue;
                }
            };
            if totals.add(Category::from_label(cell(row, CATEGORY_COLUMN)), amount).is_none() {
                warn!("Skipping amount in row {}: '{amount_cell}' overflows the total", i + 1);
            }
        }
        totals
    }

    /// Adds `amount` under `category`. Leaves the totals untouched and returns `None` when any sum
    /// would overflow.
    fn add(&mut self, category: Option<Category>, amount: Amount) -> Option<()> {
        match category {
            Some(Category::Savings) => self.savings = self.savings.checked_add(amount)?,
            Some(category) => {
                let by_category = self.category(category).checked_add(amount)?;
                self.total_spent = self.total_spent.checked_add(amount)?;
                self.by_category.insert(category, by_category);
            }
            None => self.total_spent = self.total_spent.checked_add(amount)?,
        }
        Some(())
    }

    fn category(&self, category: Category) -> Amount {
        self.by_category.get(&category).copied().unwrap_or_default()
    }
}

impl Mirror {
    pub(crate) fn new(sheet: Box<dyn Sheet>, locale: Locale) -> Self {
        Self { sheet, locale }
    }

    pub(crate) fn month_sheet(&self, month: Month) -> String {
        self.locale.month_name(month)
    }

    /// Names of the twelve month sheets in calendar order.
    pub(crate) fn month_sheets(&self) -> Vec<String> {
        Month::ALL.iter().map(|m| self.month_sheet(*m)).collect()
    }

    /// Creates every missing month sheet and the rollup sheet, each with its header row. Returns the
    /// names of the sheets that were created. Makes no writes when nothing is missing.
    pub(crate) async fn create_missing_sheets(&mut self) -> Res<Vec<String>> {
        let existing = self.sheet.sheet_names().await?;
        let mut created = Vec::new();
        for name in self.locale.expected_sheets() {
            if existing.contains(&name) {
                continue;
            }
            debug!("Creating sheet {name}");
            self.sheet.add_sheet(&name).await?;
            let header = if name == self.locale.rollup_sheet() {
                self.locale.rollup_headers()
            } else {
                self.month_header()
            };
            self.sheet.update_range(&name, 1, &[header]).await?;
            created.push(name);
        }
        Ok(created)
    }

    /// All rows of a sheet, header included.
    pub(crate) async fn read(&mut self, sheet_name: &str) -> Res<Vec<Vec<String>>> {
        self.sheet.get(sheet_name).await
    }

    /// Whether a month sheet has any non-blank row below the header.
    pub(crate) async fn has_data(&mut self, month: Month) -> Res<bool> {
        let sheet_name = self.month_sheet(month);
        let rows = self.read(&sheet_name).await?;
        Ok(rows.iter().skip(1).any(|row| !is_blank(row)))
    }

    pub(crate) async fn delete_row(&mut self, sheet_name: &str, row: usize) -> Res<()> {
        self.sheet.delete_row(sheet_name, row).await
    }

    /// Places `txn` in its month sheet unless a row with its id is already there. Returns where the
    /// transaction lives in both cases, so calling this twice writes at most one row.
    pub(crate) async fn project(&mut self, txn: &Transaction) -> Res<MirrorRef> {
        let sheet_name = self.month_sheet(txn.month());
        let rows = self
            .read(&sheet_name)
            .await
            .with_context(|| format!("Unable to read sheet {sheet_name}"))?;

        if let Some(row) = find_id(&rows, txn.id) {
            trace!("Transaction {} already at {sheet_name}!{row}", txn.id);
            return Ok(MirrorRef::new(sheet_name, row));
        }

        let formatted = self.format_row(txn);
        let row = if rows.is_empty() {
            // Sheet lost its header, restore it along with the row
            let header = self.month_header();
            self.sheet
                .update_range(&sheet_name, 1, &[header, formatted])
                .await?;
            2
        } else {
            self.sheet.append_rows(&sheet_name, &[formatted]).await?;
            rows.len() + 1
        };
        debug!("Projected transaction {} to {sheet_name}!{row}", txn.id);
        Ok(MirrorRef::new(sheet_name, row))
    }

    /// Writes `txns` (all of one month) directly below the header of the month sheet in one call.
    /// Returns where each transaction was written.
    pub(crate) async fn write_month(
        &mut self,
        month: Month,
        txns: &[Transaction],
    ) -> Res<Vec<(i64, MirrorRef)>> {
        let sheet_name = self.month_sheet(month);
        let mut rows = vec![self.month_header()];
        rows.extend(txns.iter().map(|t| self.format_row(t)));
        self.sheet.update_range(&sheet_name, 1, &rows).await?;
        Ok(txns
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id, MirrorRef::new(sheet_name.clone(), i + 2)))
            .collect())
    }

    /// Recomputes the rollup from the contents of the month sheets and writes it when it differs
    /// from what the rollup sheet holds. Returns whether anything was written.
    pub(crate) async fn recompute_rollup(&mut self) -> Res<bool> {
        let mut desired = vec![self.locale.rollup_headers()];
        for month in Month::ALL {
            let sheet_name = self.month_sheet(month);
            let rows = self
                .read(&sheet_name)
                .await
                .with_context(|| format!("Unable to read sheet {sheet_name} for the rollup"))?;
            desired.push(self.rollup_row(&sheet_name, &MonthTotals::from_rows(&rows)));
        }

        let rollup = self.locale.rollup_sheet();
        let current = self
            .read(rollup)
            .await
            .with_context(|| format!("Unable to read the rollup sheet {rollup}"))?;
        if rows_match(&current, &desired) {
            trace!("Rollup is up to date");
            return Ok(false);
        }
        if current.len() > desired.len() {
            warn!(
                "Rollup sheet {rollup} has {} rows, rows past {} are left untouched",
                current.len(),
                desired.len()
            );
        }
        self.sheet.update_range(rollup, 1, &desired).await?;
        debug!("Rollup rewritten");
        Ok(true)
    }

    fn month_header(&self) -> Vec<String> {
        self.locale
            .mirror_headers()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn format_row(&self, txn: &Transaction) -> Vec<String> {
        vec![
            txn.id.to_string(),
            self.locale.format_date(txn.date),
            literal_text(&txn.description),
            self.locale.category_label(txn.category),
            txn.amount.to_string(),
            self.locale.confidence_note(txn.confidence),
        ]
    }

    fn rollup_row(&self, sheet_name: &str, totals: &MonthTotals) -> Vec<String> {
        let mut row = vec![sheet_name.to_string(), totals.total_spent.to_string()];
        row.extend(
            Category::SPENDING
                .iter()
                .map(|c| totals.category(*c).to_string()),
        );
        row.push(totals.count.to_string());
        row.push(totals.savings.to_string());
        row
    }
}

/// Cells are written as if typed by a user, so text that looks like a formula gets a leading `'`
/// to be stored as plain text.
fn literal_text(text: &str) -> String {
    if text.starts_with(['=', '+', '-', '@']) {
        format!("'{text}")
    } else {
        text.to_string()
    }
}

/// The id cell of a mirror row, trimmed. Empty for blank rows.
pub(crate) fn row_id(row: &[String]) -> &str {
    cell(row, ID_COLUMN)
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

fn cell(row: &[String], column: usize) -> &str {
    row.get(column).map(|s| s.trim()).unwrap_or_default()
}

/// The 1-based row number of the first data row whose id is `id`.
fn find_id(rows: &[Vec<String>], id: i64) -> Option<usize> {
    let wanted = id.to_string();
    rows.iter()
        .enumerate()
        .skip(1)
        .find(|(_, row)| row_id(row) == wanted)
        .map(|(i, _)| i + 1)
}

/// Compares sheet contents the way the spreadsheet renders them: `25` and `25.00` are the same
/// amount, and missing trailing cells are the same as empty ones.
fn rows_match(current: &[Vec<String>], desired: &[Vec<String>]) -> bool {
    if current.len() < desired.len() {
        return false;
    }
    desired.iter().zip(current).all(|(want, have)| {
        let width = want.len().max(have.len());
        (0..width).all(|i| cells_match(cell(have, i), cell(want, i)))
    })
}

fn cells_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    // Only treat both as numbers when they look like plain numbers, so labels never match amounts
    let numeric = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
    };
    if !numeric(a) || !numeric(b) {
        return false;
    }
    match (Amount::from_str(a), Amount::from_str(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TestSheet;
    use crate::model::Status;
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn txn(id: i64, date: &str, amount: &str, category: Category) -> Transaction {
        Transaction {
            id,
            original_message: format!("msg {id}"),
            sender_id: None,
            conversation_id: None,
            message_id: None,
            description: format!("item {id}"),
            amount: amount.parse().unwrap(),
            category,
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            confidence: 0.9,
            status: Status::Processed,
            error_message: None,
            mirror_ref: None,
            mirror_updated_at: None,
            created_at: Utc::now(),
        }
    }

    async fn mirror(locale: Locale) -> (TestSheet, Mirror) {
        let test_sheet = TestSheet::new(Uuid::new_v4().to_string());
        let mut mirror = Mirror::new(Box::new(test_sheet.clone()), locale);
        mirror.create_missing_sheets().await.unwrap();
        (test_sheet, mirror)
    }

    fn rows(sheet: &TestSheet, name: &str) -> Vec<Vec<String>> {
        sheet.get_state().rows(name).cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_create_missing_sheets_is_idempotent() {
        let (sheet, mut mirror) = mirror(Locale::PtBr).await;
        let state = sheet.get_state();
        assert_eq!(state.sheet_names(), Locale::PtBr.expected_sheets());
        assert_eq!(rows(&sheet, "Janeiro")[0][0], "ID");
        assert_eq!(rows(&sheet, "Resumo")[0][0], "Mês");

        let writes = state.writes;
        assert!(mirror.create_missing_sheets().await.unwrap().is_empty());
        assert_eq!(sheet.get_state().writes, writes);
    }

    #[tokio::test]
    async fn test_project_twice_writes_one_row() {
        let (sheet, mut mirror) = mirror(Locale::En).await;
        let t = txn(7, "2025-01-05", "20", Category::Food);

        let first = mirror.project(&t).await.unwrap();
        let writes = sheet.get_state().writes;
        let second = mirror.project(&t).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, MirrorRef::new("January", 2));
        assert_eq!(sheet.get_state().writes, writes);
        let january = rows(&sheet, "January");
        assert_eq!(january.len(), 2);
        assert_eq!(
            january[1],
            vec!["7", "2025-01-05", "item 7", "Food", "20.00", "Confidence: 90%"]
        );
    }

    #[tokio::test]
    async fn test_project_appends_after_existing_rows() {
        let (_sheet, mut mirror) = mirror(Locale::PtBr).await;
        let a = mirror
            .project(&txn(1, "2025-03-01", "10", Category::Home))
            .await
            .unwrap();
        let b = mirror
            .project(&txn(2, "2025-03-02", "11", Category::Home))
            .await
            .unwrap();
        assert_eq!(a, MirrorRef::new("Março", 2));
        assert_eq!(b, MirrorRef::new("Março", 3));
    }

    #[tokio::test]
    async fn test_recompute_rollup_sums_by_category() {
        let (sheet, mut mirror) = mirror(Locale::En).await;
        let january = vec![
            txn(1, "2025-01-01", "30", Category::Food),
            txn(2, "2025-01-02", "20", Category::Food),
            txn(3, "2025-01-03", "20", Category::Transport),
            txn(4, "2025-01-04", "100", Category::Savings),
        ];
        mirror.write_month(Month::January, &january).await.unwrap();

        assert!(mirror.recompute_rollup().await.unwrap());
        let rollup = rows(&sheet, "Summary");
        assert_eq!(rollup.len(), 13);
        assert_eq!(
            rollup[1],
            vec!["January", "70.00", "50.00", "20.00", "0.00", "0.00", "0.00", "0.00", "4", "100.00"]
        );
        // Empty months get a zero row
        assert_eq!(rollup[12][0], "December");
        assert_eq!(rollup[12][1], "0.00");
        assert_eq!(rollup[12][8], "0");

        // Nothing changed, nothing written
        let writes = sheet.get_state().writes;
        assert!(!mirror.recompute_rollup().await.unwrap());
        assert_eq!(sheet.get_state().writes, writes);
    }

    #[test]
    fn test_month_totals_skip_malformed_cells() {
        let row = |cells: &[&str]| cells.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let rows = vec![
            row(&["ID", "Data", "Descrição", "Categoria", "Valor", "Observações"]),
            row(&["1", "01/01/2025", "mercado", "Alimentação", "R$ 1.234,50", ""]),
            row(&["2", "02/01/2025", "uber", "Transporte", "abc", ""]),
            row(&["", "", "", "", "", ""]),
            row(&["3", "03/01/2025", "???", "Mystery", "5", ""]),
            row(&["4", "04/01/2025", "typo", "Alimentação", "2025-01-05", ""]),
            row(&["5", "05/01/2025", "typo", "Alimentação", "5 / 3", ""]),
            row(&["6", "06/01/2025", "typo", "Alimentação", "12 reais e 50", ""]),
        ];
        let totals = MonthTotals::from_rows(&rows);
        assert_eq!(totals.count, 6);
        assert_eq!(totals.category(Category::Food), "1234.50".parse().unwrap());
        assert_eq!(totals.category(Category::Transport), Amount::ZERO);
        assert_eq!(totals.total_spent, "1239.50".parse().unwrap());
    }

    #[tokio::test]
    async fn test_blank_rows_are_not_data() {
        let (sheet, mut mirror) = mirror(Locale::En).await;
        let mut state = sheet.get_state();
        let mut march = rows(&sheet, "March");
        march.push(vec![String::new(); 6]);
        march.push(vec![" ".to_string(), String::new()]);
        state.set_rows("March", march);
        sheet.set_state(state);
        assert!(!mirror.has_data(Month::March).await.unwrap());

        mirror
            .project(&txn(9, "2025-03-09", "1", Category::Food))
            .await
            .unwrap();
        assert!(mirror.has_data(Month::March).await.unwrap());
    }

    #[tokio::test]
    async fn test_formula_like_descriptions_are_written_as_text() {
        let (sheet, mut mirror) = mirror(Locale::En).await;
        let mut t = txn(3, "2025-02-01", "10", Category::Other);
        t.description = "=IMPORTXML(\"http://x\")".to_string();
        mirror.project(&t).await.unwrap();
        assert_eq!(rows(&sheet, "February")[1][2], "'=IMPORTXML(\"http://x\")");

        let plain = txn(4, "2025-02-02", "10", Category::Other);
        mirror.project(&plain).await.unwrap();
        assert_eq!(rows(&sheet, "February")[2][2], "item 4");
    }

    #[test]
    fn test_month_totals_skip_overflowing_cells() {
        let row = |cells: &[&str]| cells.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let huge = "79228162514264337593543950335";
        let rows = vec![
            row(&["ID", "Date", "Description", "Category", "Amount", "Notes"]),
            row(&["1", "2025-01-01", "a", "Food", huge, ""]),
            row(&["2", "2025-01-02", "b", "Food", huge, ""]),
            row(&["3", "2025-01-03", "c", "Mystery", huge, ""]),
            row(&["4", "2025-01-04", "d", "Savings", huge, ""]),
            row(&["5", "2025-01-05", "e", "Savings", huge, ""]),
        ];
        let totals = MonthTotals::from_rows(&rows);
        let max: Amount = huge.parse().unwrap();
        assert_eq!(totals.count, 5);
        assert_eq!(totals.category(Category::Food), max);
        assert_eq!(totals.total_spent, max);
        assert_eq!(totals.savings, max);
    }

    #[test]
    fn test_rows_match_tolerates_number_formatting() {
        let s = |cells: &[&str]| vec![cells.iter().map(|c| c.to_string()).collect::<Vec<_>>()];
        assert!(rows_match(&s(&["January", "25", "3"]), &s(&["January", "25.00", "3"])));
        assert!(rows_match(&s(&["x", "1,234.50"]), &s(&["x", "1234.50", ""])));
        assert!(!rows_match(&s(&["January", "25"]), &s(&["January", "26.00"])));
        assert!(!rows_match(&[], &s(&["a"])));
    }
}
