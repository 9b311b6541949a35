//! Language-dependent presentation of the mirror: sheet names, header labels, date format and
//! category labels.

use crate::model::{Category, Month};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The language the spreadsheet mirror is written in.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Locale {
    #[default]
    En,
    #[value(name = "pt_br")]
    PtBr,
}

serde_plain::derive_display_from_serialize!(Locale);
serde_plain::derive_fromstr_from_deserialize!(Locale);

const PT_MONTHS: [&str; 12] = [
    "Janeiro",
    "Fevereiro",
    "Março",
    "Abril",
    "Maio",
    "Junho",
    "Julho",
    "Agosto",
    "Setembro",
    "Outubro",
    "Novembro",
    "Dezembro",
];

impl Locale {
    /// The name of the sheet that mirrors `month`.
    pub fn month_name(self, month: Month) -> String {
        match self {
            Locale::En => month.to_string(),
            Locale::PtBr => PT_MONTHS[month as usize].to_string(),
        }
    }

    /// The name of the sheet holding per-month aggregates.
    pub fn rollup_sheet(self) -> &'static str {
        match self {
            Locale::En => "Summary",
            Locale::PtBr => "Resumo",
        }
    }

    /// Header row of every month sheet. The first column always holds the store id.
    pub fn mirror_headers(self) -> [&'static str; 6] {
        match self {
            Locale::En => ["ID", "Date", "Description", "Category", "Amount", "Notes"],
            Locale::PtBr => ["ID", "Data", "Descrição", "Categoria", "Valor", "Observações"],
        }
    }

    /// Header row of the rollup sheet.
    pub fn rollup_headers(self) -> Vec<String> {
        let (month, total, count) = match self {
            Locale::En => ("Month", "Total Spent", "Transactions"),
            Locale::PtBr => ("Mês", "Total Gastos", "Transações"),
        };
        let mut headers = vec![month.to_string(), total.to_string()];
        headers.extend(Category::SPENDING.iter().map(|c| self.category_label(*c)));
        headers.push(count.to_string());
        headers.push(self.category_label(Category::Savings));
        headers
    }

    pub fn category_label(self, category: Category) -> String {
        match self {
            Locale::En => category.to_string(),
            Locale::PtBr => category.pt_label().to_string(),
        }
    }

    /// Renders the date column of a mirror row.
    pub fn format_date(self, date: NaiveDate) -> String {
        match self {
            Locale::En => date.format("%Y-%m-%d").to_string(),
            Locale::PtBr => date.format("%d/%m/%Y").to_string(),
        }
    }

    /// Renders the notes column of a mirror row.
    pub fn confidence_note(self, confidence: f64) -> String {
        let pct = (confidence * 100.0).round() as i64;
        match self {
            Locale::En => format!("Confidence: {pct}%"),
            Locale::PtBr => format!("Confiança: {pct}%"),
        }
    }

    /// Parses a month given by name in this locale, by English name, or by number (1-12). Matching
    /// ignores case.
    pub fn parse_month(self, s: &str) -> Option<Month> {
        let wanted = s.trim().to_lowercase();
        if let Ok(n) = wanted.parse::<u32>() {
            return Month::from_number(n);
        }
        Month::ALL.into_iter().find(|m| {
            self.month_name(*m).to_lowercase() == wanted || m.to_string().to_lowercase() == wanted
        })
    }

    /// Every sheet the mirror expects: twelve month sheets and the rollup sheet.
    pub fn expected_sheets(self) -> Vec<String> {
        let mut names: Vec<String> = Month::ALL.iter().map(|m| self.month_name(*m)).collect();
        names.push(self.rollup_sheet().to_string());
        names
    }
}
