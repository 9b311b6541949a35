//! Turns free text like "lunch 25.50 yesterday" into a structured transaction.
//!
//! The language model is asked for a small JSON object. Both the real interpreter and the offline
//! one used in testing mode hand their output to `parse_response`, so validation is the same.

mod mock;
mod openai;

use crate::api::Mode;
use crate::error::Res;
use crate::model::{Amount, Category, Locale};
use crate::Config;
use anyhow::{bail, Context};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

pub(crate) use mock::MockInterpreter;
pub(crate) use openai::OpenAiInterpreter;

const DEFAULT_CONFIDENCE: f64 = 0.8;

/// A transaction as understood from a message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interpretation {
    pub description: String,
    pub amount: Amount,
    pub category: Category,
    pub date: NaiveDate,
    pub confidence: f64,
}

#[async_trait::async_trait]
pub(crate) trait Interpreter: Send + Sync {
    /// Interprets `text`. Relative dates ("yesterday") are resolved against `today`.
    async fn interpret(&self, text: &str, today: NaiveDate) -> Res<Interpretation>;
}

/// Creates the interpreter for `mode`.
pub(crate) fn interpreter(config: &Config, mode: Mode) -> Res<Box<dyn Interpreter>> {
    match mode {
        Mode::Google => Ok(Box::new(OpenAiInterpreter::from_config(config)?)),
        Mode::Testing => Ok(Box::new(MockInterpreter)),
    }
}

/// The shape we ask the model for. Portuguese field names are accepted as well.
#[derive(Debug, Deserialize)]
struct RawInterpretation {
    #[serde(alias = "descricao")]
    description: Option<String>,
    #[serde(alias = "valor")]
    amount: Option<serde_json::Value>,
    #[serde(alias = "categoria")]
    category: Option<String>,
    #[serde(alias = "data")]
    date: Option<String>,
    #[serde(alias = "confianca")]
    confidence: Option<f64>,
}

/// Validates a model response. The JSON object may be wrapped in a code fence or surrounded by
/// prose; everything outside the outermost braces is ignored. An unknown category becomes
/// `Other`, everything else that is missing or out of range is an error.
pub(crate) fn parse_response(response: &str) -> Res<Interpretation> {
    let json = extract_json(response).context("The response does not contain a JSON object")?;
    let raw: RawInterpretation =
        serde_json::from_str(json).context("The response is not valid JSON")?;

    let description = raw
        .description
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .context("The response has no description")?;

    let amount = match raw.amount.context("The response has no amount")? {
        serde_json::Value::Number(n) => Amount::from_str(&n.to_string()),
        serde_json::Value::String(s) => Amount::from_str(&s),
        other => bail!("The amount '{other}' is not a number"),
    }
    .context("The amount could not be read")?;
    if !amount.is_positive() {
        bail!("The amount must be greater than zero, got {amount}");
    }

    let category = match raw.category.as_deref() {
        Some(label) => Category::from_label(label).unwrap_or_else(|| {
            warn!("Unknown category '{label}', using {}", Category::Other);
            Category::Other
        }),
        None => {
            warn!("No category in the response, using {}", Category::Other);
            Category::Other
        }
    };

    let date_text = raw.date.context("The response has no date")?;
    let date = NaiveDate::parse_from_str(date_text.trim(), "%Y-%m-%d")
        .with_context(|| format!("The date '{date_text}' is not in YYYY-MM-DD format"))?;

    let confidence = raw.confidence.unwrap_or(DEFAULT_CONFIDENCE);
    if !(0.0..=1.0).contains(&confidence) {
        bail!("The confidence must be between 0 and 1, got {confidence}");
    }

    Ok(Interpretation {
        description,
        amount,
        category,
        date,
        confidence,
    })
}

fn extract_json(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (start < end).then(|| &response[start..=end])
}

/// The instructions sent along with a message.
pub(crate) fn prompt(text: &str, today: NaiveDate, locale: Locale) -> String {
    let categories = Category::ALL
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let language = match locale {
        Locale::En => "English",
        Locale::PtBr => "Brazilian Portuguese",
    };
    let today = today.format("%Y-%m-%d");
    format!(
        r#"Interpret this message about a personal expense or investment. It is probably written in {language}:
"{text}"

Return ONLY a JSON object with these fields:
- "description": the place, item or investment (string)
- "amount": the amount as a decimal number, e.g. 15.50
- "category": exactly one of: {categories}
- "date": YYYY-MM-DD. Today is {today}, use it when no date is given. When only a month is given, use the first day of that month.
- "confidence": a number from 0.0 to 1.0 saying how sure you are

If the message is about saving or investing money (saved, invested, savings, reserve, guardei, investi, caixinha, poupança, aplicação) use the category "{savings}".

Example:
Input: "lunch at the bakery 20"
Output: {{"description": "Bakery", "amount": 20.00, "category": "{food}", "date": "{today}", "confidence": 0.9}}
"#,
        savings = Category::Savings,
        food = Category::Food,
    )
}
