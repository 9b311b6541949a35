//! An offline interpreter for testing mode. It reads the first number in the message as the amount
//! and picks a category from keywords, then renders the same JSON a language model would return.

use crate::error::Res;
use crate::interpret::{parse_response, Interpretation, Interpreter};
use crate::model::Category;
use chrono::{Days, NaiveDate};

const KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::Savings,
        &["saved", "invest", "savings", "guardei", "investi", "caixinha", "poupança"],
    ),
    (
        Category::Food,
        &["lunch", "dinner", "bakery", "grocer", "coffee", "padaria", "almoço", "mercado"],
    ),
    (
        Category::Transport,
        &["uber", "taxi", "metro", "fuel", "gasoline", "ônibus", "gasolina"],
    ),
    (
        Category::Health,
        &["pharmacy", "doctor", "farmácia", "médico", "remédio"],
    ),
    (
        Category::Leisure,
        &["movie", "cinema", "concert", "bar", "show"],
    ),
    (Category::Home, &["rent", "aluguel", "electricity", "luz", "água"]),
];

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MockInterpreter;

#[async_trait::async_trait]
impl Interpreter for MockInterpreter {
    async fn interpret(&self, text: &str, today: NaiveDate) -> Res<Interpretation> {
        parse_response(&respond(text, today))
    }
}

/// What a cooperative language model would answer.
fn respond(text: &str, today: NaiveDate) -> String {
    let lower = text.to_lowercase();
    let mut json = serde_json::Map::new();

    let words: Vec<&str> = text.split_whitespace().collect();
    let amount = words
        .iter()
        .map(|w| w.trim_matches(|c: char| !c.is_ascii_digit()))
        .find(|w| !w.is_empty());
    if let Some(amount) = amount {
        json.insert("amount".into(), amount.replace(',', ".").into());
    }

    let description: Vec<&str> = words
        .iter()
        .copied()
        .filter(|w| !w.chars().any(|c| c.is_ascii_digit()))
        .collect();
    json.insert("description".into(), description.join(" ").into());

    let category = KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(c, _)| *c)
        .unwrap_or_default();
    json.insert("category".into(), category.to_string().into());

    let date = if lower.contains("yesterday") || lower.contains("ontem") {
        today.checked_sub_days(Days::new(1)).unwrap_or(today)
    } else {
        today
    };
    json.insert("date".into(), date.format("%Y-%m-%d").to_string().into());
    json.insert("confidence".into(), 0.9.into());

    serde_json::Value::Object(json).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    #[tokio::test]
    async fn test_keywords_and_amount() {
        let parsed = MockInterpreter
            .interpret("uber to work 15,50 yesterday", today())
            .await
            .unwrap();
        assert_eq!(parsed.category, Category::Transport);
        assert_eq!(parsed.amount, "15.50".parse().unwrap());
        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2025, 3, 9).unwrap());
        assert_eq!(parsed.description, "uber to work yesterday");

        let saved = MockInterpreter
            .interpret("guardei 300 na caixinha", today())
            .await
            .unwrap();
        assert_eq!(saved.category, Category::Savings);
    }

    #[tokio::test]
    async fn test_unknown_words_are_other() {
        let parsed = MockInterpreter
            .interpret("R$20 blusa", today())
            .await
            .unwrap();
        assert_eq!(parsed.category, Category::Other);
        assert_eq!(parsed.amount, "20".parse().unwrap());
        assert_eq!(parsed.description, "blusa");
    }

    #[tokio::test]
    async fn test_no_amount_is_an_error() {
        assert!(MockInterpreter
            .interpret("bought some stuff", today())
            .await
            .is_err());
    }
}
