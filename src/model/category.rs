use serde::{Deserialize, Serialize};

/// The fixed set of spending categories.
///
/// `Savings` is special: money moved to savings or investments is tracked separately and never
/// counts toward total spending.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    schemars::JsonSchema,
)]
pub enum Category {
    #[serde(alias = "Alimentação")]
    Food,
    #[serde(alias = "Transporte")]
    Transport,
    #[serde(alias = "Saúde")]
    Health,
    #[serde(alias = "Lazer")]
    Leisure,
    #[serde(alias = "Casa")]
    Home,
    #[serde(alias = "Finanças")]
    Savings,
    #[default]
    #[serde(alias = "Outros")]
    Other,
}

serde_plain::derive_display_from_serialize!(Category);
serde_plain::derive_fromstr_from_deserialize!(Category);

impl Category {
    /// All categories, in rollup column order.
    pub const ALL: [Category; 7] = [
        Category::Food,
        Category::Transport,
        Category::Health,
        Category::Leisure,
        Category::Home,
        Category::Other,
        Category::Savings,
    ];

    /// Spending categories, i.e. everything except `Savings`.
    pub const SPENDING: [Category; 6] = [
        Category::Food,
        Category::Transport,
        Category::Health,
        Category::Leisure,
        Category::Home,
        Category::Other,
    ];

    pub fn is_spending(&self) -> bool {
        *self != Category::Savings
    }

    /// The Portuguese label used by `pt_br` sheets.
    pub fn pt_label(&self) -> &'static str {
        match self {
            Category::Food => "Alimentação",
            Category::Transport => "Transporte",
            Category::Health => "Saúde",
            Category::Leisure => "Lazer",
            Category::Home => "Casa",
            Category::Savings => "Finanças",
            Category::Other => "Outros",
        }
    }

    /// Matches a label in either language, ignoring case and surrounding whitespace.
    pub fn from_label(label: &str) -> Option<Category> {
        let wanted = label.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        Self::ALL.into_iter().find(|c| {
            c.to_string().to_lowercase() == wanted || c.pt_label().to_lowercase() == wanted
        })
    }
}
