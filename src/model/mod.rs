//! Domain types shared by the store, the mirror and the command handlers.

mod amount;
mod category;
mod locale;
mod mirror_ref;
mod month;
mod summary;
mod transaction;

pub use amount::Amount;
pub use category::Category;
pub use locale::Locale;
pub use mirror_ref::MirrorRef;
pub use month::Month;
pub use summary::{MonthlySummary, StoreStats, YearlySummary};
pub use transaction::{MessageSource, NewTransaction, Status, Transaction};
