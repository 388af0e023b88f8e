pub mod journal;

pub use journal::{JournalEntry, JournalStatus};
