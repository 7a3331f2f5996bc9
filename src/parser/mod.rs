pub mod blocks;
pub mod classify;

pub use blocks::{parse_entries, Entry};
pub use classify::{classify, normalize, QuestionType};
