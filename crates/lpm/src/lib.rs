//! # riptide-lpm
//!
//! Longest-prefix-match tries and dense value tables, in two forms:
//! a control-plane builder (plain Rust structures, range inserts) and
//! a frozen, position-independent arena block that workers read
//! wait-free. The builder belongs to configuration time; the frozen
//! form is what module config payloads embed.

pub mod error;
pub mod frozen;
pub mod table;
pub mod trie;

pub use crate::error::{LpmError, LpmResult};
pub use crate::frozen::LpmView;
pub use crate::table::{ValueTable, ValueTableView};
pub use crate::trie::{KeyWidth, LPM_VALUE_INVALID, Lpm};
