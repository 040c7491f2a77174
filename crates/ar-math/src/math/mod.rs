//! Core math modules.

pub mod change;
pub mod quantile_table;
pub mod score;
