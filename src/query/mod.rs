//! Query Expander (C6).

pub mod expand;

pub use expand::{expand, normalize_decimal_separator};
