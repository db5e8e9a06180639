//! SQL text helpers: identifier quoting and query labeling.
//!
//! Nothing in this module parses or validates SQL semantics. Identifiers are
//! escaped for safe interpolation into dynamically built statements, and query
//! text is only inspected to derive a short label for log correlation.

mod descriptor;
mod label;
mod quote;

pub use descriptor::QueryDescriptor;
pub use label::QueryLabel;
pub use quote::quote_identifier;
