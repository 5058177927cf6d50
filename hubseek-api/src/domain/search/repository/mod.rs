//! Similarity index implementations.

mod postgres;
#[cfg(test)]
mod mock;

pub use postgres::PgSearchIndex;
#[cfg(test)]
pub use mock::{make_doc, MockIssueDoc, MockSearchIndex};
