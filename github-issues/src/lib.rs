mod client;
mod models;
mod query;
mod truncate;

pub use client::*;
pub use models::*;
pub use truncate::{truncate_code_blocks, truncate_to_byte_size};
