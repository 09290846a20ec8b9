mod client;
pub mod queries;
mod types;

pub use client::*;
pub use types::*;
