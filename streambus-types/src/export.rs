//! Re-exports of the crates this API surface is built with.

pub use async_trait::async_trait;
pub use time;
