pub mod common;
pub mod completions;
pub mod config;
pub mod conflicts;
pub mod enqueue;
pub mod outbox;
pub mod quota;
pub mod sync;
