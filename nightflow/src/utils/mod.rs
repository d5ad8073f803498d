//! Timestamp helpers shared by run records, checkpoints and events.

pub mod timestamps;

pub use timestamps::{format_iso8601, now_utc, Timestamp};
