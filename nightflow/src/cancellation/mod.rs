//! Cooperative cancellation for pipeline runs.
//!
//! A run owns one [`CancellationToken`]; the scheduler keeps a handle so an
//! external request can stop the run between or during attempts.

mod token;

pub use token::CancellationToken;
