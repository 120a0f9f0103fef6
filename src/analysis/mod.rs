//! Statistics over assessed sessions.

pub mod aggregator;

pub use aggregator::*;
