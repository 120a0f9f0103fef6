//! The risk assessment aggregation engine.
//!
//! [`AggregationController`] is the entry point: it owns the
//! [`table::AssessmentTable`], the [`ConnectivityGate`], at most one batch pass
//! and the live overlay subscription.

pub mod batch;
pub mod connectivity;
pub mod controller;
pub mod events;
pub mod overlay;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;

pub use connectivity::ConnectivityGate;
pub use controller::{AggregationController, EngineSettings};
pub use events::{EngineEvent, PassReport, PassStatus};
pub use table::{TableState, WriteOrigin};

use tokio::sync::watch;

/// Resolves once the signal is raised or its sender is gone.
pub(crate) async fn cancelled(signal: &mut watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            return;
        }
    }
}
