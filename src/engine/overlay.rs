//! Live feed overlay onto the assessment table.

use crate::engine::cancelled;
use crate::engine::events::EngineEvent;
use crate::engine::table::{TableWriter, WriteOrigin};
use crate::error::{EngineError, FeedError};
use crate::models::SessionKey;
use crate::sources::AssessmentStream;
use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Writes live assessments under the key of the latest session.
///
/// No ordering is imposed against batch writes to the same key: whichever
/// reaches the table last wins.
pub struct LiveOverlayMerger {
    table: TableWriter,
    latest: watch::Receiver<Option<SessionKey>>,
    events: broadcast::Sender<EngineEvent>,
}

impl LiveOverlayMerger {
    pub fn new(
        table: TableWriter,
        latest: watch::Receiver<Option<SessionKey>>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            table,
            latest,
            events,
        }
    }

    /// Consume the feed until it ends, breaks, or `shutdown` fires.
    /// Undecodable events are reported and skipped. Returns the number of
    /// overlays applied.
    pub async fn run(
        self,
        mut feed: AssessmentStream,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize {
        let mut applied = 0;

        loop {
            let item = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => {
                    debug!("Live overlay unsubscribed");
                    break;
                }
                item = feed.next() => item,
            };

            match item {
                None => {
                    info!("Live feed ended after {} overlay(s)", applied);
                    let _ = self.events.send(EngineEvent::FeedEnded);
                    break;
                }
                Some(Err(err @ FeedError::Decode { .. })) => {
                    warn!("Skipping live feed event: {}", err);
                    let _ = self.events.send(EngineEvent::Failure(EngineError::LiveFeed(err)));
                }
                Some(Err(err)) => {
                    warn!("Live feed failed: {}", err);
                    let _ = self.events.send(EngineEvent::Failure(EngineError::LiveFeed(err)));
                    let _ = self.events.send(EngineEvent::FeedEnded);
                    break;
                }
                Some(Ok(assessment)) => {
                    let latest = self.latest.borrow().clone();
                    let Some(key) = latest else {
                        debug!("No sessions loaded, live assessment dropped");
                        continue;
                    };

                    if !self.table.put(key.clone(), assessment, WriteOrigin::Live).await {
                        debug!("Assessment table closed, stopping live overlay");
                        break;
                    }
                    applied += 1;
                    debug!("Live overlay applied to session {}", key);
                    let _ = self.events.send(EngineEvent::Overlay { key });
                }
            }
        }

        applied
    }
}
