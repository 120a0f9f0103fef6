//! The assessment table and its single writer task.
//!
//! Every mutation goes through one actor task over an mpsc channel. The
//! actor publishes the table through a `watch` channel, so readers always
//! see a complete table and never block the writer.

use crate::models::{RiskAssessment, SessionKey};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Queue depth of the writer channel.
const WRITE_QUEUE_DEPTH: usize = 256;

/// Where a table value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOrigin {
    /// Written by the batch pass with this generation.
    Batch { generation: u64 },
    /// Written by the live overlay.
    Live,
}

/// Current value for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableEntry {
    pub assessment: RiskAssessment,
    pub origin: WriteOrigin,
    pub written_at: DateTime<Utc>,
}

/// Consistent view of the whole table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableState {
    generation: u64,
    entries: BTreeMap<SessionKey, TableEntry>,
}

impl TableState {
    /// Newest pass generation the table accepts batch writes from.
    #[allow(dead_code)] // Read by observers and tests
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[allow(dead_code)] // Read by observers and tests
    pub fn get(&self, key: &SessionKey) -> Option<&TableEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)] // Pairs with len()
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionKey, &TableEntry)> {
        self.entries.iter()
    }
}

enum Command {
    Put {
        key: SessionKey,
        assessment: RiskAssessment,
        origin: WriteOrigin,
        ack: oneshot::Sender<bool>,
    },
    /// Clear all entries and move to `generation`.
    Reset {
        generation: u64,
        ack: oneshot::Sender<bool>,
    },
    /// Move to `generation`, keeping entries.
    BeginPass {
        generation: u64,
        ack: oneshot::Sender<bool>,
    },
    Close,
}

/// Owner of the table actor.
pub struct AssessmentTable {
    writer: TableWriter,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AssessmentTable {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let (state_tx, state_rx) = watch::channel(TableState::default());
        let task = tokio::spawn(run_writer(rx, state_tx));

        Self {
            writer: TableWriter {
                tx,
                state: state_rx,
            },
            task: Mutex::new(Some(task)),
        }
    }

    /// A handle for submitting writes.
    pub fn writer(&self) -> TableWriter {
        self.writer.clone()
    }

    /// Copy of the current table.
    pub fn snapshot(&self) -> TableState {
        self.writer.snapshot()
    }

    /// Change notifications for observers.
    pub fn subscribe(&self) -> watch::Receiver<TableState> {
        self.writer.state.clone()
    }

    /// Stop the writer after draining queued commands. Idempotent.
    ///
    /// Once this returns no further mutation can happen; the last published
    /// state stays readable.
    pub async fn close(&self) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            let _ = self.writer.tx.send(Command::Close).await;
            if let Err(e) = handle.await {
                warn!("Assessment table writer ended abnormally: {}", e);
            }
        }
    }
}

/// Cloneable write handle. Every call resolves once the actor has
/// processed it.
#[derive(Clone)]
pub struct TableWriter {
    tx: mpsc::Sender<Command>,
    state: watch::Receiver<TableState>,
}

impl TableWriter {
    /// Replace the value for `key`.
    ///
    /// Returns `false` when the write was discarded: a batch write from a
    /// superseded generation, or the table is closed.
    pub async fn put(
        &self,
        key: SessionKey,
        assessment: RiskAssessment,
        origin: WriteOrigin,
    ) -> bool {
        let (ack, rx) = oneshot::channel();
        self.request(
            Command::Put {
                key,
                assessment,
                origin,
                ack,
            },
            rx,
        )
        .await
    }

    /// Clear the table for a fresh bulk load.
    pub async fn reset(&self, generation: u64) -> bool {
        let (ack, rx) = oneshot::channel();
        self.request(Command::Reset { generation, ack }, rx).await
    }

    /// Start accepting batch writes from `generation` only.
    pub async fn begin_pass(&self, generation: u64) -> bool {
        let (ack, rx) = oneshot::channel();
        self.request(Command::BeginPass { generation, ack }, rx).await
    }

    pub fn snapshot(&self) -> TableState {
        self.state.borrow().clone()
    }

    async fn request(&self, command: Command, rx: oneshot::Receiver<bool>) -> bool {
        if self.tx.send(command).await.is_err() {
            debug!("Assessment table closed, write dropped");
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

async fn run_writer(mut rx: mpsc::Receiver<Command>, state: watch::Sender<TableState>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Put {
                key,
                assessment,
                origin,
                ack,
            } => {
                let current = state.borrow().generation;
                let applied = match origin {
                    WriteOrigin::Batch { generation } => generation >= current,
                    WriteOrigin::Live => true,
                };

                if applied {
                    let entry = TableEntry {
                        assessment,
                        origin,
                        written_at: Utc::now(),
                    };
                    state.send_modify(|table| {
                        table.entries.insert(key, entry);
                    });
                } else {
                    debug!("Discarded stale write for session {} ({:?})", key, origin);
                }
                let _ = ack.send(applied);
            }
            Command::Reset { generation, ack } => {
                state.send_modify(|table| {
                    table.entries.clear();
                    table.generation = table.generation.max(generation);
                });
                let _ = ack.send(true);
            }
            Command::BeginPass { generation, ack } => {
                state.send_modify(|table| {
                    table.generation = table.generation.max(generation);
                });
                let _ = ack.send(true);
            }
            Command::Close => break,
        }
    }
    debug!("Assessment table writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubScores;

    fn assessment(score: f64) -> RiskAssessment {
        RiskAssessment::new(score, format!("score {}", score), SubScores::uniform(score))
    }

    fn key(id: &str) -> SessionKey {
        SessionKey::Id(id.to_string())
    }

    #[tokio::test]
    async fn test_put_replaces_whole_value() {
        let table = AssessmentTable::spawn();
        let writer = table.writer();

        assert!(writer.put(key("S1"), assessment(0.2), WriteOrigin::Batch { generation: 0 }).await);
        assert!(writer.put(key("S1"), assessment(0.8), WriteOrigin::Live).await);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        let entry = snapshot.get(&key("S1")).unwrap();
        assert_eq!(entry.assessment, assessment(0.8));
        assert_eq!(entry.origin, WriteOrigin::Live);
    }

    #[tokio::test]
    async fn test_stale_generation_is_discarded() {
        let table = AssessmentTable::spawn();
        let writer = table.writer();

        assert!(writer.begin_pass(2).await);
        let stale = WriteOrigin::Batch { generation: 1 };
        let current = WriteOrigin::Batch { generation: 2 };
        assert!(!writer.put(key("S1"), assessment(0.3), stale).await);
        assert!(writer.put(key("S1"), assessment(0.4), current).await);
        // Live writes ignore generations.
        assert!(writer.put(key("S2"), assessment(0.5), WriteOrigin::Live).await);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.generation(), 2);
        assert_eq!(snapshot.get(&key("S1")).unwrap().assessment, assessment(0.4));
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn test_reset_clears_but_begin_pass_keeps() {
        let table = AssessmentTable::spawn();
        let writer = table.writer();

        writer.put(key("S1"), assessment(0.1), WriteOrigin::Batch { generation: 0 }).await;
        writer.begin_pass(1).await;
        assert_eq!(table.snapshot().len(), 1);

        writer.reset(2).await;
        let snapshot = table.snapshot();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.generation(), 2);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let table = AssessmentTable::spawn();
        let mut rx = table.subscribe();

        table
            .writer()
            .put(key("S1"), assessment(0.6), WriteOrigin::Live)
            .await;

        rx.changed().await.unwrap();
        assert!(rx.borrow().get(&key("S1")).is_some());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_freezes_table() {
        let table = AssessmentTable::spawn();
        let writer = table.writer();
        writer.put(key("S1"), assessment(0.6), WriteOrigin::Live).await;

        table.close().await;
        table.close().await;

        assert!(!writer.put(key("S2"), assessment(0.1), WriteOrigin::Live).await);
        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get(&key("S2")).is_none());
    }
}
