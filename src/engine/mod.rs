mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use conflict::now_ms;
pub use error::EngineError;
pub use store::Store;

use std::io;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;

use crate::calendar::Calendar;
use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't ride along
    // with the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// Scheduling knobs for one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Half-width of the conflict window around a booking time.
    pub conflict_radius: Ms,
    pub calendar: Calendar,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conflict_radius: HOUR_MS,
            calendar: Calendar::utc(),
        }
    }
}

/// Booking engine for one studio business (tenant).
///
/// All state lives in a single [`Store`] behind one lock. Writers hold the
/// write lock across the conflict scan, the WAL append and the in-memory
/// apply, so two requests for the same slot cannot both pass the check.
pub struct Engine {
    pub(super) store: RwLock<Store>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) config: EngineConfig,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    /// Must be called from inside a Tokio runtime.
    pub fn new(wal_path: PathBuf, config: EngineConfig) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut store = Store::new();
        for event in &events {
            store.apply_event(event);
        }
        info!(
            "loaded {} events from {} ({} sessions)",
            events.len(),
            wal_path.display(),
            store.session_count()
        );

        Ok(Self {
            store: RwLock::new(store),
            wal_tx,
            config,
        })
    }

    pub fn calendar(&self) -> Calendar {
        self.config.calendar
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, then apply. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        store: &mut Store,
        event: Event,
    ) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        store.apply_event(&event);
        Ok(())
    }
}
