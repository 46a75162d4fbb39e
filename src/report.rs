//! Report documents built off the booking path.
//!
//! The engine answers the monthly or period query; the rows are then handed to
//! a worker task that shapes them into a [`ReportDocument`]. The worker never
//! touches the store, so a slow export cannot hold up bookings.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::calendar::Calendar;
use crate::engine::{Engine, EngineError};
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportScope {
    Month { year: i32, month: u32 },
    /// Inclusive dates.
    Period { start: NaiveDate, end: NaiveDate },
}

impl ReportScope {
    pub fn title(&self) -> String {
        match self {
            ReportScope::Month { year, month } => match NaiveDate::from_ymd_opt(*year, *month, 1) {
                Some(first) => format!("Session report {}", first.format("%B %Y")),
                None => format!("Session report {year}-{month:02}"),
            },
            ReportScope::Period { start, end } => format!("Session report {start} to {end}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub session_id: String,
    /// Studio-local `YYYY-MM-DD HH:MM`.
    pub scheduled_at: String,
    pub client: String,
    pub photographer: String,
    pub studio: String,
    pub location: String,
    pub package: String,
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportTotals {
    pub sessions: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_package: BTreeMap<String, usize>,
    pub by_photographer: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportDocument {
    pub title: String,
    pub scope: ReportScope,
    pub generated_at: Ms,
    pub rows: Vec<ReportRow>,
    pub totals: ReportTotals,
}

impl ReportDocument {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Pure shaping step run by the worker.
pub fn build_document(
    scope: ReportScope,
    details: &[SessionDetail],
    calendar: &Calendar,
    generated_at: Ms,
) -> ReportDocument {
    let mut totals = ReportTotals {
        sessions: details.len(),
        ..Default::default()
    };
    // Every status gets a bucket, even an empty one.
    for status in SessionStatus::ALL {
        totals.by_status.insert(status.to_string(), 0);
    }

    let rows = details
        .iter()
        .map(|d| {
            let s = &d.session;
            *totals.by_status.entry(s.status.to_string()).or_default() += 1;
            *totals
                .by_package
                .entry(s.package.as_str().to_string())
                .or_default() += 1;
            *totals
                .by_photographer
                .entry(d.photographer_name.clone())
                .or_default() += 1;
            ReportRow {
                session_id: s.id.to_string(),
                scheduled_at: calendar.format(s.scheduled_at),
                client: d.client_name.clone(),
                photographer: d.photographer_name.clone(),
                studio: d.studio_name.clone(),
                location: d.studio_location.clone(),
                package: s.package.to_string(),
                status: s.status.to_string(),
                notes: s.notes.clone(),
            }
        })
        .collect();

    ReportDocument {
        title: scope.title(),
        scope,
        generated_at,
        rows,
        totals,
    }
}

#[derive(Debug)]
pub enum ReportError {
    Engine(EngineError),
    /// The worker task has stopped.
    WorkerGone,
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Engine(e) => write!(f, "{e}"),
            ReportError::WorkerGone => write!(f, "report worker is not running"),
        }
    }
}

impl std::error::Error for ReportError {}

impl From<EngineError> for ReportError {
    fn from(e: EngineError) -> Self {
        ReportError::Engine(e)
    }
}

struct Job {
    scope: ReportScope,
    details: Vec<SessionDetail>,
    calendar: Calendar,
    response: oneshot::Sender<ReportDocument>,
}

/// Handle to the report worker. Cheap to clone.
#[derive(Clone)]
pub struct ReportService {
    tx: mpsc::Sender<Job>,
}

impl ReportService {
    /// Spawn the worker. Must be called from inside a Tokio runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(worker_loop(rx));
        Self { tx }
    }

    pub async fn generate(
        &self,
        engine: &Engine,
        scope: ReportScope,
    ) -> Result<ReportDocument, ReportError> {
        let details = match scope {
            ReportScope::Month { year, month } => engine.monthly_report(year, month).await?,
            ReportScope::Period { start, end } => engine.period_report(start, end).await?,
        };
        let (tx, rx) = oneshot::channel();
        let job = Job {
            scope,
            details,
            calendar: engine.calendar(),
            response: tx,
        };
        self.tx.send(job).await.map_err(|_| ReportError::WorkerGone)?;
        rx.await.map_err(|_| ReportError::WorkerGone)
    }
}

async fn worker_loop(mut rx: mpsc::Receiver<Job>) {
    while let Some(job) = rx.recv().await {
        let start = std::time::Instant::now();
        let doc = build_document(
            job.scope,
            &job.details,
            &job.calendar,
            crate::engine::now_ms(),
        );
        metrics::counter!(crate::observability::REPORTS_GENERATED_TOTAL).increment(1);
        metrics::histogram!(crate::observability::REPORT_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        debug!("built \"{}\" with {} rows", doc.title, doc.rows.len());
        let _ = job.response.send(doc);
    }
    info!("report worker stopped");
}
