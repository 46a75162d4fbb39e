use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "studiobook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "studiobook_query_duration_seconds";

/// Counter: bookings refused because the slot was taken. Labels: resource.
pub const BOOKINGS_REJECTED_TOTAL: &str = "studiobook_bookings_rejected_total";

/// Counter: bookings committed over a conflict. Labels: resource.
pub const BOOKINGS_FORCED_TOTAL: &str = "studiobook_bookings_forced_total";

/// Counter: report documents built.
pub const REPORTS_GENERATED_TOTAL: &str = "studiobook_reports_generated_total";

/// Histogram: report build time in seconds.
pub const REPORT_DURATION_SECONDS: &str = "studiobook_report_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "studiobook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "studiobook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "studiobook_connections_rejected_total";

/// Gauge: number of studio databases with a loaded engine.
pub const TENANTS_ACTIVE: &str = "studiobook_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "studiobook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "studiobook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a command, for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertClient { .. } => "insert_client",
        Command::InsertPhotographer { .. } => "insert_photographer",
        Command::InsertStudio { .. } => "insert_studio",
        Command::InsertSession { .. } => "insert_session",
        Command::UpdateClient { .. } => "update_client",
        Command::UpdatePhotographer { .. } => "update_photographer",
        Command::UpdateStudio { .. } => "update_studio",
        Command::UpdateSession { .. } => "update_session",
        Command::Delete { .. } => "delete",
        Command::SelectClients(_) => "select_clients",
        Command::SelectPhotographers(_) => "select_photographers",
        Command::SelectStudios(_) => "select_studios",
        Command::SelectSessions { .. } => "select_sessions",
        Command::SelectUpcoming { .. } => "select_upcoming",
        Command::SelectDashboard => "select_dashboard",
        Command::SelectMonthlyReport { .. } => "select_monthly_report",
        Command::SelectPeriodReport { .. } => "select_period_report",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::SelectReportDocument(_) => "select_report_document",
    }
}
