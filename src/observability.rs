use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "rideslot_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "rideslot_query_duration_seconds";

/// Counter: booking attempts by result. Labels: outcome
/// (admitted, slot_closed, slot_full, transient, error).
pub const ADMISSIONS_TOTAL: &str = "rideslot_admissions_total";

/// Counter: admission passes repeated after a WAL failure.
pub const ADMISSION_RETRIES_TOTAL: &str = "rideslot_admission_retries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "rideslot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "rideslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rideslot_connections_rejected_total";

/// Gauge: number of loaded ledgers (one per database name).
pub const TENANTS_ACTIVE: &str = "rideslot_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rideslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rideslot_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertBooking { .. } => "insert_booking",
        Command::SelectBookingsByDay { .. } => "select_bookings_by_day",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectRecentBookings { .. } => "select_recent_bookings",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::InsertAvailability { .. } => "insert_availability",
        Command::InitializeRange { .. } => "initialize_range",
        Command::SetSlot { .. } => "set_slot",
        Command::SetCapacity { .. } => "set_capacity",
        Command::Transition { .. } => "transition",
        Command::RepairDuplicates => "repair_duplicates",
        Command::Compact => "compact",
    }
}
