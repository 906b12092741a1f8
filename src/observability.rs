use std::net::SocketAddr;

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotbook_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotbook_query_duration_seconds";

/// Counter: bookings admitted.
pub const BOOKINGS_ADMITTED_TOTAL: &str = "slotbook_bookings_admitted_total";

/// Counter: bookings refused. Labels: reason (error kind).
pub const BOOKINGS_REJECTED_TOTAL: &str = "slotbook_bookings_rejected_total";

// ── Resource metrics ────────────────────────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "slotbook_connections_active";
pub const CONNECTIONS_TOTAL: &str = "slotbook_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotbook_connections_rejected_total";

/// Gauge: loaded tenant engines.
pub const TENANTS_ACTIVE: &str = "slotbook_tenants_active";

/// Histogram: group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Counter: completed WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotbook_wal_compactions_total";

/// Install the Prometheus exporter when a port is configured.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://{addr}/metrics");
    Ok(())
}

pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::UpsertListing { .. } => "upsert_listing",
        Command::RemoveListing { .. } => "remove_listing",
        Command::SelectAvailability { .. } => "select_availability",
        Command::InsertBooking { .. } => "insert_booking",
        Command::SelectRoster { .. } => "select_roster",
        Command::SelectMyBookings => "select_my_bookings",
        Command::SetDisplayName { .. } => "set_display_name",
    }
}
