use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "maitre_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "maitre_query_duration_seconds";

// ── Booking flow ────────────────────────────────────────────────

/// Counter: bookings confirmed straight from a request.
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "maitre_bookings_confirmed_total";

/// Counter: requests that landed on the waitlist.
pub const WAITLISTED_TOTAL: &str = "maitre_waitlisted_total";

/// Counter: waitlist entries promoted into bookings.
pub const PROMOTIONS_TOTAL: &str = "maitre_promotions_total";

/// Counter: bucket lock acquisitions that gave up after every retry.
pub const CONTENTION_EXHAUSTED_TOTAL: &str = "maitre_contention_exhausted_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "maitre_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "maitre_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "maitre_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "maitre_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "maitre_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "maitre_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRestaurant { .. } => "insert_restaurant",
        Command::InsertOperatingHours { .. } => "insert_operating_hours",
        Command::InsertDateOverride { .. } => "insert_date_override",
        Command::DeleteDateOverride { .. } => "delete_date_override",
        Command::InsertTable { .. } => "insert_table",
        Command::InsertBooking { pending: false, .. } => "request_booking",
        Command::InsertBooking { pending: true, .. } => "create_pending_booking",
        Command::InsertBookingTransition { .. } => "update_booking_status",
        Command::InsertTableAssignment { .. } => "assign_table",
        Command::InsertWaitlistPromotion { .. } => "promote_waitlist_entry",
        Command::DeleteWaitlistEntry { .. } => "cancel_waitlist_entry",
        Command::InsertWalkIn { .. } => "mark_table_occupied",
        Command::InsertTableRelease { .. } => "mark_table_available",
        Command::InsertTableMaintenance { .. } => "set_table_maintenance",
        Command::SelectRestaurants => "select_restaurants",
        Command::SelectAvailableSlots { .. } => "select_available_slots",
        Command::SelectCandidateTables { .. } => "select_candidate_tables",
        Command::SelectTables { .. } => "select_tables",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectWaitlist { .. } => "select_waitlist",
    }
}
