use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "hotelier_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "hotelier_query_duration_seconds";

/// Counter: booking admissions. Labels: outcome.
pub const ADMISSIONS_TOTAL: &str = "hotelier_admissions_total";

/// Counter: writes refused because the room already holds an overlapping stay.
pub const ROOM_CONFLICTS_TOTAL: &str = "hotelier_room_conflicts_total";

/// Counter: retries after a lock timed out.
pub const TRANSIENT_RETRIES_TOTAL: &str = "hotelier_transient_retries_total";

// ── Connection and tenant gauges ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "hotelier_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "hotelier_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "hotelier_connections_rejected_total";

/// Gauge: number of open properties (loaded engines).
pub const PROPERTIES_ACTIVE: &str = "hotelier_properties_active";

/// Counter: startup failures, such as an unopenable property.
pub const AUTH_FAILURES_TOTAL: &str = "hotelier_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "hotelier_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "hotelier_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on {addr}: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUser { .. } => "insert_user",
        Command::InsertRoomType { .. } => "insert_room_type",
        Command::UpdateRoomType { .. } => "update_room_type",
        Command::InsertRoom { .. } => "insert_room",
        Command::SetRoomActive { .. } => "set_room_active",
        Command::DeleteRoom { .. } => "delete_room",
        Command::InsertBooking { .. } => "insert_booking",
        Command::AssignRoom { .. } => "assign_room",
        Command::SetBookingStatus { .. } => "set_booking_status",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::InsertReview { .. } => "insert_review",
        Command::InsertRoomImage { .. } => "insert_room_image",
        Command::SetThumbnail { .. } => "set_thumbnail",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectBookingDetail { .. } => "select_booking_detail",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectRoomTypes => "select_room_types",
        Command::SelectRoomImages { .. } => "select_room_images",
    }
}
