//! Session instrumentation.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! application installs a recorder (the CLI can install a Prometheus one).

use crate::config::TransportKind;
use crate::event::EventKind;
use ::metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metric names.
pub mod names {
    pub const OPEN_ATTEMPTS_TOTAL: &str = "pulse_stream_open_attempts_total";
    pub const OPENS_TOTAL: &str = "pulse_stream_opens_total";
    pub const SESSIONS_OPEN: &str = "pulse_stream_sessions_open";
    pub const RECONNECTS_TOTAL: &str = "pulse_stream_reconnects_total";
    pub const RECONNECT_DELAY_SECONDS: &str = "pulse_stream_reconnect_delay_seconds";
    pub const MESSAGES_TOTAL: &str = "pulse_stream_messages_total";
    pub const EVICTIONS_TOTAL: &str = "pulse_stream_buffer_evictions_total";
    pub const ERRORS_TOTAL: &str = "pulse_stream_errors_total";
    pub const LISTENER_PANICS_TOTAL: &str = "pulse_stream_listener_panics_total";
}

/// Register metric descriptions with the installed recorder.
pub fn describe() {
    ::metrics::describe_counter!(names::OPEN_ATTEMPTS_TOTAL, "Adapter open attempts");
    ::metrics::describe_counter!(names::OPENS_TOTAL, "Successful transport opens");
    ::metrics::describe_gauge!(names::SESSIONS_OPEN, "Sessions currently open");
    ::metrics::describe_counter!(names::RECONNECTS_TOTAL, "Reconnects scheduled");
    ::metrics::describe_histogram!(
        names::RECONNECT_DELAY_SECONDS,
        "Backoff delay before a scheduled reconnect"
    );
    ::metrics::describe_counter!(names::MESSAGES_TOTAL, "Messages received");
    ::metrics::describe_counter!(names::EVICTIONS_TOTAL, "Messages evicted from full buffers");
    ::metrics::describe_counter!(names::ERRORS_TOTAL, "Transport errors recorded");
    ::metrics::describe_counter!(names::LISTENER_PANICS_TOTAL, "Event listeners that panicked");
}

pub(crate) fn record_open_attempt(kind: TransportKind) {
    counter!(names::OPEN_ATTEMPTS_TOTAL, "transport" => kind.as_str()).increment(1);
}

pub(crate) fn record_opened(kind: TransportKind) {
    counter!(names::OPENS_TOTAL, "transport" => kind.as_str()).increment(1);
    gauge!(names::SESSIONS_OPEN, "transport" => kind.as_str()).increment(1.0);
}

pub(crate) fn record_left_open(kind: TransportKind) {
    gauge!(names::SESSIONS_OPEN, "transport" => kind.as_str()).decrement(1.0);
}

pub(crate) fn record_reconnect(kind: TransportKind, delay: Duration) {
    counter!(names::RECONNECTS_TOTAL, "transport" => kind.as_str()).increment(1);
    histogram!(names::RECONNECT_DELAY_SECONDS, "transport" => kind.as_str())
        .record(delay.as_secs_f64());
}

pub(crate) fn record_message(kind: TransportKind, evicted: usize) {
    counter!(names::MESSAGES_TOTAL, "transport" => kind.as_str()).increment(1);
    if evicted > 0 {
        counter!(names::EVICTIONS_TOTAL, "transport" => kind.as_str()).increment(evicted as u64);
    }
}

pub(crate) fn record_error(kind: TransportKind) {
    counter!(names::ERRORS_TOTAL, "transport" => kind.as_str()).increment(1);
}

pub(crate) fn record_listener_panic(event: EventKind) {
    counter!(names::LISTENER_PANICS_TOTAL, "event" => event.as_str()).increment(1);
}
