use std::io;

use metrics::{counter, Counter};
use tracing::{debug, trace, warn};

/// How loudly a dropped payload should be reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// The first failure after a successful send, or after startup.
    Warning,

    /// Any further consecutive failure.
    Debug,
}

/// Observes the outcome of every payload sent to the StatsD server.
///
/// The reporter itself never logs send failures directly: it hands them to its observer, along with the severity they
/// deserve. A server that is down for a while produces a single warning, followed by debug-level reports until a send
/// succeeds again.
pub trait Observer: Send {
    /// A payload was sent.
    fn packet_sent(&mut self, bytes: usize, lines: usize);

    /// A payload could not be sent and was dropped.
    ///
    /// `failures` is the number of consecutive failed sends, including this one.
    fn packet_dropped(&mut self, severity: Severity, failures: u32, bytes: usize, lines: usize, error: &io::Error);
}

/// The default [`Observer`], which logs through `tracing` and optionally counts through `metrics`.
pub struct TracingObserver {
    destination: String,
    transport: &'static str,
    telemetry_enabled: bool,
    telemetry: Option<Telemetry>,
}

impl TracingObserver {
    /// Creates a new `TracingObserver` for the given destination and transport.
    ///
    /// When `telemetry` is `true`, payloads and bytes sent or dropped are also recorded as counters through the
    /// globally installed `metrics` recorder.
    pub fn new(destination: impl Into<String>, transport: &'static str, telemetry: bool) -> Self {
        Self { destination: destination.into(), transport, telemetry_enabled: telemetry, telemetry: None }
    }

    fn telemetry(&mut self) -> Option<&mut Telemetry> {
        // Registered lazily so that the counters go through whichever recorder is installed by the time we first send,
        // rather than the one that happened to be installed when the reporter was built.
        if self.telemetry_enabled {
            let transport = self.transport;
            Some(self.telemetry.get_or_insert_with(|| Telemetry::new(transport)))
        } else {
            None
        }
    }
}

impl Observer for TracingObserver {
    fn packet_sent(&mut self, bytes: usize, lines: usize) {
        trace!(destination = %self.destination, transport = self.transport, bytes, lines, "Sent payload.");

        if let Some(telemetry) = self.telemetry() {
            telemetry.track_packet_sent(bytes, lines);
        }
    }

    fn packet_dropped(&mut self, severity: Severity, failures: u32, bytes: usize, lines: usize, error: &io::Error) {
        match severity {
            Severity::Warning => warn!(
                destination = %self.destination,
                transport = self.transport,
                failures,
                bytes,
                lines,
                %error,
                "Failed to send payload to StatsD server."
            ),
            Severity::Debug => debug!(
                destination = %self.destination,
                transport = self.transport,
                failures,
                bytes,
                lines,
                %error,
                "Failed to send payload to StatsD server."
            ),
        }

        if let Some(telemetry) = self.telemetry() {
            telemetry.track_packet_dropped(bytes, lines);
        }
    }
}

/// Reporter telemetry.
///
/// `Telemetry` counts what the reporter put on the wire, and what it had to drop, as normal metrics.
pub struct Telemetry {
    packets_sent: Counter,
    packets_dropped: Counter,
    bytes_sent: Counter,
    bytes_dropped: Counter,
    lines_sent: Counter,
    lines_dropped: Counter,
}

impl Telemetry {
    /// Creates a `Telemetry` instance.
    pub fn new(transport: &'static str) -> Self {
        let labels = telemetry_tags!("client_transport" => transport);

        Self {
            packets_sent: counter!("statsd.client.packets_sent", labels.iter()),
            packets_dropped: counter!("statsd.client.packets_dropped", labels.iter()),
            bytes_sent: counter!("statsd.client.bytes_sent", labels.iter()),
            bytes_dropped: counter!("statsd.client.bytes_dropped", labels.iter()),
            lines_sent: counter!("statsd.client.lines_sent", labels.iter()),
            lines_dropped: counter!("statsd.client.lines_dropped", labels.iter()),
        }
    }

    /// Tracks a successful packet send.
    pub fn track_packet_sent(&mut self, bytes_len: usize, lines: usize) {
        self.packets_sent.increment(1);
        self.bytes_sent.increment(bytes_len as u64);
        self.lines_sent.increment(lines as u64);
    }

    /// Tracks a failed packet send.
    pub fn track_packet_dropped(&mut self, bytes_len: usize, lines: usize) {
        self.packets_dropped.increment(1);
        self.bytes_dropped.increment(bytes_len as u64);
        self.lines_dropped.increment(lines as u64);
    }
}

macro_rules! _telemetry_tags {
    ($($k:literal => $v:expr),*) => {
        [
            ::metrics::Label::from_static_parts("client", "rust"),
            ::metrics::Label::from_static_parts("client_version", env!("CARGO_PKG_VERSION")),
            $(::metrics::Label::from_static_parts($k, $v),)*
        ]
    };
}

pub(crate) use _telemetry_tags as telemetry_tags;

#[cfg(test)]
mod tests {
    use std::io;

    use super::{Observer as _, Severity, TracingObserver};

    #[test]
    fn telemetry_is_lazy() {
        let mut observer = TracingObserver::new("127.0.0.1:8125", "udp", true);
        assert!(observer.telemetry.is_none());

        observer.packet_sent(12, 2);
        assert!(observer.telemetry.is_some());
    }

    #[test]
    fn telemetry_disabled() {
        let mut observer = TracingObserver::new("127.0.0.1:8125", "udp", false);

        let error = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        observer.packet_sent(12, 2);
        observer.packet_dropped(Severity::Warning, 1, 12, 2, &error);
        observer.packet_dropped(Severity::Debug, 2, 12, 2, &error);
        assert!(observer.telemetry.is_none());
    }
}
