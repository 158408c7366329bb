use std::collections::HashMap;

use tracing::{debug, trace};

use crate::{
    config::{BuildError, CounterMode, MetricFilter, StatsdConfig, ValidatedConfig},
    encoder::{encode_counter, encode_gauge, metric_name, NumericValue, SampleRate},
    forwarder::{sync::Transport, Connection, SocketConnection, TransportError},
    snapshot::{MetricKind, Snapshot, Units},
    telemetry::{Observer, TracingObserver},
};

/// Errors that could occur during a report.
///
/// A [`TransportError::Connect`] means nothing was sent. A [`TransportError::Send`] means the report ran to the end,
/// but some payloads were dropped along the way.
pub type ReportError = TransportError;

/// Totals for a single report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReportSummary {
    /// Number of lines encoded and handed to the transport.
    pub lines: usize,

    /// Number of values that were skipped because they could not be rendered, or because text gauges are disabled.
    pub skipped: usize,

    /// Number of metrics left out by the configured filter.
    pub filtered: usize,

    /// Number of payloads sent.
    pub packets_sent: usize,

    /// Number of bytes sent.
    pub bytes_sent: usize,
}

/// Reports metric snapshots to a StatsD server.
///
/// Each call to [`report`][StatsdReporter::report] runs one report cycle: the connection is opened, every metric of the
/// snapshot is expanded into its facets and encoded as one line per facet, the lines are sent in payloads no larger
/// than the configured maximum packet size, and the connection is closed again.
///
/// Gauges are sent as gauges. Histograms, meters and timers are expanded into gauges with a suffix per facet, such as
/// `requests.p99` or `requests.m1_rate`. Counters are sent as gauges of their cumulative count by default, or as
/// counter deltas with [`CounterMode::Delta`]. With [`StatsdConfig::convert_to_counters`], histograms and meters are
/// sent as a single `count` counter instead.
pub struct StatsdReporter {
    transport: Transport,
    prefix: Option<String>,
    tags: Vec<String>,
    sample_rate: Option<SampleRate>,
    counter_mode: CounterMode,
    convert_to_counters: bool,
    filter: Option<MetricFilter>,
    units: Units,
    text_gauges: bool,
    last_counts: HashMap<String, i64>,
}

impl StatsdReporter {
    /// Creates a new `StatsdReporter` sending over the configured protocol.
    ///
    /// Send failures are logged through `tracing`: a warning for the first failure in a row, and debug events for any
    /// that follow it.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned describing why.
    pub fn new(config: StatsdConfig) -> Result<Self, BuildError> {
        let validated = config.validate()?;

        let observer = TracingObserver::new(
            validated.forwarder.remote_addr.to_string(),
            validated.forwarder.protocol.transport_id(),
            validated.telemetry,
        );
        let connection = SocketConnection::new(validated.forwarder.clone());

        Ok(Self::from_parts(validated, Box::new(connection), Box::new(observer)))
    }

    /// Creates a new `StatsdReporter` over the given connection, reporting send outcomes to the given observer.
    ///
    /// The `protocol` and `destination` of the configuration are still validated, and `protocol` still decides how
    /// lines are delimited, but the connection decides where they actually go.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned describing why.
    pub fn with_connection<C, O>(config: StatsdConfig, connection: C, observer: O) -> Result<Self, BuildError>
    where
        C: Connection + 'static,
        O: Observer + 'static,
    {
        let validated = config.validate()?;
        Ok(Self::from_parts(validated, Box::new(connection), Box::new(observer)))
    }

    fn from_parts(config: ValidatedConfig, connection: Box<dyn Connection>, observer: Box<dyn Observer>) -> Self {
        if config.sample_rate.is_some() && config.counter_mode == CounterMode::Gauge && !config.convert_to_counters {
            debug!("Sample rate is set, but no counter lines will be sent, so it has no effect.");
        }

        StatsdReporter {
            transport: Transport::new(&config.forwarder, connection, observer),
            prefix: config.prefix,
            tags: config.tags,
            sample_rate: config.sample_rate,
            counter_mode: config.counter_mode,
            convert_to_counters: config.convert_to_counters,
            filter: config.filter,
            units: Units { duration_unit_nanos: config.duration_unit_nanos, rate_factor: config.rate_factor },
            text_gauges: config.text_gauges,
            last_counts: HashMap::new(),
        }
    }

    /// Returns the number of consecutive failed sends.
    ///
    /// Any successful send resets this back to zero.
    pub fn failures(&self) -> u32 {
        self.transport.failures()
    }

    /// Reports a snapshot.
    ///
    /// Gauges are reported first, then counters, histograms, meters and timers, each in name order. The connection is
    /// closed before this returns, whether the report succeeded or not.
    ///
    /// # Errors
    ///
    /// If the connection cannot be opened, an error is returned and nothing is sent. If any payload fails to send, the
    /// rest of the report is still sent, and an error is returned at the end with the number of payloads and lines
    /// that were dropped.
    pub fn report(&mut self, snapshot: &Snapshot) -> Result<ReportSummary, ReportError> {
        let StatsdReporter {
            transport,
            prefix,
            tags,
            sample_rate,
            counter_mode,
            convert_to_counters,
            filter,
            units,
            text_gauges,
            last_counts,
        } = self;

        let mut cycle = transport.begin()?;
        let mut summary = ReportSummary::default();
        let mut counts = HashMap::with_capacity(last_counts.len());
        let delta = *counter_mode == CounterMode::Delta;

        for observation in snapshot.observations(units, *convert_to_counters) {
            if filter.as_ref().is_some_and(|filter| !filter.matches(observation.name, observation.kind)) {
                trace!(name = observation.name, "Skipping filtered metric.");
                summary.filtered += 1;
                continue;
            }

            for facet in &observation.facets {
                if !*text_gauges && matches!(facet.value, NumericValue::Text(_)) {
                    trace!(name = observation.name, "Skipping text gauge.");
                    summary.skipped += 1;
                    continue;
                }

                let name = metric_name(prefix.as_deref(), observation.name, facet.suffix);
                let as_counter = facet.counter || (delta && observation.kind == MetricKind::Counter);
                let line = match &facet.value {
                    NumericValue::Integer(count) if as_counter => {
                        let value = if delta {
                            let previous = last_counts.get(&name).copied().unwrap_or(0);
                            counts.insert(name.clone(), *count);
                            count.saturating_sub(previous)
                        } else {
                            *count
                        };
                        Some(encode_counter(&name, value, *sample_rate, tags))
                    }
                    value => encode_gauge(&name, value, tags),
                };

                match line {
                    Some(line) => {
                        cycle.append(&line);
                        summary.lines += 1;
                    }
                    None => {
                        trace!(name = %name, "Skipping value with no StatsD representation.");
                        summary.skipped += 1;
                    }
                }
            }
        }

        // Counters that are gone, or filtered out, start over from zero if they come back.
        *last_counts = counts;

        let sent = cycle.finish()?;
        summary.packets_sent = sent.packets_sent;
        summary.bytes_sent = sent.bytes_sent;

        debug!(
            lines = summary.lines,
            skipped = summary.skipped,
            filtered = summary.filtered,
            packets_sent = summary.packets_sent,
            bytes_sent = summary.bytes_sent,
            "Finished report."
        );

        Ok(summary)
    }
}
