use std::{fmt, sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    encoder::{InvalidSampleRate, SampleRate},
    forwarder::{ForwarderConfiguration, Protocol, RemoteAddr},
    snapshot::MetricKind,
    writer::SMALLEST_VALID_PAYLOAD,
};

/// Default destination.
pub const DEFAULT_DESTINATION: &str = "127.0.0.1:8125";

/// Default maximum packet size, in bytes.
///
/// Fits in a single Ethernet frame once IP and UDP headers are accounted for.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1432;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_DURATION_UNIT: Duration = Duration::from_millis(1);
const DEFAULT_RATE_UNIT: Duration = Duration::from_secs(1);

/// Errors that could occur while building a StatsD reporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The sample rate is outside of `[0, 1]`.
    #[error(transparent)]
    InvalidSampleRate(#[from] InvalidSampleRate),

    /// The protocol name is empty or unknown.
    #[error("invalid protocol '{protocol}' (expected 'udp' or 'tcp')")]
    InvalidProtocol {
        /// The protocol name that was given.
        protocol: String,
    },

    /// Failed to parse the destination.
    #[error("invalid destination: {reason}")]
    InvalidDestination {
        /// Details about the parsing failure.
        reason: String,
    },

    /// The maximum packet size cannot hold even the smallest valid line.
    #[error("maximum packet size of {size} bytes is too small (must be {minimum} or greater)")]
    PacketSizeTooSmall {
        /// The configured size.
        size: usize,

        /// The smallest size accepted.
        minimum: usize,
    },

    /// A duration setting was zero.
    #[error("{field} must be non-zero")]
    InvalidUnit {
        /// The setting that was zero.
        field: &'static str,
    },

    /// Failed to spawn the background reporting thread.
    #[error("failed to spawn background thread for reporter")]
    Backend(#[source] std::io::Error),
}

/// How counters are reported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CounterMode {
    /// The cumulative count is sent as a gauge.
    ///
    /// This is robust against lost packets: a later report always carries the full count.
    #[default]
    Gauge,

    /// The change since the previous report is sent as a counter, with the configured sample rate.
    ///
    /// The first report of a counter sends its full count. A delta whose packet fails to send is lost.
    Delta,
}

/// Decides which metrics are reported.
///
/// The filter sees each metric's name as it appears in the snapshot, before any prefix is applied, along with its kind.
///
/// ```
/// # use metrics_exporter_statsd::{MetricFilter, MetricKind};
/// // Leave out anything internal, and every histogram.
/// let filter = MetricFilter::new(|name, kind| !name.starts_with("internal.") && kind != MetricKind::Histogram);
/// assert!(filter.matches("requests", MetricKind::Counter));
/// assert!(!filter.matches("internal.queue", MetricKind::Gauge));
/// ```
#[derive(Clone)]
pub struct MetricFilter(Arc<dyn Fn(&str, MetricKind) -> bool + Send + Sync>);

impl MetricFilter {
    /// Creates a new `MetricFilter` from a predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&str, MetricKind) -> bool + Send + Sync + 'static,
    {
        MetricFilter(Arc::new(predicate))
    }

    /// Returns `true` if the metric should be reported.
    pub fn matches(&self, name: &str, kind: MetricKind) -> bool {
        (self.0)(name, kind)
    }
}

impl fmt::Debug for MetricFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricFilter").finish_non_exhaustive()
    }
}

/// Configuration for a StatsD reporter.
///
/// Every field has a sensible default, so the usual way to build one is to override a few fields and take the rest
/// from [`StatsdConfig::default`]:
///
/// ```
/// # use metrics_exporter_statsd::{Protocol, StatsdConfig};
/// let config = StatsdConfig {
///     prefix: Some("my_service".to_owned()),
///     protocol: Protocol::Tcp,
///     destination: "statsd.local:8125".to_owned(),
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug)]
pub struct StatsdConfig {
    /// Prefix prepended to every metric name, joined with a `.`.
    ///
    /// Defaults to no prefix.
    pub prefix: Option<String>,

    /// Tags appended to every line, in order, using the `|#tag1,tag2` extension.
    ///
    /// Defaults to no tags.
    pub tags: Vec<String>,

    /// Sample rate attached to every line sent as a StatsD counter.
    ///
    /// Counter lines are only sent in [`CounterMode::Delta`], or for the counts of
    /// [`convert_to_counters`][StatsdConfig::convert_to_counters]. With neither of those, no counter lines are sent
    /// and the sample rate has no effect. Must be within `[0, 1]`. A rate of `1.0` is implied and never written.
    ///
    /// Defaults to no sample rate.
    pub sample_rate: Option<f64>,

    /// Maximum number of bytes sent in a single packet.
    ///
    /// Lines are batched into packets up to this size. A single line that is larger than this on its own is still sent,
    /// alone in its own packet.
    ///
    /// Defaults to 1432 bytes.
    pub max_packet_size: usize,

    /// Protocol used to reach the server.
    ///
    /// Defaults to UDP.
    pub protocol: Protocol,

    /// Server address, in the form of `<host>:<port>`.
    ///
    /// The host is resolved at the start of every report.
    ///
    /// Defaults to `127.0.0.1:8125`.
    pub destination: String,

    /// Timeout for connecting and for each write.
    ///
    /// When the write timeout is reached, the payload being sent at the time is dropped without retrying.
    ///
    /// Defaults to 1 second.
    pub write_timeout: Duration,

    /// How counters are reported.
    ///
    /// Defaults to [`CounterMode::Gauge`].
    pub counter_mode: CounterMode,

    /// Whether histograms and meters are reported as a single `<name>.count` counter.
    ///
    /// Their other facets, such as percentiles and rates, are not sent. Timers keep their durations, and only their
    /// rates are replaced by the count. In [`CounterMode::Delta`], the count is sent as the change since the previous
    /// report, the same as plain counters. Otherwise the cumulative count is sent.
    ///
    /// Defaults to `false`.
    pub convert_to_counters: bool,

    /// Which metrics are reported.
    ///
    /// Defaults to reporting every metric.
    pub filter: Option<MetricFilter>,

    /// Unit that durations are reported in.
    ///
    /// Timer statistics are divided by this before being sent.
    ///
    /// Defaults to 1 millisecond.
    pub duration_unit: Duration,

    /// Unit that rates are reported in.
    ///
    /// Meter and timer rates are reported as events per this duration.
    ///
    /// Defaults to 1 second.
    pub rate_unit: Duration,

    /// Whether gauges with text values are sent.
    ///
    /// Defaults to `true`.
    pub text_gauges: bool,

    /// Whether the reporter records its own telemetry through `metrics`.
    ///
    /// When enabled, counters for packets, bytes and lines sent or dropped are recorded under the `statsd.client`
    /// namespace, through whichever recorder is globally installed.
    ///
    /// Defaults to `false`.
    pub telemetry: bool,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        StatsdConfig {
            prefix: None,
            tags: Vec::new(),
            sample_rate: None,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            protocol: Protocol::default(),
            destination: DEFAULT_DESTINATION.to_owned(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            counter_mode: CounterMode::default(),
            convert_to_counters: false,
            filter: None,
            duration_unit: DEFAULT_DURATION_UNIT,
            rate_unit: DEFAULT_RATE_UNIT,
            text_gauges: true,
            telemetry: false,
        }
    }
}

/// A configuration that passed validation.
#[derive(Clone, Debug)]
pub(crate) struct ValidatedConfig {
    pub forwarder: ForwarderConfiguration,
    pub prefix: Option<String>,
    pub tags: Vec<String>,
    pub sample_rate: Option<SampleRate>,
    pub counter_mode: CounterMode,
    pub convert_to_counters: bool,
    pub filter: Option<MetricFilter>,
    pub duration_unit_nanos: f64,
    pub rate_factor: f64,
    pub text_gauges: bool,
    pub telemetry: bool,
}

impl StatsdConfig {
    /// Checks the configuration, converting it into the form the reporter works with.
    pub(crate) fn validate(&self) -> Result<ValidatedConfig, BuildError> {
        let sample_rate = self.sample_rate.map(SampleRate::new).transpose()?;

        if self.max_packet_size < SMALLEST_VALID_PAYLOAD.len() {
            return Err(BuildError::PacketSizeTooSmall {
                size: self.max_packet_size,
                minimum: SMALLEST_VALID_PAYLOAD.len(),
            });
        }

        let remote_addr = RemoteAddr::try_from(self.destination.as_str())
            .map_err(|reason| BuildError::InvalidDestination { reason })?;

        for (field, unit) in [
            ("write_timeout", self.write_timeout),
            ("duration_unit", self.duration_unit),
            ("rate_unit", self.rate_unit),
        ] {
            if unit.is_zero() {
                return Err(BuildError::InvalidUnit { field });
            }
        }

        Ok(ValidatedConfig {
            forwarder: ForwarderConfiguration {
                remote_addr,
                protocol: self.protocol,
                max_payload_len: self.max_packet_size,
                write_timeout: self.write_timeout,
            },
            prefix: self.prefix.clone().filter(|p| !p.is_empty()),
            tags: self.tags.clone(),
            sample_rate,
            counter_mode: self.counter_mode,
            convert_to_counters: self.convert_to_counters,
            filter: self.filter.clone(),
            duration_unit_nanos: self.duration_unit.as_nanos() as f64,
            rate_factor: self.rate_unit.as_secs_f64(),
            text_gauges: self.text_gauges,
            telemetry: self.telemetry,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{BuildError, StatsdConfig, DEFAULT_MAX_PACKET_SIZE};
    use crate::forwarder::Protocol;

    #[test]
    fn defaults_are_valid() {
        let config = StatsdConfig::default();
        assert_eq!(config.max_packet_size, DEFAULT_MAX_PACKET_SIZE);
        assert_eq!(config.destination, "127.0.0.1:8125");
        assert_eq!(config.protocol, Protocol::Udp);
        assert!(config.text_gauges);

        let validated = config.validate().unwrap();
        assert_eq!(validated.forwarder.max_payload_len, 1432);
        assert!(validated.sample_rate.is_none());
        assert!((validated.duration_unit_nanos - 1e6).abs() < f64::EPSILON);
        assert!((validated.rate_factor - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_prefix_is_no_prefix() {
        let config = StatsdConfig { prefix: Some(String::new()), ..Default::default() };
        assert!(config.validate().unwrap().prefix.is_none());
    }

    #[test]
    fn rejects_bad_sample_rate() {
        for rate in [-0.1, 1.5, f64::NAN] {
            let config = StatsdConfig { sample_rate: Some(rate), ..Default::default() };
            assert!(matches!(config.validate(), Err(BuildError::InvalidSampleRate(_))));
        }

        let config = StatsdConfig { sample_rate: Some(0.25), ..Default::default() };
        assert_eq!(config.validate().unwrap().sample_rate.map(|r| r.get()), Some(0.25));
    }

    #[test]
    fn rejects_small_packet_size() {
        let config = StatsdConfig { max_packet_size: 4, ..Default::default() };
        assert!(matches!(config.validate(), Err(BuildError::PacketSizeTooSmall { size: 4, minimum: 5 })));

        let config = StatsdConfig { max_packet_size: 5, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_destination() {
        for destination in ["", "localhost", "localhost:http", ":8125"] {
            let config = StatsdConfig { destination: destination.to_owned(), ..Default::default() };
            assert!(matches!(config.validate(), Err(BuildError::InvalidDestination { .. })));
        }
    }

    #[test]
    fn rejects_zero_units() {
        let config = StatsdConfig { duration_unit: Duration::ZERO, ..Default::default() };
        assert!(matches!(config.validate(), Err(BuildError::InvalidUnit { field: "duration_unit" })));

        let config = StatsdConfig { rate_unit: Duration::ZERO, ..Default::default() };
        assert!(matches!(config.validate(), Err(BuildError::InvalidUnit { field: "rate_unit" })));

        let config = StatsdConfig { write_timeout: Duration::ZERO, ..Default::default() };
        assert!(matches!(config.validate(), Err(BuildError::InvalidUnit { field: "write_timeout" })));
    }

    #[test]
    fn unit_factors() {
        let config = StatsdConfig {
            duration_unit: Duration::from_secs(1),
            rate_unit: Duration::from_secs(60),
            ..Default::default()
        };
        let validated = config.validate().unwrap();
        assert!((validated.duration_unit_nanos - 1e9).abs() < f64::EPSILON);
        assert!((validated.rate_factor - 60.0).abs() < f64::EPSILON);
    }
}
