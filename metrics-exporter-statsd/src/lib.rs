//! A reporter for sending metric snapshots to a [StatsD][statsd]-compatible server, over UDP or TCP.
//!
//! [statsd]: https://github.com/statsd/statsd/blob/master/docs/metric_types.md
//!
//! # Usage
//!
//! The reporter does not hold any metrics itself. Whatever owns the metrics hands it a [`Snapshot`], and the reporter
//! encodes every metric in it as StatsD lines and sends them off:
//!
//! ```no_run
//! # use metrics_exporter_statsd::{NumericValue, Snapshot, StatsdConfig, StatsdReporter};
//! // First, create a configuration.
//! //
//! // Every field has a default, so only the ones that need changing have to be set.
//! let config = StatsdConfig { prefix: Some("my_service".to_owned()), ..Default::default() };
//! let mut reporter = StatsdReporter::new(config).expect("invalid configuration");
//!
//! // Then report a snapshot whenever it makes sense to do so.
//! let mut snapshot = Snapshot::default();
//! snapshot.gauges.insert("queue_depth".to_owned(), NumericValue::Integer(42));
//! reporter.report(&snapshot).expect("failed to report");
//! ```
//!
//! For periodic reporting, the reporter can also be moved onto a background thread, which takes a snapshot from a
//! [`SnapshotSource`] at a fixed interval:
//!
//! ```no_run
//! # use std::time::Duration;
//! # use metrics_exporter_statsd::{Snapshot, StatsdConfig, StatsdReporter};
//! # let reporter = StatsdReporter::new(StatsdConfig::default()).unwrap();
//! let handle = reporter.start(Snapshot::default, Duration::from_secs(10)).expect("failed to start reporter");
//!
//! // Reporting stops when the handle is stopped or dropped.
//! handle.stop();
//! ```
//!
//! # Wire format
//!
//! Every facet of every metric becomes one line:
//!
//! ```text
//! <name>:<value>|<type>[|@<sample rate>][|#<tag>,<tag>,...]
//! ```
//!
//! Names are built out of the configured prefix, the metric name and the facet suffix (such as `p99` or `m1_rate`),
//! joined with dots. Whitespace runs and `|` in names and text values are replaced with a single `-`. Integers are sent
//! as plain digits, and everything else with exactly two fractional digits, rounded half-up.
//!
//! Which metrics are reported can be narrowed down with a [`MetricFilter`].
//!
//! # Batching
//!
//! Lines are batched into payloads of at most [`StatsdConfig::max_packet_size`] bytes, separated by newlines. Over UDP,
//! each payload is sent as a single datagram. Over TCP, each payload is a single write, with every line terminated by
//! a newline. A line that does not fit in a payload on its own is still sent, alone.
//!
//! A TCP write that fails may have left part of a line on the stream, so the connection is closed right away and the
//! rest of the report is dropped.
//!
//! # Failures
//!
//! A report that cannot connect sends nothing and returns an error. A payload that fails to send is dropped, and the
//! rest of the report is still sent. The first failure in a row is logged as a warning, and the ones after it at debug
//! level until a send succeeds again, so that a server which is down for a while does not flood the logs.
//!
//! # Telemetry
//!
//! When [`StatsdConfig::telemetry`] is enabled, the reporter records the number of packets, bytes and lines it sent or
//! dropped through the [`metrics`] crate, under the `statsd.client` namespace.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod config;
pub use self::config::{
    BuildError, CounterMode, MetricFilter, StatsdConfig, DEFAULT_DESTINATION, DEFAULT_MAX_PACKET_SIZE,
};

mod encoder;
pub use self::encoder::{
    encode_counter, encode_gauge, encode_timing, metric_name, sanitize, EncodedLine, InvalidSampleRate,
    NumericValue, SampleRate,
};

mod forwarder;
pub use self::forwarder::{Connection, Protocol, TransportError};

mod reporter;
pub use self::reporter::{ReportError, ReportSummary, StatsdReporter};

mod scheduler;
pub use self::scheduler::{ReporterHandle, SnapshotSource};

mod snapshot;
pub use self::snapshot::{HistogramSnapshot, MeterSnapshot, MetricKind, Snapshot, Statistics, TimerSnapshot};

mod telemetry;
pub use self::telemetry::{Observer, Severity, TracingObserver};

mod writer;

#[cfg(test)]
mod test_util;
