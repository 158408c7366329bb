//! Point-in-time view of a metric registry.
//!
//! The reporter does not store or aggregate anything itself: whatever owns the metrics hands it a [`Snapshot`] at
//! report time, with statistics and rates already computed.

use std::collections::BTreeMap;

use crate::encoder::NumericValue;

/// Distribution statistics of a histogram or timer.
///
/// For timers, every field is in nanoseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Statistics {
    /// Largest value.
    pub max: i64,
    /// Arithmetic mean.
    pub mean: f64,
    /// Smallest value.
    pub min: i64,
    /// Standard deviation.
    pub stddev: f64,
    /// Median.
    pub p50: f64,
    /// 75th percentile.
    pub p75: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 98th percentile.
    pub p98: f64,
    /// 99th percentile.
    pub p99: f64,
    /// 99.9th percentile.
    pub p999: f64,
}

/// Snapshot of a histogram.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HistogramSnapshot {
    /// Number of values recorded.
    pub count: u64,
    /// Distribution of the recorded values.
    pub statistics: Statistics,
}

/// Snapshot of a meter.
///
/// Rates are in events per second.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeterSnapshot {
    /// Number of events marked.
    pub count: u64,
    /// Mean rate since the meter was created.
    pub mean_rate: f64,
    /// One-minute exponentially-weighted moving average rate.
    pub one_minute_rate: f64,
    /// Five-minute exponentially-weighted moving average rate.
    pub five_minute_rate: f64,
    /// Fifteen-minute exponentially-weighted moving average rate.
    pub fifteen_minute_rate: f64,
}

/// Snapshot of a timer: a histogram of durations, plus a meter of how often they happen.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimerSnapshot {
    /// Distribution of the recorded durations, in nanoseconds.
    pub statistics: Statistics,
    /// Rate at which durations are recorded.
    pub meter: MeterSnapshot,
}

/// Every metric of a registry at a point in time, grouped by kind and ordered by name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    /// Gauges.
    pub gauges: BTreeMap<String, NumericValue>,
    /// Counters, with their current count.
    pub counters: BTreeMap<String, i64>,
    /// Histograms.
    pub histograms: BTreeMap<String, HistogramSnapshot>,
    /// Meters.
    pub meters: BTreeMap<String, MeterSnapshot>,
    /// Timers.
    pub timers: BTreeMap<String, TimerSnapshot>,
}

/// Kind of a metric in a [`Snapshot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// An entry of [`Snapshot::gauges`].
    Gauge,
    /// An entry of [`Snapshot::counters`].
    Counter,
    /// An entry of [`Snapshot::histograms`].
    Histogram,
    /// An entry of [`Snapshot::meters`].
    Meter,
    /// An entry of [`Snapshot::timers`].
    Timer,
}

/// One derived sub-measurement of a metric, such as a timer's `p99`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Facet {
    pub suffix: Option<&'static str>,
    pub value: NumericValue,
    /// The value is a cumulative count that goes out as a StatsD counter.
    pub counter: bool,
}

impl Facet {
    fn bare(value: NumericValue) -> Self {
        Facet { suffix: None, value, counter: false }
    }

    fn named(suffix: &'static str, value: impl Into<NumericValue>) -> Self {
        Facet { suffix: Some(suffix), value: value.into(), counter: false }
    }

    fn count(count: u64) -> Self {
        Facet { suffix: Some("count"), value: count.into(), counter: true }
    }
}

/// One metric to emit, expanded into its facets in wire order.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct MetricObservation<'a> {
    pub name: &'a str,
    pub kind: MetricKind,
    pub facets: Vec<Facet>,
}

/// Conversion factors applied to timer durations and rates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Units {
    /// Length of the reported duration unit, in nanoseconds.
    pub duration_unit_nanos: f64,
    /// Multiplier turning per-second rates into the reported rate unit.
    pub rate_factor: f64,
}

impl Units {
    fn duration(&self, nanos: f64) -> NumericValue {
        NumericValue::from(nanos / self.duration_unit_nanos)
    }

    fn rate(&self, per_second: f64) -> NumericValue {
        NumericValue::from(per_second * self.rate_factor)
    }
}

impl Default for Units {
    fn default() -> Self {
        // Milliseconds, and events per second.
        Units { duration_unit_nanos: 1e6, rate_factor: 1.0 }
    }
}

fn histogram_facets(histogram: &HistogramSnapshot, counts_only: bool) -> Vec<Facet> {
    if counts_only {
        return vec![Facet::count(histogram.count)];
    }

    let stats = &histogram.statistics;
    vec![
        Facet::named("count", histogram.count),
        Facet::named("max", stats.max),
        Facet::named("mean", stats.mean),
        Facet::named("min", stats.min),
        Facet::named("stddev", stats.stddev),
        Facet::named("p50", stats.p50),
        Facet::named("p75", stats.p75),
        Facet::named("p95", stats.p95),
        Facet::named("p98", stats.p98),
        Facet::named("p99", stats.p99),
        Facet::named("p999", stats.p999),
    ]
}

fn meter_facets(meter: &MeterSnapshot, units: &Units, counts_only: bool, facets: &mut Vec<Facet>) {
    if counts_only {
        facets.push(Facet::count(meter.count));
        return;
    }

    facets.extend([
        Facet::named("count", meter.count),
        Facet::named("m1_rate", units.rate(meter.one_minute_rate)),
        Facet::named("m5_rate", units.rate(meter.five_minute_rate)),
        Facet::named("m15_rate", units.rate(meter.fifteen_minute_rate)),
        Facet::named("mean_rate", units.rate(meter.mean_rate)),
    ]);
}

fn timer_facets(timer: &TimerSnapshot, units: &Units, counts_only: bool) -> Vec<Facet> {
    let stats = &timer.statistics;
    let mut facets = vec![
        Facet::named("max", units.duration(stats.max as f64)),
        Facet::named("mean", units.duration(stats.mean)),
        Facet::named("min", units.duration(stats.min as f64)),
        Facet::named("stddev", units.duration(stats.stddev)),
        Facet::named("p50", units.duration(stats.p50)),
        Facet::named("p75", units.duration(stats.p75)),
        Facet::named("p95", units.duration(stats.p95)),
        Facet::named("p98", units.duration(stats.p98)),
        Facet::named("p99", units.duration(stats.p99)),
        Facet::named("p999", units.duration(stats.p999)),
    ];
    meter_facets(&timer.meter, units, counts_only, &mut facets);
    facets
}

impl Snapshot {
    /// Returns `true` if the snapshot holds no metrics at all.
    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty()
            && self.counters.is_empty()
            && self.histograms.is_empty()
            && self.meters.is_empty()
            && self.timers.is_empty()
    }

    /// Expands every metric into its facets: gauges, counters, histograms, meters and then timers, each in name order.
    ///
    /// With `counts_only`, histograms and meters are reduced to a single `count` counter facet, and so is the metered
    /// part of timers. Timer durations are kept.
    pub(crate) fn observations<'a>(
        &'a self,
        units: &'a Units,
        counts_only: bool,
    ) -> impl Iterator<Item = MetricObservation<'a>> + 'a {
        let gauges = self.gauges.iter().map(|(name, value)| MetricObservation {
            name,
            kind: MetricKind::Gauge,
            facets: vec![Facet::bare(value.clone())],
        });
        let counters = self.counters.iter().map(|(name, count)| MetricObservation {
            name,
            kind: MetricKind::Counter,
            facets: vec![Facet::bare(NumericValue::Integer(*count))],
        });
        let histograms = self.histograms.iter().map(move |(name, histogram)| MetricObservation {
            name,
            kind: MetricKind::Histogram,
            facets: histogram_facets(histogram, counts_only),
        });
        let meters = self.meters.iter().map(move |(name, meter)| {
            let mut facets = Vec::with_capacity(5);
            meter_facets(meter, units, counts_only, &mut facets);
            MetricObservation { name, kind: MetricKind::Meter, facets }
        });
        let timers = self.timers.iter().map(move |(name, timer)| MetricObservation {
            name,
            kind: MetricKind::Timer,
            facets: timer_facets(timer, units, counts_only),
        });

        gauges.chain(counters).chain(histograms).chain(meters).chain(timers)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        HistogramSnapshot, MeterSnapshot, MetricKind, Snapshot, Statistics, TimerSnapshot, Units,
    };
    use crate::encoder::NumericValue;

    fn suffixes(snapshot: &Snapshot, units: &Units) -> Vec<(String, Vec<&'static str>)> {
        snapshot
            .observations(units, false)
            .map(|o| (o.name.to_owned(), o.facets.iter().filter_map(|f| f.suffix).collect()))
            .collect()
    }

    #[test]
    fn kinds_are_grouped_in_order() {
        let mut snapshot = Snapshot::default();
        assert!(snapshot.is_empty());

        snapshot.timers.insert("t".to_owned(), TimerSnapshot::default());
        snapshot.meters.insert("m".to_owned(), MeterSnapshot::default());
        snapshot.histograms.insert("h".to_owned(), HistogramSnapshot::default());
        snapshot.counters.insert("c".to_owned(), 1);
        snapshot.gauges.insert("g2".to_owned(), NumericValue::Integer(2));
        snapshot.gauges.insert("g1".to_owned(), NumericValue::Integer(1));
        assert!(!snapshot.is_empty());

        let units = Units::default();
        let kinds: Vec<_> = snapshot.observations(&units, false).map(|o| (o.name, o.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("g1", MetricKind::Gauge),
                ("g2", MetricKind::Gauge),
                ("c", MetricKind::Counter),
                ("h", MetricKind::Histogram),
                ("m", MetricKind::Meter),
                ("t", MetricKind::Timer),
            ]
        );
    }

    #[test]
    fn facet_order() {
        let mut snapshot = Snapshot::default();
        snapshot.histograms.insert("h".to_owned(), HistogramSnapshot::default());
        snapshot.meters.insert("m".to_owned(), MeterSnapshot::default());
        snapshot.timers.insert("t".to_owned(), TimerSnapshot::default());

        let units = Units::default();
        assert_eq!(
            suffixes(&snapshot, &units),
            vec![
                (
                    "h".to_owned(),
                    vec!["count", "max", "mean", "min", "stddev", "p50", "p75", "p95", "p98", "p99", "p999"]
                ),
                ("m".to_owned(), vec!["count", "m1_rate", "m5_rate", "m15_rate", "mean_rate"]),
                (
                    "t".to_owned(),
                    vec![
                        "max", "mean", "min", "stddev", "p50", "p75", "p95", "p98", "p99", "p999", "count", "m1_rate",
                        "m5_rate", "m15_rate", "mean_rate"
                    ]
                ),
            ]
        );
    }

    #[test]
    fn histogram_extremes_are_integers() {
        let mut snapshot = Snapshot::default();
        let statistics = Statistics { max: 2, mean: 3.0, min: 4, ..Default::default() };
        snapshot.histograms.insert("h".to_owned(), HistogramSnapshot { count: 1, statistics });

        let units = Units::default();
        let observation = snapshot.observations(&units, false).next().unwrap();
        let values: Vec<_> = observation.facets.iter().take(4).map(|f| f.value.clone()).collect();
        assert_eq!(
            values,
            vec![
                NumericValue::Integer(1),
                NumericValue::Integer(2),
                NumericValue::Float(3.0),
                NumericValue::Integer(4),
            ]
        );
    }

    #[test]
    fn timer_units_are_converted() {
        let mut snapshot = Snapshot::default();
        let statistics = Statistics { max: 100_000_000, mean: 1_500_000.0, ..Default::default() };
        let meter = MeterSnapshot { count: 7, one_minute_rate: 2.0, ..Default::default() };
        snapshot.timers.insert("t".to_owned(), TimerSnapshot { statistics, meter });

        // Seconds, and events per minute.
        let units = Units { duration_unit_nanos: 1e9, rate_factor: 60.0 };
        let observation = snapshot.observations(&units, false).next().unwrap();
        assert_eq!(observation.facets[0].value, NumericValue::Float(0.1));
        assert_eq!(observation.facets[1].value, NumericValue::Float(0.0015));
        assert_eq!(observation.facets[10].value, NumericValue::Integer(7));
        assert_eq!(observation.facets[11].value, NumericValue::Float(120.0));
    }

    #[test]
    fn counts_only() {
        let mut snapshot = Snapshot::default();
        snapshot.counters.insert("c".to_owned(), 3);
        snapshot.histograms.insert("h".to_owned(), HistogramSnapshot { count: 4, ..Default::default() });
        snapshot.meters.insert("m".to_owned(), MeterSnapshot { count: 5, mean_rate: 1.0, ..Default::default() });
        snapshot.timers.insert("t".to_owned(), TimerSnapshot::default());

        let units = Units::default();
        let observations: Vec<_> = snapshot.observations(&units, true).collect();

        let counted: Vec<_> = observations
            .iter()
            .flat_map(|o| o.facets.iter().filter(|f| f.counter).map(move |f| (o.name, f.suffix, f.value.clone())))
            .collect();
        assert_eq!(
            counted,
            vec![
                ("h", Some("count"), NumericValue::Integer(4)),
                ("m", Some("count"), NumericValue::Integer(5)),
                ("t", Some("count"), NumericValue::Integer(0)),
            ]
        );

        // Plain counters are left to the counter mode, and timers keep their durations.
        assert_eq!(observations[0].facets.len(), 1);
        assert!(!observations[0].facets[0].counter);
        assert_eq!(
            observations[3].facets.iter().filter_map(|f| f.suffix).collect::<Vec<_>>(),
            vec!["max", "mean", "min", "stddev", "p50", "p75", "p95", "p98", "p99", "p999", "count"]
        );
    }
}
