use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use metrics_exporter_statsd::{
    MeterSnapshot, NumericValue, Snapshot, Statistics, StatsdConfig, StatsdReporter, TimerSnapshot,
};

fn main() {
    tracing_subscriber::fmt::init();

    let config = StatsdConfig {
        prefix: Some("demo".to_owned()),
        tags: vec!["env:dev".to_owned()],
        destination: "localhost:9125".to_owned(),
        ..Default::default()
    };
    let reporter = StatsdReporter::new(config).expect("failed to build StatsD reporter");

    let loops = Arc::new(AtomicI64::new(0));
    let source_loops = Arc::clone(&loops);
    let handle = reporter
        .start(
            move || {
                let count = source_loops.load(Ordering::Relaxed);

                let mut snapshot = Snapshot::default();
                snapshot.gauges.insert("build".to_owned(), NumericValue::from(env!("CARGO_PKG_VERSION")));
                snapshot.counters.insert("server_loops".to_owned(), count);
                snapshot.timers.insert(
                    "server_loop_time".to_owned(),
                    TimerSnapshot {
                        statistics: Statistics {
                            max: 12_000_000,
                            mean: 10_250_000.0,
                            min: 10_000_000,
                            p50: 10_100_000.0,
                            p99: 11_900_000.0,
                            ..Default::default()
                        },
                        meter: MeterSnapshot { count: count.unsigned_abs(), mean_rate: 1.0, ..Default::default() },
                    },
                );
                snapshot
            },
            Duration::from_secs(10),
        )
        .expect("failed to start StatsD reporter");

    // Pretend to do some work for a while, then report one last time on the way out.
    for _ in 0..60 {
        loops.fetch_add(1, Ordering::Relaxed);
        std::thread::sleep(Duration::from_secs(1));
    }

    handle.report_now();
    handle.stop();
}
