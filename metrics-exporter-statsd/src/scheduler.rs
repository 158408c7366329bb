use std::{
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

use crate::{
    config::BuildError,
    forwarder::TransportError,
    reporter::StatsdReporter,
    snapshot::Snapshot,
};

/// Provides a snapshot of all metrics at report time.
///
/// Implemented for any `Fn() -> Snapshot` closure.
pub trait SnapshotSource {
    /// Takes a snapshot of all metrics.
    fn snapshot(&self) -> Snapshot;
}

impl<F> SnapshotSource for F
where
    F: Fn() -> Snapshot,
{
    fn snapshot(&self) -> Snapshot {
        self()
    }
}

enum Command {
    ReportNow,
    Stop,
}

/// Handle to a reporter running on a background thread.
///
/// Dropping the handle stops the reporter, after any report that is in flight has finished.
pub struct ReporterHandle {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl ReporterHandle {
    /// Requests a report right away, without waiting for the next interval.
    ///
    /// The regular schedule is not affected.
    pub fn report_now(&self) {
        // A send only fails if the thread is gone, in which case there is nothing left to report to.
        let _ = self.commands.send(Command::ReportNow);
    }

    /// Stops the reporter, waiting for any report that is in flight to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(Command::Stop);
            if thread.join().is_err() {
                warn!("Reporter thread panicked.");
            }
        }
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl StatsdReporter {
    /// Starts reporting on a background thread, taking a snapshot from `source` every `interval`.
    ///
    /// Reports never overlap: if a report takes longer than the interval, the next one starts as soon as it finishes.
    /// Report errors are logged, and reporting carries on at the next interval.
    ///
    /// # Errors
    ///
    /// If `interval` is zero, or if the background thread cannot be spawned, an error is returned.
    pub fn start<S>(self, source: S, interval: Duration) -> Result<ReporterHandle, BuildError>
    where
        S: SnapshotSource + Send + 'static,
    {
        if interval.is_zero() {
            return Err(BuildError::InvalidUnit { field: "interval" });
        }

        let (commands, rx) = unbounded();
        let thread = std::thread::Builder::new()
            .name("metrics-exporter-statsd-reporter".to_string())
            .spawn(move || {
                let mut reporter = self;
                let mut next_report = Instant::now() + interval;
                loop {
                    match rx.recv_timeout(next_report.saturating_duration_since(Instant::now())) {
                        Ok(Command::ReportNow) => {}
                        Err(RecvTimeoutError::Timeout) => {
                            // Skip ahead rather than bursting if we fell behind.
                            next_report = (next_report + interval).max(Instant::now());
                        }
                        Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    report_once(&mut reporter, &source);
                }

                debug!("Reporter stopped.");
            })
            .map_err(BuildError::Backend)?;

        Ok(ReporterHandle { commands, thread: Some(thread) })
    }
}

fn report_once<S>(reporter: &mut StatsdReporter, source: &S)
where
    S: SnapshotSource,
{
    let snapshot = source.snapshot();
    match reporter.report(&snapshot) {
        Ok(summary) => trace!(lines = summary.lines, packets_sent = summary.packets_sent, "Reported snapshot."),
        // Every dropped payload has already gone through the observer.
        Err(e @ TransportError::Send { .. }) => debug!(error = %e, "Report finished with dropped payloads."),
        Err(e) => warn!(error = %e, "Failed to report snapshot."),
    }
}
