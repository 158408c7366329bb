use std::io;

use tracing::{debug, trace};

use crate::{
    encoder::EncodedLine,
    telemetry::{Observer, Severity},
    writer::{Payload, PayloadWriter},
};

use super::{Connection, ForwarderConfiguration, TransportError};

/// Totals for a single report cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Number of payloads sent.
    pub packets_sent: usize,

    /// Number of payloads dropped because sending them failed.
    pub packets_dropped: usize,

    /// Number of lines sent.
    pub lines_sent: usize,

    /// Number of lines dropped because the payload holding them failed to send.
    pub lines_dropped: usize,

    /// Number of bytes sent.
    pub bytes_sent: usize,

    /// Number of bytes dropped.
    pub bytes_dropped: usize,
}

/// Moves encoded lines to the StatsD server in size-bounded payloads.
///
/// The transport owns the connection and the payload writer. Each report runs as a [`Cycle`]: the connection is opened
/// when the cycle begins, lines are batched into payloads as they are appended, and the connection is closed when the
/// cycle ends, no matter how it ends.
pub struct Transport {
    connection: Box<dyn Connection>,
    observer: Box<dyn Observer>,
    writer: PayloadWriter,
    stream: bool,
    failures: u32,
}

impl Transport {
    /// Creates a new `Transport`.
    pub(crate) fn new(
        config: &ForwarderConfiguration,
        connection: Box<dyn Connection>,
        observer: Box<dyn Observer>,
    ) -> Self {
        Transport {
            connection,
            observer,
            writer: PayloadWriter::new(config.max_payload_len, config.requires_line_terminator()),
            stream: config.requires_line_terminator(),
            failures: 0,
        }
    }

    /// Returns the number of consecutive failed sends.
    ///
    /// Any successful send resets this back to zero.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Opens the connection and begins a report cycle.
    ///
    /// # Errors
    ///
    /// If the connection cannot be opened, an error is returned and nothing will be sent.
    pub fn begin(&mut self) -> Result<Cycle<'_>, TransportError> {
        self.connection.connect()?;
        trace!(transport = self.connection.transport_id(), "Opened connection.");

        Ok(Cycle { transport: self, summary: CycleSummary::default(), last_error: None, open: true })
    }

    fn send(&mut self, payload: &Payload, summary: &mut CycleSummary) -> Result<(), io::Error> {
        match self.connection.send(payload.as_bytes()) {
            Ok(()) => {
                self.failures = 0;
                summary.packets_sent += 1;
                summary.lines_sent += payload.lines();
                summary.bytes_sent += payload.len();
                self.observer.packet_sent(payload.len(), payload.lines());
                Ok(())
            }
            Err(e) => {
                self.failures = self.failures.saturating_add(1);
                summary.packets_dropped += 1;
                summary.lines_dropped += payload.lines();
                summary.bytes_dropped += payload.len();

                let severity = if self.failures == 1 { Severity::Warning } else { Severity::Debug };
                self.observer.packet_dropped(severity, self.failures, payload.len(), payload.lines(), &e);
                Err(e)
            }
        }
    }

    /// Drops a payload that can no longer be sent, without touching the failure streak.
    fn discard(&mut self, payload: &Payload, summary: &mut CycleSummary) {
        summary.packets_dropped += 1;
        summary.lines_dropped += payload.lines();
        summary.bytes_dropped += payload.len();

        let e = io::Error::new(io::ErrorKind::NotConnected, "connection was closed after a failed write");
        self.observer.packet_dropped(Severity::Debug, self.failures, payload.len(), payload.lines(), &e);
    }

    fn close(&mut self) {
        if let Err(e) = self.connection.close() {
            debug!(transport = self.connection.transport_id(), error = %e, "Failed to close connection.");
        }
    }
}

/// A single report cycle over an open connection.
///
/// Dropping a cycle discards any lines that were not flushed yet and closes the connection. Use [`Cycle::finish`] to
/// flush the remaining lines first.
///
/// Over a stream transport, a failed write may have left part of a payload on the wire. The connection is closed right
/// away in that case, and every later payload in the cycle is dropped rather than written after a partial line.
pub struct Cycle<'a> {
    transport: &'a mut Transport,
    summary: CycleSummary,
    last_error: Option<io::Error>,
    open: bool,
}

impl Cycle<'_> {
    /// Appends a line, sending the current payload first if the line does not fit in it.
    pub fn append(&mut self, line: &EncodedLine) {
        if let Some(payload) = self.transport.writer.append(line) {
            self.send(&payload);
        }
    }

    /// Sends whatever has been appended since the last send.
    ///
    /// Does nothing if no lines are pending.
    pub fn flush(&mut self) {
        if let Some(payload) = self.transport.writer.take() {
            self.send(&payload);
        }
    }

    fn send(&mut self, payload: &Payload) {
        if !self.open {
            self.transport.discard(payload, &mut self.summary);
            return;
        }

        if let Err(e) = self.transport.send(payload, &mut self.summary) {
            if self.transport.stream {
                self.close();
            }
            self.last_error = Some(e);
        }
    }

    fn close(&mut self) {
        if std::mem::take(&mut self.open) {
            self.transport.close();
        }
    }

    /// Flushes any pending lines, closes the connection and returns the totals for the cycle.
    ///
    /// # Errors
    ///
    /// If any payload failed to send during the cycle, an error is returned with the number of payloads and lines that
    /// were dropped, along with the last I/O error.
    pub fn finish(mut self) -> Result<CycleSummary, TransportError> {
        self.flush();

        let summary = self.summary;
        let last_error = self.last_error.take();
        drop(self);

        match last_error {
            None => Ok(summary),
            Some(source) => Err(TransportError::Send {
                packets_dropped: summary.packets_dropped,
                lines_dropped: summary.lines_dropped,
                source,
            }),
        }
    }
}

impl Drop for Cycle<'_> {
    fn drop(&mut self) {
        if !self.transport.writer.is_empty() {
            debug!(
                lines = self.transport.writer.lines(),
                bytes = self.transport.writer.len(),
                "Discarding lines that were never flushed."
            );
            self.transport.writer.clear();
        }

        self.close();
    }
}
