use bytes::{Bytes, BytesMut};

use crate::encoder::EncodedLine;

/// The smallest line that is still valid StatsD.
pub(crate) const SMALLEST_VALID_PAYLOAD: &[u8] = b"a:0|c";

/// A finished payload, ready to be sent as a single datagram or stream write.
#[derive(Debug)]
pub(crate) struct Payload {
    buf: Bytes,
    lines: usize,
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn lines(&self) -> usize {
        self.lines
    }
}

/// Writes lines into larger payloads for more efficient network I/O.
///
/// StatsD lines are newline delimited, which means that multiple lines can be sent in a single payload and then
/// trivially split apart by the remote server. This saves on the number of system calls required to send a snapshot.
///
/// A maximum payload length must be specified. When appending a line would push the current payload over that length,
/// the current payload is finished and handed back to the caller first, and the line starts a new payload. A line that
/// is longer than the maximum by itself is never dropped: it ends up alone in its own payload.
///
/// For datagram transports, lines are only separated by a newline, with no trailing newline. For stream transports,
/// every line is terminated by a newline, and the terminator counts towards the payload length.
pub(crate) struct PayloadWriter {
    max_payload_len: usize,
    buf: BytesMut,
    lines: usize,
    terminate_lines: bool,
}

impl PayloadWriter {
    /// Creates a new `PayloadWriter` with the given maximum payload length.
    pub fn new(max_payload_len: usize, terminate_lines: bool) -> Self {
        // NOTE: This should also be handled during configuration validation, but we want to double check here that
        // we're getting a properly sanitized value.
        assert!(
            max_payload_len >= SMALLEST_VALID_PAYLOAD.len(),
            "maximum payload length is too small to allow any metrics to be written (must be {} or greater)",
            SMALLEST_VALID_PAYLOAD.len()
        );

        Self { max_payload_len, buf: BytesMut::with_capacity(max_payload_len), lines: 0, terminate_lines }
    }

    /// Returns the number of bytes in the current payload.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if no lines have been appended since the last payload was taken.
    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    /// Returns the number of lines in the current payload.
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Returns the length the current payload would have after appending a line of `line_len` bytes.
    fn len_with(&self, line_len: usize) -> usize {
        if self.terminate_lines {
            self.buf.len() + line_len + 1
        } else if self.is_empty() {
            line_len
        } else {
            self.buf.len() + 1 + line_len
        }
    }

    /// Appends a line to the current payload.
    ///
    /// If the line would not fit in the current payload, the current payload is finished and returned, and the line
    /// is written to a fresh payload. The returned payload must be sent before any payload taken afterwards, in order
    /// to preserve line ordering.
    pub fn append(&mut self, line: &EncodedLine) -> Option<Payload> {
        let finished = if !self.is_empty() && self.len_with(line.len()) > self.max_payload_len {
            self.take()
        } else {
            None
        };

        if !self.terminate_lines && !self.is_empty() {
            self.buf.extend_from_slice(b"\n");
        }
        self.buf.extend_from_slice(line.as_bytes());
        if self.terminate_lines {
            self.buf.extend_from_slice(b"\n");
        }
        self.lines += 1;

        finished
    }

    /// Finishes the current payload and returns it.
    ///
    /// If no lines have been appended since the last payload was taken, `None` is returned.
    pub fn take(&mut self) -> Option<Payload> {
        if self.is_empty() {
            return None;
        }

        let lines = std::mem::take(&mut self.lines);

        // `split` hands back everything written so far while keeping the remaining capacity around for the next
        // payload.
        Some(Payload { buf: self.buf.split().freeze(), lines })
    }

    /// Discards the current payload without returning it.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.lines = 0;
    }
}
