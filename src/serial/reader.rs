//! Inbound side of the link: line reassembly, response decoding and the read loop
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;

use super::interface::BoxedReader;
use super::link::LinkShared;
use super::types::{ConnectionState, ResponseRecord, ResponseStatus};
use super::TransportError;

// Carry-over for a line that never terminates is cut back to its newest bytes
const MAX_PARTIAL_BYTES: usize = 8192;
const KEEP_PARTIAL_BYTES: usize = 4096;

#[derive(Debug, Deserialize)]
struct WireResponse {
    status: ResponseStatus,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Parse a structured `{status, data?, message?}` line
pub fn parse_response(line: &str) -> Option<ResponseRecord> {
    let wire: WireResponse = serde_json::from_str(line.trim()).ok()?;
    Some(ResponseRecord {
        status: wire.status,
        payload: wire.data,
        message: wire.message,
        timestamp: chrono::Utc::now(),
        sequence: 0,
    })
}

/// Decode one line; anything that is not a structured response becomes raw data
pub fn decode_line(line: &str) -> ResponseRecord {
    parse_response(line).unwrap_or_else(|| ResponseRecord::raw(line))
}

/// Lines completed by one chunk of input
#[derive(Debug, Default)]
pub struct DecodedChunk {
    pub lines: Vec<String>,
    pub utf8_errors: u64,
    pub trimmed: bool,
}

/// Splits a byte stream into non-blank lines, carrying partial lines across reads
#[derive(Debug, Default)]
pub struct LineDecoder {
    partial: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> DecodedChunk {
        let mut decoded = DecodedChunk::default();
        self.partial.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(pos) = self.partial[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            if let Some(line) = Self::line_text(&self.partial[start..end], &mut decoded.utf8_errors) {
                decoded.lines.push(line);
            }
            start = end + 1;
        }
        self.partial.drain(..start);

        if self.partial.len() > MAX_PARTIAL_BYTES {
            let cut = self.partial.len() - KEEP_PARTIAL_BYTES;
            self.partial.drain(..cut);
            decoded.trimmed = true;
        }

        decoded
    }

    /// Flush an unterminated trailing line, if any
    pub fn finish(&mut self) -> DecodedChunk {
        let rest = std::mem::take(&mut self.partial);
        let mut decoded = DecodedChunk::default();
        if let Some(line) = Self::line_text(&rest, &mut decoded.utf8_errors) {
            decoded.lines.push(line);
        }
        decoded
    }

    fn line_text(raw: &[u8], utf8_errors: &mut u64) -> Option<String> {
        let text = match std::str::from_utf8(raw) {
            Ok(s) => s.to_string(),
            Err(_) => {
                *utf8_errors += 1;
                String::from_utf8_lossy(raw).into_owned()
            }
        };
        if text.trim().is_empty() {
            None
        } else {
            Some(text.trim_end_matches('\r').to_string())
        }
    }
}

/// Read loop for one connection. Exits when the link leaves `Connected`
/// or the stream faults; never reconnects.
pub(crate) async fn reader_task(
    mut reader: BoxedReader,
    shared: Arc<LinkShared>,
    mut state_rx: watch::Receiver<ConnectionState>,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size];
    let mut decoder = LineDecoder::new();

    loop {
        if *state_rx.borrow_and_update() != ConnectionState::Connected {
            break;
        }

        let read = tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                let tail = decoder.finish();
                shared.update_metrics(|m| m.utf8_decode_errors += tail.utf8_errors);
                for line in &tail.lines {
                    process_line(&shared, line);
                }
                if *state_rx.borrow() == ConnectionState::Connected {
                    shared.report_fault(TransportError::StreamClosed);
                }
                break;
            }
            Ok(n) => {
                let chunk = decoder.push(&buf[..n]);
                shared.update_metrics(|m| {
                    m.bytes_read += n as u64;
                    m.utf8_decode_errors += chunk.utf8_errors;
                    if chunk.trimmed {
                        m.partial_buffer_trims += 1;
                    }
                });
                for line in &chunk.lines {
                    process_line(&shared, line);
                }
            }
            Err(e) => {
                if *state_rx.borrow() == ConnectionState::Connected {
                    shared.report_fault(TransportError::ReadFailed(e.to_string()));
                }
                break;
            }
        }
    }

    log::debug!("Read loop finished");
}

fn process_line(shared: &LinkShared, line: &str) {
    let record = match parse_response(line) {
        Some(record) => {
            shared.update_metrics(|m| m.lines_read += 1);
            record
        }
        None => {
            log::debug!("Unstructured line from firmware: {}", line.trim());
            shared.update_metrics(|m| {
                m.lines_read += 1;
                m.demoted_lines += 1;
            });
            ResponseRecord::raw(line)
        }
    };
    shared.dispatch_record(record);
}
