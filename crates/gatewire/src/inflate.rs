//! Inflate pipeline for `zlib-stream` connections.
//!
//! The gateway compresses the whole connection as one zlib stream and sync
//! flushes at the end of every message, so each message ends with
//! [`ZLIB_SUFFIX`]. The decompressor state (window, partial blocks) and two
//! carry-over buffers live here:
//!
//! - `utf8_carry`: trailing bytes of a multi-byte character split across frames
//! - `pending`: text of a message whose final frame has not arrived yet
//!
//! Nothing here is reset while the connection is open. A new connection gets a
//! new [`InflatePipeline`].

use std::mem;

use flate2::{Decompress, FlushDecompress, Status};
use gatewire_proto::ZLIB_SUFFIX;
use tracing::trace;

use crate::error::{GatewayError, GatewayResult};

/// Output buffer growth step.
const OUTPUT_CHUNK: usize = 32 * 1024;

/// Stateful decompressor for one connection.
pub struct InflatePipeline {
    decompress: Decompress,
    utf8_carry: Vec<u8>,
    pending: String,
    discarding: bool,
    finished: bool,
}

impl InflatePipeline {
    /// Create a pipeline expecting a zlib header on the first fragment.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            utf8_carry: Vec::new(),
            pending: String::new(),
            discarding: false,
            finished: false,
        }
    }

    /// Total compressed bytes consumed since the connection opened.
    #[must_use]
    pub fn total_in(&self) -> u64 {
        self.decompress.total_in()
    }

    /// Total bytes produced since the connection opened.
    #[must_use]
    pub fn total_out(&self) -> u64 {
        self.decompress.total_out()
    }

    /// Decompress one fragment of the stream.
    ///
    /// Returns every complete character produced by this fragment. A character
    /// cut by the fragment boundary is held back and prefixed to the next call.
    ///
    /// # Errors
    ///
    /// [`GatewayError::StreamCorrupted`] if the compressed data is invalid. The
    /// pipeline must not be used afterwards. [`GatewayError::MalformedPayload`]
    /// if the decompressed bytes are not UTF-8; the stream itself stays usable.
    pub fn inflate(&mut self, fragment: &[u8]) -> GatewayResult<String> {
        if self.finished && !fragment.is_empty() {
            return Err(GatewayError::StreamCorrupted(
                "data after end of compressed stream".to_string(),
            ));
        }

        let mut inflated = Vec::with_capacity(fragment.len().saturating_mul(2).max(64));
        let mut input = fragment;

        loop {
            if inflated.len() == inflated.capacity() {
                inflated.reserve(OUTPUT_CHUNK);
            }

            let in_before = self.decompress.total_in();
            let out_before = self.decompress.total_out();
            let status = self
                .decompress
                .decompress_vec(input, &mut inflated, FlushDecompress::Sync)
                .map_err(|e| GatewayError::StreamCorrupted(e.to_string()))?;

            let consumed = usize::try_from(self.decompress.total_in() - in_before)
                .map_or(input.len(), |n| n.min(input.len()));
            let produced = self.decompress.total_out() - out_before;
            input = &input[consumed..];

            if status == Status::StreamEnd {
                self.finished = true;
                break;
            }
            if input.is_empty() && inflated.len() < inflated.capacity() {
                break;
            }
            if consumed == 0 && produced == 0 {
                break;
            }
        }

        if !input.is_empty() {
            return Err(GatewayError::StreamCorrupted(format!(
                "{} bytes could not be inflated",
                input.len()
            )));
        }

        trace!(
            compressed = fragment.len(),
            inflated = inflated.len(),
            "inflated fragment"
        );
        self.take_text(inflated)
    }

    /// Feed one binary frame and return the message it completes, if any.
    ///
    /// Frames that do not end with [`ZLIB_SUFFIX`] are inflated immediately and
    /// their text is buffered until the message's final frame arrives.
    ///
    /// # Errors
    ///
    /// Same as [`inflate`](Self::inflate). After a `MalformedPayload` error the
    /// rest of the affected message is dropped and the next message decodes
    /// normally.
    pub fn feed(&mut self, frame: &[u8]) -> GatewayResult<Option<String>> {
        let ends_message = frame.ends_with(&ZLIB_SUFFIX);

        let text = match self.inflate(frame) {
            Ok(text) => text,
            Err(GatewayError::MalformedPayload(reason)) => {
                self.pending.clear();
                self.utf8_carry.clear();
                self.discarding = !ends_message;
                return Err(GatewayError::MalformedPayload(reason));
            }
            Err(e) => return Err(e),
        };

        if self.discarding {
            if ends_message {
                self.discarding = false;
                self.utf8_carry.clear();
            }
            return Ok(None);
        }

        self.pending.push_str(&text);

        if !ends_message {
            return Ok(None);
        }

        if !self.utf8_carry.is_empty() {
            self.utf8_carry.clear();
            self.pending.clear();
            return Err(GatewayError::MalformedPayload(
                "message ends inside a UTF-8 sequence".to_string(),
            ));
        }

        Ok(Some(mem::take(&mut self.pending)))
    }

    fn take_text(&mut self, inflated: Vec<u8>) -> GatewayResult<String> {
        let bytes = if self.utf8_carry.is_empty() {
            inflated
        } else {
            let mut bytes = mem::take(&mut self.utf8_carry);
            bytes.extend_from_slice(&inflated);
            bytes
        };

        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(e) => {
                let utf8_error = e.utf8_error();
                if utf8_error.error_len().is_some() {
                    return Err(GatewayError::MalformedPayload(utf8_error.to_string()));
                }
                let mut bytes = e.into_bytes();
                self.utf8_carry = bytes.split_off(utf8_error.valid_up_to());
                String::from_utf8(bytes)
                    .map_err(|e| GatewayError::MalformedPayload(e.utf8_error().to_string()))
            }
        }
    }
}

impl Default for InflatePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InflatePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InflatePipeline")
            .field("total_in", &self.total_in())
            .field("total_out", &self.total_out())
            .field("carried_bytes", &self.utf8_carry.len())
            .field("pending_chars", &self.pending.len())
            .field("finished", &self.finished)
            .finish()
    }
}

/// Test helpers for producing `zlib-stream` frames.
#[cfg(test)]
pub(crate) mod testing {
    use flate2::{Compress, Compression, FlushCompress};

    /// Compress `messages` as one zlib stream, sync flushing after each one.
    pub fn deflate_messages(messages: &[&str]) -> Vec<Vec<u8>> {
        let mut compress = Compress::new(Compression::default(), true);
        messages
            .iter()
            .map(|message| {
                let mut input = message.as_bytes();
                let mut out = Vec::with_capacity(message.len() + 64);
                loop {
                    if out.len() == out.capacity() {
                        out.reserve(1024);
                    }
                    let before = compress.total_in();
                    compress
                        .compress_vec(input, &mut out, FlushCompress::Sync)
                        .expect("compress");
                    let consumed = (compress.total_in() - before) as usize;
                    input = &input[consumed..];
                    if input.is_empty() && out.len() < out.capacity() {
                        break;
                    }
                }
                out
            })
            .collect()
    }
}
