//! Purpose: Decode record-separator framed JSON sequences into result batches.
//! Exports: `SeqDecoder`, `RECORD_SEPARATOR`.
//! Role: Concrete `BatchDecoder` for framed streams with explicit batch headers and footers.
//! Invariants: Every frame starts with 0x1E and ends at a newline; a batch is `batch` frame,
//! `result` frames, then an `end` frame.
//! Invariants: Nothing past the `end` frame's newline is consumed.
//! Invariants: The `end` frame count must match the number of `result` frames decoded.
use super::{object_record, snippet};
use crate::core::batch::{BatchDecoder, BatchInfo, BatchStart};
use crate::core::error::{Error, ErrorKind};
use crate::core::record::Record;
use crate::core::stream::{ResultStream, Segment};
use bstr::ByteSlice;
use serde::Deserialize;
use serde_json::{Map, Value};

pub const RECORD_SEPARATOR: u8 = 0x1e;

#[derive(Debug, Default)]
pub struct SeqDecoder {
    records: u64,
    finished: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Frame {
    Batch(Header),
    Result(Map<String, Value>),
    End(Footer),
}

#[derive(Debug, Default, Deserialize)]
struct Header {
    #[serde(default)]
    preview: bool,
    #[serde(default)]
    fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Footer {
    count: u64,
}

impl SeqDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_frame(&self, stream: &mut ResultStream) -> Result<Frame, Error> {
        loop {
            if !stream.skip_whitespace()? {
                return Err(stream
                    .truncated_error("sequence batch ended before its end frame")
                    .with_record(self.records + 1));
            }
            let Some(mut frame) = stream.read_frame(RECORD_SEPARATOR)? else {
                let head = snippet(stream.fill_to(16)?, 16);
                return Err(stream
                    .format_error(format!("expected a record separator, found {head}"))
                    .with_record(self.records + 1));
            };
            if frame.bytes.trim().is_empty() {
                if frame.terminated {
                    continue;
                }
                return Err(stream
                    .truncated_error("sequence batch ended before its end frame")
                    .with_record(self.records + 1));
            }
            loop {
                let err = match serde_json::from_slice::<Frame>(&frame.bytes) {
                    Ok(parsed) => return Ok(parsed),
                    Err(err) => err,
                };
                if !err.is_eof() {
                    return Err(self.frame_error(ErrorKind::Format, &frame, err));
                }
                match stream.peek_byte()? {
                    None => return Err(self.frame_error(ErrorKind::Truncated, &frame, err)),
                    Some(RECORD_SEPARATOR) => {
                        return Err(self.frame_error(ErrorKind::Format, &frame, err));
                    }
                    // Pretty-printed text: the frame continues on the next line.
                    Some(_) => self.extend_frame(stream, &mut frame)?,
                }
            }
        }
    }

    fn extend_frame(&self, stream: &mut ResultStream, frame: &mut Segment) -> Result<(), Error> {
        let Some(line) = stream.read_line()? else {
            return Ok(());
        };
        frame.bytes.push(b'\n');
        frame.bytes.extend_from_slice(&line.bytes);
        frame.terminated = line.terminated;
        if frame.bytes.len() > stream.config().max_record_bytes {
            return Err(stream
                .format_error("record exceeds size limit")
                .with_record(self.records + 1));
        }
        Ok(())
    }

    fn frame_error(&self, kind: ErrorKind, frame: &Segment, err: serde_json::Error) -> Error {
        let message = match kind {
            ErrorKind::Truncated => "sequence frame cut short",
            _ => "invalid sequence frame",
        };
        Error::new(kind)
            .with_message(format!("{message}: {}", snippet(&frame.bytes, 48)))
            .with_record(self.records + 1)
            .with_offset(frame.offset)
            .with_source(err)
    }
}

impl BatchDecoder for SeqDecoder {
    fn format(&self) -> &'static str {
        "seq"
    }

    fn begin(&mut self, stream: &mut ResultStream) -> Result<BatchStart, Error> {
        if !stream.skip_whitespace()? {
            return Ok(BatchStart::EndOfStream);
        }
        if stream.peek_byte()? != Some(RECORD_SEPARATOR) {
            let head = snippet(stream.fill_to(16)?, 16);
            return Err(stream
                .format_error(format!("expected a record separator, found {head}"))
                .with_hint("Sequence batches start with 0x1E followed by a batch frame."));
        }
        let offset = stream.consumed();
        match self.read_frame(stream)? {
            Frame::Batch(header) => Ok(BatchStart::Batch(BatchInfo {
                preview: header.preview,
                fields: header.fields,
                index: 0,
            })),
            Frame::Result(_) | Frame::End(_) => Err(Error::new(ErrorKind::Format)
                .with_message("sequence batch must open with a batch frame")
                .with_offset(offset)),
        }
    }

    fn next_record(&mut self, stream: &mut ResultStream) -> Result<Option<Record>, Error> {
        if self.finished {
            return Ok(None);
        }
        let offset = stream.consumed();
        match self.read_frame(stream)? {
            Frame::Result(result) => {
                self.records += 1;
                Ok(Some(object_record(result)))
            }
            Frame::End(footer) => {
                if footer.count != self.records {
                    return Err(Error::new(ErrorKind::Format)
                        .with_message(format!(
                            "end frame declares {} records but {} were decoded",
                            footer.count, self.records
                        ))
                        .with_offset(offset));
                }
                self.finished = true;
                Ok(None)
            }
            Frame::Batch(_) => Err(Error::new(ErrorKind::Format)
                .with_message("batch frame inside an open batch")
                .with_record(self.records + 1)
                .with_offset(offset)),
        }
    }
}
