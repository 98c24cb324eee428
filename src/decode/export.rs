//! Purpose: Decode newline-delimited JSON export rows into result batches.
//! Exports: `ExportDecoder`.
//! Role: Concrete `BatchDecoder` for search export streams (preview + final batches).
//! Invariants: A batch ends at the row carrying `"lastrow": true`; nothing past it is consumed.
//! Invariants: Cut-off rows are `Truncated`; complete but malformed rows are `Format`.
use super::{object_record, snippet};
use crate::core::batch::{BatchDecoder, BatchInfo, BatchStart};
use crate::core::error::{Error, ErrorKind};
use crate::core::record::Record;
use crate::core::stream::{ResultStream, Segment};
use bstr::ByteSlice;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Default)]
pub struct ExportDecoder {
    pending: Option<ExportRow>,
    finished: bool,
    rows: u64,
}

#[derive(Debug, Deserialize)]
struct ExportRow {
    #[serde(default)]
    preview: bool,
    #[serde(default)]
    lastrow: bool,
    #[serde(default)]
    fields: Option<Vec<FieldDecl>>,
    #[serde(default)]
    result: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FieldDecl {
    Name(String),
    Object { name: String },
}

impl FieldDecl {
    fn into_name(self) -> String {
        match self {
            FieldDecl::Name(name) | FieldDecl::Object { name } => name,
        }
    }
}

impl ExportDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_row(&mut self, stream: &mut ResultStream) -> Result<ExportRow, Error> {
        loop {
            let Some(line) = stream.read_line()? else {
                return Err(stream
                    .truncated_error("export batch ended before its last row")
                    .with_record(self.rows + 1));
            };
            if line.bytes.trim().is_empty() {
                if line.terminated {
                    continue;
                }
                return Err(stream
                    .truncated_error("export batch ended before its last row")
                    .with_record(self.rows + 1));
            }
            return self.parse_row(&line);
        }
    }

    fn parse_row(&self, line: &Segment) -> Result<ExportRow, Error> {
        serde_json::from_slice::<ExportRow>(&line.bytes).map_err(|err| {
            let (kind, message) = if line.terminated {
                (ErrorKind::Format, "invalid export row")
            } else {
                (ErrorKind::Truncated, "export row cut short")
            };
            Error::new(kind)
                .with_message(format!("{message}: {}", snippet(&line.bytes, 48)))
                .with_record(self.rows + 1)
                .with_offset(line.offset)
                .with_source(err)
        })
    }
}

impl BatchDecoder for ExportDecoder {
    fn format(&self) -> &'static str {
        "export"
    }

    fn begin(&mut self, stream: &mut ResultStream) -> Result<BatchStart, Error> {
        if !stream.skip_whitespace()? {
            return Ok(BatchStart::EndOfStream);
        }
        if stream.peek_byte()? != Some(b'{') {
            let head = snippet(stream.fill_to(16)?, 16);
            return Err(stream
                .format_error(format!("expected an export row, found {head}"))
                .with_hint("Export rows are JSON objects, one per line."));
        }
        let mut row = self.read_row(stream)?;
        let info = BatchInfo {
            preview: row.preview,
            fields: row
                .fields
                .take()
                .unwrap_or_default()
                .into_iter()
                .map(FieldDecl::into_name)
                .collect(),
            index: 0,
        };
        self.pending = Some(row);
        Ok(BatchStart::Batch(info))
    }

    fn next_record(&mut self, stream: &mut ResultStream) -> Result<Option<Record>, Error> {
        if self.finished {
            return Ok(None);
        }
        let row = match self.pending.take() {
            Some(row) => row,
            None => self.read_row(stream)?,
        };
        self.rows += 1;
        if row.lastrow {
            self.finished = true;
        }
        match row.result {
            Some(result) => Ok(Some(object_record(result))),
            None if row.lastrow => Ok(None),
            None => Err(stream
                .format_error("export row has no result")
                .with_record(self.rows)),
        }
    }
}
