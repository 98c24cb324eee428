// Minimal line-oriented decoder used by core unit tests.
//
// Grammar: `BEGIN` or `BEGIN preview` opens a batch, each following line is a
// record of `key=value` pairs joined by `;`, and `END` closes the batch.
use crate::core::batch::{BatchDecoder, BatchInfo, BatchStart};
use crate::core::error::Error;
use crate::core::record::Record;
use crate::core::stream::ResultStream;
use bstr::ByteSlice;

pub(crate) struct LineDecoder;

impl BatchDecoder for LineDecoder {
    fn format(&self) -> &'static str {
        "lines"
    }

    fn begin(&mut self, stream: &mut ResultStream) -> Result<BatchStart, Error> {
        if !stream.skip_whitespace()? {
            return Ok(BatchStart::EndOfStream);
        }
        let Some(line) = stream.read_line()? else {
            return Ok(BatchStart::EndOfStream);
        };
        match line.bytes.as_slice() {
            b"BEGIN" => Ok(BatchStart::Batch(BatchInfo::default())),
            b"BEGIN preview" => Ok(BatchStart::Batch(BatchInfo {
                preview: true,
                ..BatchInfo::default()
            })),
            _ => Err(stream.format_error("expected BEGIN")),
        }
    }

    fn next_record(&mut self, stream: &mut ResultStream) -> Result<Option<Record>, Error> {
        let Some(line) = stream.read_line()? else {
            return Err(stream.truncated_error("missing END"));
        };
        if !line.terminated {
            return Err(stream.truncated_error("record cut short"));
        }
        if line.bytes == b"END" {
            return Ok(None);
        }
        let mut builder = Record::builder();
        for pair in line.bytes.to_str_lossy().split(';') {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(stream.format_error("expected key=value"));
            };
            builder.push(key, value);
        }
        Ok(Some(builder.build()))
    }
}
