//! Purpose: Bundled result encodings and per-batch format detection.
//! Exports: `Format`, `AnyDecoder`, `DecoderFactory`, `FormatSets`, `ExportDecoder`, `SeqDecoder`.
//! Role: Plugs concrete wire formats into the format-agnostic batch reader.
//! Invariants: Auto detection is deterministic and looks only at the first non-whitespace byte.
//! Invariants: Detection happens per batch, so each batch of a stream may use its own encoding.
use crate::core::batch::{BatchDecoder, BatchStart};
use crate::core::error::{Error, ErrorKind};
use crate::core::record::Record;
use crate::core::sets::ResultSets;
use crate::core::stream::ResultStream;
use bstr::ByteSlice;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

pub mod export;
pub mod seq;

pub use export::ExportDecoder;
pub use seq::{RECORD_SEPARATOR, SeqDecoder};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Format {
    #[default]
    Auto,
    Export,
    Seq,
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Auto => "auto",
            Format::Export => "export",
            Format::Seq => "seq",
        }
    }

    /// Fresh decoder for one batch.
    pub fn decoder(self) -> AnyDecoder {
        AnyDecoder::Pending(self)
    }

    /// Nameable per-batch decoder factory for `ResultSets`.
    pub fn factory(self) -> DecoderFactory {
        match self {
            Format::Auto => || AnyDecoder::Pending(Format::Auto),
            Format::Export => || AnyDecoder::Pending(Format::Export),
            Format::Seq => || AnyDecoder::Pending(Format::Seq),
        }
    }
}

pub type DecoderFactory = fn() -> AnyDecoder;

/// Result sets decoded with one of the bundled formats.
pub type FormatSets = ResultSets<AnyDecoder, DecoderFactory>;

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "auto" => Ok(Format::Auto),
            "export" | "json" => Ok(Format::Export),
            "seq" => Ok(Format::Seq),
            other => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unknown result format '{other}'"))
                .with_hint("Use one of: auto, export, seq.")),
        }
    }
}

#[derive(Debug)]
pub enum AnyDecoder {
    Pending(Format),
    Export(ExportDecoder),
    Seq(SeqDecoder),
}

impl BatchDecoder for AnyDecoder {
    fn format(&self) -> &'static str {
        match self {
            AnyDecoder::Pending(format) => format.as_str(),
            AnyDecoder::Export(decoder) => decoder.format(),
            AnyDecoder::Seq(decoder) => decoder.format(),
        }
    }

    fn begin(&mut self, stream: &mut ResultStream) -> Result<BatchStart, Error> {
        if let AnyDecoder::Pending(format) = *self {
            let resolved = match format {
                Format::Auto => {
                    if !stream.skip_whitespace()? {
                        return Ok(BatchStart::EndOfStream);
                    }
                    sniff(stream)?
                }
                other => other,
            };
            *self = match resolved {
                Format::Seq => AnyDecoder::Seq(SeqDecoder::new()),
                Format::Export | Format::Auto => AnyDecoder::Export(ExportDecoder::new()),
            };
        }
        match self {
            AnyDecoder::Export(decoder) => decoder.begin(stream),
            AnyDecoder::Seq(decoder) => decoder.begin(stream),
            AnyDecoder::Pending(_) => Err(Error::new(ErrorKind::Internal)
                .with_message("result decoder was not resolved")),
        }
    }

    fn next_record(&mut self, stream: &mut ResultStream) -> Result<Option<Record>, Error> {
        match self {
            AnyDecoder::Export(decoder) => decoder.next_record(stream),
            AnyDecoder::Seq(decoder) => decoder.next_record(stream),
            AnyDecoder::Pending(_) => Err(Error::new(ErrorKind::Internal)
                .with_message("result decoder used before a batch started")),
        }
    }
}

fn sniff(stream: &mut ResultStream) -> Result<Format, Error> {
    match stream.peek_byte()? {
        Some(RECORD_SEPARATOR) => Ok(Format::Seq),
        Some(b'{') => Ok(Format::Export),
        _ => {
            let head = snippet(stream.fill_to(16)?, 16);
            Err(stream
                .format_error(format!("unrecognized result batch start: {head}"))
                .with_hint("Expected JSON export rows or a 0x1E framed sequence."))
        }
    }
}

/// Converts a decoded JSON object into a record; arrays become multi-valued fields.
pub(crate) fn object_record(object: Map<String, Value>) -> Record {
    let mut builder = Record::builder();
    for (name, value) in object {
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = value_text(item) {
                        builder.push(name.as_str(), text);
                    }
                }
            }
            other => {
                if let Some(text) = value_text(other) {
                    builder.push(name, text);
                }
            }
        }
    }
    builder.build()
}

fn value_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        nested => Some(nested.to_string()),
    }
}

pub(crate) fn snippet(bytes: &[u8], max: usize) -> String {
    let text = bytes.to_str_lossy();
    let text = text.trim_end();
    if text.len() <= max {
        return format!("{text:?}");
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{:?}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::{AnyDecoder, Format, object_record, snippet};
    use crate::core::batch::BatchDecoder;
    use crate::core::error::ErrorKind;
    use crate::core::sets::ResultSets;
    use serde_json::json;

    #[test]
    fn format_parses_cli_names() {
        assert_eq!("auto".parse::<Format>().expect("auto"), Format::Auto);
        assert_eq!("json".parse::<Format>().expect("json"), Format::Export);
        assert_eq!("seq".parse::<Format>().expect("seq"), Format::Seq);
        let err = "xml".parse::<Format>().expect_err("xml");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn auto_detects_each_batch_independently() {
        let input = concat!(
            "{\"preview\":true,\"lastrow\":true,\"result\":{\"a\":\"1\"}}\n",
            "\x1e{\"batch\":{}}\n\x1e{\"result\":{\"a\":\"2\"}}\n\x1e{\"end\":{\"count\":1}}\n",
        );
        let mut sets = ResultSets::open(input.as_bytes(), || Format::Auto.decoder()).expect("sets");
        let mut formats = Vec::new();
        while let Some(set) = sets.next_set().expect("next") {
            assert_eq!(set.by_ref().count(), 1);
            formats.push(set.info().index);
        }
        assert_eq!(formats, vec![0, 1]);
    }

    #[test]
    fn auto_rejects_unknown_start() {
        let err = ResultSets::open(&b"<?xml version='1.0'?>"[..], || Format::Auto.decoder())
            .err()
            .expect("format");
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.hint().is_some());
    }

    #[test]
    fn pending_decoder_reports_requested_format() {
        assert_eq!(Format::Seq.decoder().format(), "seq");
        assert!(matches!(Format::Export.decoder(), AnyDecoder::Pending(Format::Export)));
        let make = Format::Export.factory();
        assert_eq!(make().format(), "export");
    }

    #[test]
    fn object_values_are_stringified() {
        let value = json!({"n": 3, "ok": true, "none": null, "tags": ["a", 1], "obj": {"k": "v"}});
        let serde_json::Value::Object(map) = value else {
            panic!("object");
        };
        let record = object_record(map);
        assert_eq!(record.first("n"), Some("3"));
        assert_eq!(record.first("ok"), Some("true"));
        assert!(record.get("none").is_none());
        assert_eq!(record.get("tags").unwrap(), ["a", "1"]);
        assert_eq!(record.first("obj"), Some(r#"{"k":"v"}"#));
    }

    #[test]
    fn snippet_truncates_long_input() {
        assert_eq!(snippet(b"abc\n", 8), "\"abc\"");
        assert!(snippet(b"abcdefghijklmnop", 4).ends_with("..."));
    }
}
