// Single-batch result reader over a shared, hand-off capable stream.
use crate::core::error::{Error, ErrorKind};
use crate::core::record::Record;
use crate::core::stream::ResultStream;
use std::io::Read;
use tracing::{debug, trace};

/// Format-specific decoding of one batch at a time.
///
/// A decoder is created fresh for every batch. `begin` is called once with the
/// stream positioned at a candidate batch start; `next_record` is then called
/// until it returns `None`, which must only happen after the batch footer has
/// been consumed. Bytes past the footer may sit in the stream's lookahead
/// buffer but must not be consumed.
pub trait BatchDecoder {
    fn format(&self) -> &'static str;

    fn begin(&mut self, stream: &mut ResultStream) -> Result<BatchStart, Error>;

    fn next_record(&mut self, stream: &mut ResultStream) -> Result<Option<Record>, Error>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BatchStart {
    Batch(BatchInfo),
    /// Nothing but whitespace remains in the stream.
    EndOfStream,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BatchInfo {
    pub preview: bool,
    pub fields: Vec<String>,
    /// Zero-based position of the batch within the stream; assigned by the reader.
    pub index: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum State {
    Open,
    Done,
    Failed(ErrorKind),
    Closed,
}

/// Reads the records of exactly one batch.
///
/// The reader owns the stream until it is closed, dropped, or retired by
/// [`BatchReader::hand_off`], which moves the stream (and its lookahead) into a
/// successor reader for the next batch.
pub struct BatchReader<D> {
    decoder: D,
    stream: Option<ResultStream>,
    info: BatchInfo,
    peeked: Option<Record>,
    state: State,
    records: u64,
    started: bool,
    released_at: u64,
    yielded_error: bool,
}

enum Started<D> {
    Batch(BatchReader<D>),
    End(D, ResultStream),
}

impl<D: BatchDecoder> BatchReader<D> {
    pub fn open<R>(decoder: D, reader: R) -> Result<Self, Error>
    where
        R: Read + Send + 'static,
    {
        Self::bind(decoder, ResultStream::new(reader))
    }

    /// Binds to a stream positioned at a batch start. An empty stream yields a
    /// reader with no records.
    pub fn bind(decoder: D, stream: ResultStream) -> Result<Self, Error> {
        match start(decoder, stream, 0)? {
            Started::Batch(reader) => Ok(reader),
            Started::End(decoder, stream) => Ok(Self {
                decoder,
                released_at: stream.consumed(),
                stream: Some(stream),
                info: BatchInfo::default(),
                peeked: None,
                state: State::Done,
                records: 0,
                started: false,
                yielded_error: false,
            }),
        }
    }

    /// Starts the batch that follows `predecessor` on the same stream.
    ///
    /// Records the predecessor has not yielded yet are drained first. Returns
    /// `None` when the stream holds no further batch; the stream is released in
    /// that case.
    pub fn hand_off(decoder: D, mut predecessor: Self) -> Result<Option<Self>, Error> {
        match predecessor.state {
            State::Closed => return Err(closed_error()),
            State::Failed(kind) => return Err(predecessor.terminated_error(kind)),
            State::Open | State::Done => {}
        }
        while predecessor.next_record()?.is_some() {}
        let Some(stream) = predecessor.stream.take() else {
            return Err(closed_error());
        };
        let index = if predecessor.started {
            predecessor.info.index + 1
        } else {
            predecessor.info.index
        };
        debug!(
            from_batch = predecessor.info.index,
            offset = stream.consumed(),
            buffered = stream.buffered().len(),
            "handing off result stream"
        );
        match start(decoder, stream, index)? {
            Started::Batch(reader) => Ok(Some(reader)),
            Started::End(_, stream) => {
                debug!(offset = stream.consumed(), "result stream exhausted");
                Ok(None)
            }
        }
    }

    pub fn info(&self) -> &BatchInfo {
        &self.info
    }

    pub fn is_preview(&self) -> bool {
        self.info.preview
    }

    pub fn fields(&self) -> &[String] {
        &self.info.fields
    }

    pub fn records_read(&self) -> u64 {
        self.records
    }

    pub fn bytes_consumed(&self) -> u64 {
        self.stream
            .as_ref()
            .map_or(self.released_at, ResultStream::consumed)
    }

    /// False for a reader bound to a stream that held no batch at all.
    pub fn has_batch(&self) -> bool {
        self.started
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Whether another record can be produced without reading into the next batch.
    pub fn has_more_records(&mut self) -> Result<bool, Error> {
        match self.state {
            State::Closed => return Err(closed_error()),
            State::Failed(kind) => return Err(self.terminated_error(kind)),
            State::Done => return Ok(false),
            State::Open => {}
        }
        if self.peeked.is_some() {
            return Ok(true);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(closed_error());
        };
        match self.decoder.next_record(stream) {
            Ok(Some(record)) => {
                self.peeked = Some(record);
                Ok(true)
            }
            Ok(None) => {
                self.state = State::Done;
                debug!(
                    batch = self.info.index,
                    records = self.records,
                    offset = stream.consumed(),
                    "result batch finished"
                );
                Ok(false)
            }
            Err(err) => {
                self.state = State::Failed(err.kind());
                Err(err.with_batch(self.info.index))
            }
        }
    }

    /// Next record of the batch; `Ok(None)` at (and after) end of batch.
    pub fn next_record(&mut self) -> Result<Option<Record>, Error> {
        if !self.has_more_records()? {
            return Ok(None);
        }
        self.records += 1;
        trace!(batch = self.info.index, record = self.records, "record decoded");
        Ok(self.peeked.take())
    }

    /// Releases the stream. Safe to call repeatedly and at any point in a batch.
    pub fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        if let Some(stream) = self.stream.take() {
            self.released_at = stream.consumed();
            debug!(
                batch = self.info.index,
                offset = self.released_at,
                "closing result stream"
            );
        }
        self.peeked = None;
        self.state = State::Closed;
    }

    fn terminated_error(&self, kind: ErrorKind) -> Error {
        Error::new(kind)
            .with_message("result batch was terminated by an earlier error")
            .with_batch(self.info.index)
    }
}

impl<D: BatchDecoder> Iterator for BatchReader<D> {
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.yielded_error {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(err) => {
                self.yielded_error = true;
                Some(Err(err))
            }
        }
    }
}

fn start<D: BatchDecoder>(
    mut decoder: D,
    mut stream: ResultStream,
    index: usize,
) -> Result<Started<D>, Error> {
    let info = match decoder.begin(&mut stream) {
        Ok(BatchStart::Batch(info)) => info,
        Ok(BatchStart::EndOfStream) => return Ok(Started::End(decoder, stream)),
        Err(err) => return Err(err.with_batch(index)),
    };
    let info = BatchInfo { index, ..info };
    debug!(
        batch = index,
        format = decoder.format(),
        preview = info.preview,
        offset = stream.consumed(),
        "result batch started"
    );
    Ok(Started::Batch(BatchReader {
        decoder,
        released_at: stream.consumed(),
        stream: Some(stream),
        info,
        peeked: None,
        state: State::Open,
        records: 0,
        started: true,
        yielded_error: false,
    }))
}

pub(crate) fn closed_error() -> Error {
    Error::new(ErrorKind::Closed).with_message("result reader is closed")
}

#[cfg(test)]
mod tests {
    use super::BatchReader;
    use crate::core::error::ErrorKind;
    use crate::core::stream::{ResultStream, StreamConfig};
    use crate::core::testing::LineDecoder;

    fn open(input: &'static str) -> BatchReader<LineDecoder> {
        BatchReader::open(LineDecoder, input.as_bytes()).expect("bind")
    }

    #[test]
    fn yields_records_in_order_then_idempotent_end() {
        let mut reader = open("BEGIN\na=1\na=2;b=x\nEND\n");
        assert!(reader.has_more_records().expect("more"));
        let first = reader.next_record().expect("next").expect("record");
        assert_eq!(first.first("a"), Some("1"));
        let second = reader.next_record().expect("next").expect("record");
        assert_eq!(second.first("b"), Some("x"));
        assert!(reader.next_record().expect("next").is_none());
        assert!(reader.next_record().expect("next").is_none());
        assert!(!reader.has_more_records().expect("more"));
        assert_eq!(reader.records_read(), 2);
    }

    #[test]
    fn preview_flag_comes_from_header() {
        let reader = open("BEGIN preview\nEND\n");
        assert!(reader.is_preview());
        assert_eq!(reader.info().index, 0);
    }

    #[test]
    fn empty_stream_binds_with_no_records() {
        let mut reader = open("");
        assert!(!reader.has_more_records().expect("more"));
        assert!(reader.next_record().expect("next").is_none());
    }

    #[test]
    fn unrecognized_start_is_format_error() {
        let err = BatchReader::open(LineDecoder, &b"nope\n"[..])
            .err()
            .expect("bind error");
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(err.batch(), Some(0));
    }

    #[test]
    fn close_is_idempotent_and_blocks_reads() {
        let mut reader = open("BEGIN\na=1\na=2\na=3\nEND\n");
        assert!(reader.next_record().expect("next").is_some());
        reader.close();
        reader.close();
        assert!(reader.is_closed());
        let err = reader.next_record().expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::Closed);
        let err = reader.has_more_records().expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::Closed);
    }

    #[test]
    fn truncated_batch_reports_after_complete_records() {
        let mut reader = open("BEGIN\na=1\na=");
        assert_eq!(
            reader.next_record().expect("next").expect("record").first("a"),
            Some("1")
        );
        let err = reader.next_record().expect_err("truncated");
        assert_eq!(err.kind(), ErrorKind::Truncated);
        let again = reader.next_record().expect_err("still terminated");
        assert_eq!(again.kind(), ErrorKind::Truncated);
    }

    #[test]
    fn iterator_fuses_after_error() {
        let reader = open("BEGIN\na=1\nbroken\na=2\nEND\n");
        let items: Vec<_> = reader.collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(
            items[1].as_ref().expect_err("format").kind(),
            ErrorKind::Format
        );
    }

    #[test]
    fn hand_off_carries_lookahead_into_successor() {
        let input = "BEGIN\na=1\nEND\nBEGIN preview\na=2\nEND\n";
        let stream = ResultStream::new(input.as_bytes()).with_config(StreamConfig {
            read_chunk_bytes: 64,
            max_record_bytes: 1024,
        });
        let mut first = BatchReader::bind(LineDecoder, stream).expect("bind");
        assert!(first.next_record().expect("next").is_some());
        assert!(first.next_record().expect("next").is_none());

        let mut second = BatchReader::hand_off(LineDecoder, first)
            .expect("hand off")
            .expect("second batch");
        assert!(second.is_preview());
        assert_eq!(second.info().index, 1);
        assert_eq!(
            second.next_record().expect("next").expect("record").first("a"),
            Some("2")
        );
        assert!(second.next_record().expect("next").is_none());
        assert_eq!(second.bytes_consumed(), input.len() as u64);

        let end = BatchReader::hand_off(LineDecoder, second).expect("hand off");
        assert!(end.is_none());
    }

    #[test]
    fn hand_off_drains_unread_records() {
        let mut first = open("BEGIN\na=1\na=2\nEND\nBEGIN\na=3\nEND\n");
        assert!(first.next_record().expect("next").is_some());
        let mut second = BatchReader::hand_off(LineDecoder, first)
            .expect("hand off")
            .expect("second batch");
        assert_eq!(
            second.next_record().expect("next").expect("record").first("a"),
            Some("3")
        );
    }

    #[test]
    fn hand_off_from_closed_reader_fails() {
        let mut first = open("BEGIN\nEND\n");
        first.close();
        let err = BatchReader::hand_off(LineDecoder, first)
            .err()
            .expect("closed");
        assert_eq!(err.kind(), ErrorKind::Closed);
    }
}
