// Forward-only buffered byte stream shared by successive batch readers.
use crate::core::error::{Error, ErrorKind};
use bstr::ByteSlice;
use std::fmt;
use std::io::{self, Read};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StreamConfig {
    pub read_chunk_bytes: usize,
    pub max_record_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_chunk_bytes: 8 * 1024,
            max_record_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Bytes of one delimited unit, as returned by [`ResultStream::read_line`]
/// and [`ResultStream::read_frame`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Segment {
    pub bytes: Vec<u8>,
    /// False when the unit ended at end of input rather than at its delimiter.
    pub terminated: bool,
    /// Stream offset of the first byte of the unit.
    pub offset: u64,
}

/// Owns the source reader plus every byte read ahead but not yet consumed.
///
/// A `ResultStream` moves from one batch reader to the next on hand-off, so
/// lookahead buffered while finishing one batch is seen by the next decoder.
pub struct ResultStream {
    source: Box<dyn Read + Send>,
    buf: Vec<u8>,
    pos: usize,
    consumed: u64,
    eof: bool,
    config: StreamConfig,
}

impl ResultStream {
    pub fn new<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self {
            source: Box::new(reader),
            buf: Vec::new(),
            pos: 0,
            consumed: 0,
            eof: false,
            config: StreamConfig::default(),
        }
    }

    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Number of bytes handed to decoders so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// True once the source is drained and nothing is left in the buffer.
    pub fn at_end(&self) -> bool {
        self.eof && self.pos == self.buf.len()
    }

    /// Ensures at least `n` bytes are buffered unless the source ends first.
    pub fn fill_to(&mut self, n: usize) -> Result<&[u8], Error> {
        while self.buf.len() - self.pos < n && !self.eof {
            self.fill_more()?;
        }
        Ok(self.buffered())
    }

    pub fn peek_byte(&mut self) -> Result<Option<u8>, Error> {
        Ok(self.fill_to(1)?.first().copied())
    }

    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len() - self.pos);
        self.pos += n;
        self.consumed += n as u64;
    }

    /// Consumes leading ASCII whitespace; returns false if input is exhausted.
    pub fn skip_whitespace(&mut self) -> Result<bool, Error> {
        loop {
            let available = self.buffered();
            match available.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(idx) => {
                    self.consume(idx);
                    return Ok(true);
                }
                None => {
                    let len = available.len();
                    self.consume(len);
                    if self.eof {
                        return Ok(false);
                    }
                    self.fill_more()?;
                }
            }
        }
    }

    /// Reads through the next `\n`, keeping the newline out of the returned bytes.
    pub fn read_line(&mut self) -> Result<Option<Segment>, Error> {
        let Some(end) = self.scan_for(b'\n')? else {
            return Ok(None);
        };
        let offset = self.consumed;
        let segment = match end {
            Scan::Found(idx) => {
                let mut bytes = self.buffered()[..idx].to_vec();
                if bytes.last() == Some(&b'\r') {
                    bytes.pop();
                }
                self.consume(idx + 1);
                Segment {
                    bytes,
                    terminated: true,
                    offset,
                }
            }
            Scan::Eof(len) => {
                let bytes = self.buffered()[..len].to_vec();
                self.consume(len);
                Segment {
                    bytes,
                    terminated: false,
                    offset,
                }
            }
        };
        Ok(Some(segment))
    }

    /// Reads one frame introduced by `delim` and closed by `\n`, as in RFC 7464.
    /// Bytes after the closing newline stay buffered for the next reader.
    pub fn read_frame(&mut self, delim: u8) -> Result<Option<Segment>, Error> {
        if self.peek_byte()? != Some(delim) {
            return Ok(None);
        }
        self.consume(1);
        let offset = self.consumed;
        let segment = self.read_line()?.unwrap_or(Segment {
            bytes: Vec::new(),
            terminated: false,
            offset,
        });
        Ok(Some(segment))
    }

    pub fn format_error(&self, message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Format)
            .with_message(message)
            .with_offset(self.consumed)
    }

    pub fn truncated_error(&self, message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Truncated)
            .with_message(message)
            .with_offset(self.consumed)
    }

    fn scan_for(&mut self, delim: u8) -> Result<Option<Scan>, Error> {
        let mut scanned = 0;
        loop {
            let available = self.buffered();
            let found = available[scanned..].find_byte(delim);
            scanned = found.map_or(available.len(), |idx| scanned + idx);
            if scanned > self.config.max_record_bytes {
                return Err(self.format_error("record exceeds size limit"));
            }
            if found.is_some() {
                return Ok(Some(Scan::Found(scanned)));
            }
            if self.eof {
                return Ok((scanned > 0).then_some(Scan::Eof(scanned)));
            }
            self.fill_more()?;
        }
    }

    fn fill_more(&mut self) -> Result<usize, Error> {
        if self.pos > 0 && self.pos >= self.buf.len() / 2 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        let start = self.buf.len();
        self.buf.resize(start + self.config.read_chunk_bytes.max(1), 0);
        loop {
            match self.source.read(&mut self.buf[start..]) {
                Ok(read) => {
                    self.buf.truncate(start + read);
                    if read == 0 {
                        self.eof = true;
                    }
                    return Ok(read);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.buf.truncate(start);
                    return Err(Error::new(ErrorKind::Io)
                        .with_message("failed to read result stream")
                        .with_offset(self.consumed)
                        .with_source(err));
                }
            }
        }
    }
}

impl fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStream")
            .field("consumed", &self.consumed)
            .field("buffered", &(self.buf.len() - self.pos))
            .field("eof", &self.eof)
            .finish()
    }
}

enum Scan {
    Found(usize),
    Eof(usize),
}

#[cfg(test)]
mod tests {
    use super::{ResultStream, StreamConfig};
    use crate::core::error::ErrorKind;

    fn small(input: &'static [u8]) -> ResultStream {
        ResultStream::new(input).with_config(StreamConfig {
            read_chunk_bytes: 3,
            max_record_bytes: 64,
        })
    }

    #[test]
    fn lines_span_multiple_reads() {
        let mut stream = small(b"alpha\r\nbeta\ngam");
        let first = stream.read_line().expect("read").expect("line");
        assert_eq!(first.bytes, b"alpha");
        assert!(first.terminated);
        assert_eq!(first.offset, 0);
        let second = stream.read_line().expect("read").expect("line");
        assert_eq!(second.bytes, b"beta");
        assert_eq!(second.offset, 7);
        let last = stream.read_line().expect("read").expect("line");
        assert_eq!(last.bytes, b"gam");
        assert!(!last.terminated);
        assert!(stream.read_line().expect("read").is_none());
        assert!(stream.at_end());
        assert_eq!(stream.consumed(), 15);
    }

    #[test]
    fn frames_end_at_their_newline() {
        let mut stream = small(b"\x1eone\n\x1etwo");
        let first = stream.read_frame(0x1e).expect("read").expect("frame");
        assert_eq!(first.bytes, b"one");
        assert!(first.terminated);
        assert_eq!(first.offset, 1);
        assert_eq!(stream.peek_byte().expect("peek"), Some(0x1e));
        let second = stream.read_frame(0x1e).expect("read").expect("frame");
        assert_eq!(second.bytes, b"two");
        assert!(!second.terminated);
        assert!(stream.read_frame(0x1e).expect("read").is_none());
    }

    #[test]
    fn frame_leaves_following_bytes_buffered() {
        let mut stream = small(b"\x1e{}\nxyz");
        let frame = stream.read_frame(0x1e).expect("read").expect("frame");
        assert_eq!(frame.bytes, b"{}");
        assert_eq!(stream.consumed(), 4);
        assert_eq!(stream.fill_to(3).expect("fill"), b"xyz");
        assert!(stream.read_frame(0x1e).expect("read").is_none());
    }

    #[test]
    fn skip_whitespace_reports_end_of_input() {
        let mut stream = small(b"  \n\t x");
        assert!(stream.skip_whitespace().expect("skip"));
        assert_eq!(stream.buffered(), b"x");
        stream.consume(1);
        assert!(!stream.skip_whitespace().expect("skip"));
    }

    #[test]
    fn oversized_line_is_a_format_error() {
        let mut stream = ResultStream::new(&[b'a'; 100][..]).with_config(StreamConfig {
            read_chunk_bytes: 16,
            max_record_bytes: 32,
        });
        let err = stream.read_line().expect_err("oversize");
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}
