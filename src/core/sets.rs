// Chains batch readers over one stream, yielding one result-set view per batch.
use crate::core::batch::{BatchDecoder, BatchReader, closed_error};
use crate::core::error::{Error, ErrorKind};
use crate::core::stream::ResultStream;
use std::io::Read;
use tracing::debug;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Start,
    InBatch,
    Exhausted,
    Failed(ErrorKind, Option<usize>),
    Closed,
}

/// Lazy sequence of result sets read back-to-back from a single stream.
///
/// Each call to [`ResultSets::next_set`] returns the active batch reader as
/// the current view. Once that view reports no more records, the next call
/// builds a fresh decoder from the factory and hands the stream off to it.
/// The composer never closes the stream itself; closing goes through
/// whichever reader currently owns it.
pub struct ResultSets<D, F> {
    factory: F,
    active: Option<BatchReader<D>>,
    phase: Phase,
    sets: usize,
}

impl<D, F> ResultSets<D, F>
where
    D: BatchDecoder,
    F: FnMut() -> D,
{
    pub fn open<R>(reader: R, factory: F) -> Result<Self, Error>
    where
        R: Read + Send + 'static,
    {
        Self::new(ResultStream::new(reader), factory)
    }

    pub fn new(stream: ResultStream, mut factory: F) -> Result<Self, Error> {
        let reader = BatchReader::bind(factory(), stream)?;
        Ok(Self {
            factory,
            active: Some(reader),
            phase: Phase::Start,
            sets: 0,
        })
    }

    /// Number of result-set views yielded so far.
    pub fn sets_started(&self) -> usize {
        self.sets
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Advances to the batch that should be read next.
    ///
    /// While the current view still has records it is returned again; once it
    /// is exhausted the stream moves to a new reader. `Ok(None)` marks the end
    /// of the stream and repeats on every later call.
    pub fn next_set(&mut self) -> Result<Option<&mut BatchReader<D>>, Error> {
        match self.phase {
            Phase::Closed => return Err(closed_error()),
            Phase::Failed(kind, batch) => {
                let err = Error::new(kind)
                    .with_message("result sets were terminated by an earlier error");
                return Err(match batch {
                    Some(batch) => err.with_batch(batch),
                    None => err,
                });
            }
            Phase::Exhausted => return Ok(None),
            Phase::Start => {
                self.phase = Phase::InBatch;
                if self.active.as_ref().is_some_and(BatchReader::has_batch) {
                    self.sets += 1;
                    return Ok(self.active.as_mut());
                }
            }
            Phase::InBatch => {
                let continuing = match self.active.as_mut() {
                    Some(active) => active.has_more_records(),
                    None => Ok(false),
                };
                if self.guard(continuing)? {
                    return Ok(self.active.as_mut());
                }
            }
        }

        let Some(current) = self.active.take() else {
            self.phase = Phase::Exhausted;
            return Ok(None);
        };
        let decoder = (self.factory)();
        match BatchReader::hand_off(decoder, current) {
            Ok(Some(next)) => {
                self.sets += 1;
                self.active = Some(next);
                Ok(self.active.as_mut())
            }
            Ok(None) => {
                debug!(sets = self.sets, "result sets exhausted");
                self.phase = Phase::Exhausted;
                Ok(None)
            }
            Err(err) => {
                self.phase = Phase::Failed(err.kind(), err.batch());
                Err(err)
            }
        }
    }

    /// Drives every remaining result set through `visit`; returns how many were visited.
    pub fn for_each_set<V>(&mut self, mut visit: V) -> Result<usize, Error>
    where
        V: FnMut(&mut BatchReader<D>) -> Result<(), Error>,
    {
        let mut visited = 0;
        while let Some(set) = self.next_set()? {
            visit(set)?;
            visited += 1;
        }
        Ok(visited)
    }

    /// Closes the active reader. Idempotent; later pulls fail with `Closed`.
    pub fn close(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.close();
        }
        self.phase = Phase::Closed;
    }

    fn guard<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(err) = &result {
            self.phase = Phase::Failed(err.kind(), err.batch());
        }
        result
    }
}
