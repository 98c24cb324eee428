//! Purpose: Define the stable public Rust API boundary for Strata.
//! Exports: Result-stream readers, bundled decoders, the service client, and entity views.
//! Role: Public, additive-only surface used by the CLI and by library callers.
//! Invariants: Callers never need to reach into `core` or `decode` paths directly.

mod entity;
mod resources;
mod service;

pub use crate::core::batch::{BatchDecoder, BatchInfo, BatchReader, BatchStart};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::record::{Record, RecordBuilder};
pub use crate::core::sets::ResultSets;
pub use crate::core::stream::{ResultStream, Segment, StreamConfig};
pub use crate::decode::{AnyDecoder, DecoderFactory, ExportDecoder, Format, FormatSets, SeqDecoder};
pub use entity::Entity;
pub use resources::{AlertGroup, AppSetup, ClusterPeer, LicensePool, Quota};
pub use service::{ExportOptions, Namespace, ResultsOptions, Service};

pub type ApiResult<T> = Result<T, Error>;
