//! Purpose: Library crate behind the `strata` CLI for reading multi-batch result streams.
//! Exports: `api` (stable surface), `core` (stream, batch reader, composer, errors), `decode`.
//! Role: Decodes back-to-back result batches from one forward-only byte stream.
//! Invariants: A single stream is owned by exactly one batch reader at a time.
//! Invariants: Prefer `api` re-exports; `core` and `decode` paths may move between releases.
pub mod api;
pub mod core;
pub mod decode;
