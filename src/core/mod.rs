// Core modules: the shared stream, batch readers, the set composer, and error modeling.
pub mod batch;
pub mod error;
pub mod record;
pub mod sets;
pub mod stream;
#[cfg(test)]
pub(crate) mod testing;
