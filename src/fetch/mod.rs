// src/fetch/mod.rs

pub mod archive;
pub mod unpack;

pub use archive::{update_archive, FetchOutcome};
pub use unpack::unpack_archive;
