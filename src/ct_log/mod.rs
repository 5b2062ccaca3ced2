// src/ct_log/mod.rs
pub mod client;
pub mod slices;
pub mod types;
pub mod walker;

pub use client::{CtLogClient, FetchError};
pub use slices::SliceManager;
pub use types::{RawLogEntry, SignedTreeHead};
pub use walker::{EntrySink, SliceWalker, WalkOutcome};
