// src/lib.rs
// Library interface for ct-vat
pub mod cert_parser;
pub mod cli;
pub mod config;
pub mod ct_log;
pub mod database;
pub mod export;
pub mod pipeline;
pub mod report;
pub mod stats;
pub mod types;
pub mod vat;
