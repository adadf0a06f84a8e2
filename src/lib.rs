//! Battle Recorder - ingests battle chat logs into classified,
//! owner-attributed match records.

pub mod commands;
pub mod config;
pub mod ingest;
pub mod server;
pub mod source;
pub mod store;
