//! SACI telemetry ingestion: reads sensor node lines from a serial link,
//! parses them, classifies complete readings for fire risk and reports every
//! outcome.

pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod prediction;
pub mod report;
pub mod serial;
pub mod utils;
