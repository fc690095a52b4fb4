//! Streaming ingestion loop and its connection state machine.

mod ingestion;
mod state;

pub use ingestion::IngestionEngine;
pub use state::ConnectionState;
