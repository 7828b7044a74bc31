//! Telemetry initialisation: tracing subscriber and OTLP export.

mod init;

pub use init::init_telemetry;
