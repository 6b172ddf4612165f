//! Signal Edge - Line-oriented host for the reflex loop
//!
//! Reads newline-delimited JSON envelopes (instrument events, telemetry,
//! operator overrides, corpus and model reloads) and writes every action,
//! sync record and operational event back out as JSON lines.
//!
//! # Wire format
//!
//! ```text
//! in:  {"type":"event","source":"LiquidHandler-01","severity":"ERROR","message":"Aspiration timeout","raw_code":"ERR_VAC_04"}
//!      {"type":"telemetry","source":"Bioreactor-01","channel":"ph","value":6.4}
//!      {"type":"override","source":"LiquidHandler-01","action":"ABORT","justification":"operator stop"}
//!      {"type":"reload_corpus","path":"corpus.json"}
//!      {"type":"reload_model","spec_path":"titer.toml","artifact_path":"titer.json"}
//!
//! out: {"stream":"action","record":{"disposition":"ISSUE","decision":{...}}}
//!      {"stream":"sync","record":{"entity":"Bioreactor-01","field":"ph",...}}
//!      {"stream":"ops","record":{"id":...,"event":{"type":"DeadlineExceeded","data":{...}}}}
//!      {"stream":"rejected","record":{"line":7,"reason":"..."}}
//! ```

pub mod envelope;
pub mod error;
pub mod runtime;

pub use envelope::{Inbound, OverrideRequest, Outbound, TelemetryReading};
pub use error::{EdgeError, Result};
pub use runtime::{EdgeRuntime, RunSummary};
