//! Security operations pipeline: a gateway fronting mock business APIs
//! behind an enforcement gate, and a detector service that turns gateway
//! telemetry into incidents and containment.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod utils;
