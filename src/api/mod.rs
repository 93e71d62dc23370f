//! HTTP surfaces for the two services.
//!
//! `gateway` fronts the mock business APIs behind the enforcement gate and
//! exposes the enforcement control endpoints; `detector` ingests telemetry
//! and exposes the operator surface (incidents, settings, reset).

pub mod detector;
pub mod gateway;
