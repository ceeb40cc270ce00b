//! SensorLink Backend Library
//!
//! Sensor telemetry ingestion core plus the ambient surfaces used by the
//! `sensorlink` daemon and the `sensor_emulator` binary.

pub mod api;
pub mod config;
pub mod emulator;
pub mod telemetry;
