//! Alert monitor for climate-control devices.
//!
//! A periodic job folds unprocessed sensor readings into per-device alert
//! state, and a read-only aggregator summarizes each alert with the min/max
//! of the sensor it concerns.

pub mod config;
pub mod db;
pub mod errors;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod processor;
pub mod report;
pub mod rest;
pub mod store;
