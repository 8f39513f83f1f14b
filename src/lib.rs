//! Transactive building assets: device models, bids and actuation.

/// Actuation gate and strategies.
pub mod actuation;
pub mod asset;
pub mod config;
pub mod devices;
/// Synthetic weather and price series.
pub mod forecast;
pub mod frame;
pub mod information;
pub mod io;
pub mod market;
/// Weekly occupancy schedules.
pub mod occupancy;
/// Market replay harness.
pub mod sim;
pub mod transport;
