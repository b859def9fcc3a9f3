//! weather-lookup library
//!
//! Read-through caching with stale-on-error fallback ([`cache`]), Open-Meteo
//! adapters ([`data`]), and the weather service and tool server built on them.

pub mod cache;
pub mod cli;
pub mod data;
pub mod logging;
pub mod server;
pub mod service;
pub mod tools;
