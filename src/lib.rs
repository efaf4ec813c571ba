pub mod alerts;
pub mod arguments;
pub mod bots;
pub mod config;
pub mod errors;
pub mod exchange;
pub mod logger;
pub mod positions;
pub mod shutdown;
pub mod strategies;
pub mod telegram;
pub mod trend;
pub mod types;
pub mod utils;
pub mod volume;
pub mod webserver;

#[cfg(test)]
pub(crate) mod testkit;
