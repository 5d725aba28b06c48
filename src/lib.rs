pub mod agent;
pub mod backtesting;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod profiles;
#[cfg(test)]
pub mod test_helpers;
