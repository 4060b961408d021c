pub mod api;
pub mod app;
pub mod config;
pub mod directory;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod seed;
pub mod service;
pub mod state;

#[cfg(test)]
mod tests;
