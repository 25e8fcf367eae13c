pub mod app;
pub mod cli;
pub mod client;
pub mod config;
pub mod output;
pub mod record;
pub mod session;
pub mod utils;
pub mod view;

#[cfg(test)]
mod tests;
