pub mod argsets;
pub mod command;
pub mod config;
pub mod constants;
pub mod helpers;
pub mod ingest;
pub mod interfaces;
pub mod models;
pub mod readers;

#[cfg(test)]
mod testing;
