pub mod config;
pub mod dataset;
pub mod embedding;
pub mod errors;
pub mod evaluation;
pub mod expansion;
pub mod fusion;
pub mod generation;
pub mod index;
pub mod labeling;
pub mod logging;
pub mod metrics;
pub mod retry;

#[cfg(test)]
mod testing;
