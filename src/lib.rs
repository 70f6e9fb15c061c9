//! Fine-tune a small pretrained GPT-2 model on the CPU with candle, and build
//! question/answer training data from Python repositories.

pub mod collate;
pub mod config;
pub mod crawler;
pub mod data;
pub mod generate;
pub mod github;
pub mod hub;
pub mod model;
pub mod ollama;
pub mod qa;
pub mod train;

#[cfg(test)]
pub(crate) mod test_utils;
