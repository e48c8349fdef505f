//! Turning messages into validated AI analyses

pub mod analysis;
pub mod message_processor;
pub mod normalizer;
pub mod prompt;
