//! Real-time frame and audio recorder

pub mod buffer;
pub mod config;
pub mod error;
pub mod screencast;
