pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod speaker;
pub mod ui;
pub mod voice;
