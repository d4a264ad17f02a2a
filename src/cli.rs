use clap::Parser;
use std::path::PathBuf;

use crate::chat::osc::{DEFAULT_HOST, DEFAULT_PORT};
use crate::config::DEFAULT_SETTINGS_PATH;

/// Speaks typed text and mirrors it to the VRChat chatbox.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "chatbox-tts", version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// The ip of the OSC server.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub ip: String,

    /// The port the OSC server is listening on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Settings file.
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    pub config: PathBuf,

    /// Log filter, overridden by RUST_LOG.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["chatbox-tts"]);
        assert_eq!(cli.ip, "127.0.0.1");
        assert_eq!(cli.port, 9000);
        assert_eq!(cli.config, PathBuf::from("./setting.json"));
    }

    #[test]
    fn overrides() {
        let cli = Cli::parse_from(["chatbox-tts", "--ip", "192.168.0.5", "--port", "9001"]);
        assert_eq!(cli.ip, "192.168.0.5");
        assert_eq!(cli.port, 9001);
    }

    #[test]
    fn rejects_bad_port() {
        assert!(Cli::try_parse_from(["chatbox-tts", "--port", "nine"]).is_err());
    }
}
