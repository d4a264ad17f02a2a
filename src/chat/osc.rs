use rosc::{encoder, OscMessage, OscPacket, OscType};
use std::net::{SocketAddr, UdpSocket};
use tracing::{debug, info};

use crate::error::ChatboxError;

pub const CHATBOX_INPUT: &str = "/chatbox/input";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9000;

/// Sends text to the VRChat chatbox over OSC.
#[derive(Debug)]
pub struct ChatboxClient {
    socket: UdpSocket,
    target: SocketAddr,
}

impl ChatboxClient {
    pub fn connect(host: &str, port: u16) -> Result<Self, ChatboxError> {
        let target: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .or_else(|_| {
                std::net::ToSocketAddrs::to_socket_addrs(&(host, port))?
                    .next()
                    .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, host.to_string()))
            })?;
        let bind = if target.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind)?;
        info!(%target, "Chatbox client ready");
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Types `message` into the chatbox, sending immediately with the
    /// notification sound.
    pub fn send(&self, message: &str) -> Result<(), ChatboxError> {
        let bytes = encode_chatbox(message, true, true)?;
        self.socket.send_to(&bytes, self.target)?;
        debug!(message, "Chatbox message sent");
        Ok(())
    }
}

pub fn encode_chatbox(message: &str, immediate: bool, notify: bool) -> Result<Vec<u8>, ChatboxError> {
    let packet = OscPacket::Message(OscMessage {
        addr: CHATBOX_INPUT.to_string(),
        args: vec![
            OscType::String(message.to_string()),
            OscType::Bool(immediate),
            OscType::Bool(notify),
        ],
    });
    encoder::encode(&packet).map_err(|e| ChatboxError::Encode(format!("{:?}", e)))
}
