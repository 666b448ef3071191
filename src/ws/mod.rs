//! Peer networking - wire protocol, transports, host listener, client link

pub mod client;
pub mod handler;
pub mod protocol;
pub mod transport;

pub use transport::{Outbound, PeerHub, Transport};

/// Network errors; none of these are fatal to the match
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("Connection attempt {attempt} timed out")]
    ConnectTimeout { attempt: u32 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Gave up after {attempts} connection attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Malformed peer message: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Listening identity derived from the room code
pub fn room_peer_id(room_code: &str) -> String {
    format!("arena-{}", room_code.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_identity_is_deterministic() {
        assert_eq!(room_peer_id(" XK42 "), "arena-xk42");
        assert_eq!(room_peer_id("xk42"), room_peer_id("XK42"));
    }
}
