//! Transport capability.
//!
//! Socket setup, TLS and certificate validation live outside this crate. A
//! [`Connector`] hands the connection actor an already authenticated duplex
//! byte stream together with the certificate the peer presented.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// A duplex byte stream usable by a connection.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

/// An open, mutually validated stream to a device.
pub struct AuthenticatedStream {
    pub stream: Box<dyn ByteStream>,
    /// DER certificate presented by the peer.
    pub peer_certificate: Vec<u8>,
}

impl std::fmt::Debug for AuthenticatedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedStream")
            .field("peer_certificate_len", &self.peer_certificate.len())
            .finish_non_exhaustive()
    }
}

/// Opens authenticated streams to device addresses.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<AuthenticatedStream>;
}

/// In-process connector for tests.
///
/// Each registered address yields one end of a `tokio::io::duplex` pair; the
/// caller keeps the other end and plays the peer.
pub mod memory {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tokio::io::DuplexStream;

    use crate::error::BepError;

    const PIPE_CAPACITY: usize = 64 * 1024;

    #[derive(Default)]
    pub struct MemoryConnector {
        pending: Mutex<HashMap<String, VecDeque<AuthenticatedStream>>>,
    }

    impl MemoryConnector {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a connection to `address` whose peer presents
        /// `peer_certificate`. Returns the peer's end of the pipe.
        pub fn add_peer(&self, address: &str, peer_certificate: Vec<u8>) -> DuplexStream {
            let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
            let stream = AuthenticatedStream {
                stream: Box::new(local),
                peer_certificate,
            };
            self.pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .entry(address.to_string())
                .or_default()
                .push_back(stream);
            remote
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self, address: &str) -> Result<AuthenticatedStream> {
            self.pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get_mut(address)
                .and_then(VecDeque::pop_front)
                .ok_or_else(|| BepError::UnknownAddress(address.to_string()))
        }
    }
}
