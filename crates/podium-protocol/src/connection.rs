//! QUIC connection and stream framing.

use std::net::SocketAddr;

use bincode::{Decode, Encode};
use quinn::{Connection, RecvStream, SendStream};
use tracing::trace;

use crate::error::ProtocolError;
use crate::wire::{self, MAX_MESSAGE_SIZE};

/// Application close codes used when the host ends a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Ordinary close.
    Normal,
    /// A newer controller took over the session.
    Preempted,
    /// The host is stopping.
    Shutdown,
    /// The host is not accepting controllers right now.
    Rejected,
}

impl CloseReason {
    pub fn code(self) -> u32 {
        match self {
            Self::Normal => 0,
            Self::Preempted => 1,
            Self::Shutdown => 2,
            Self::Rejected => 3,
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Normal => b"bye",
            Self::Preempted => b"preempted",
            Self::Shutdown => b"shutdown",
            Self::Rejected => b"rejected",
        }
    }

    /// Map a received close code back to a reason.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Normal),
            1 => Some(Self::Preempted),
            2 => Some(Self::Shutdown),
            3 => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A connection to a remote controller (or, on the client side, to the host).
#[derive(Clone)]
pub struct PeerConnection {
    connection: Connection,
}

impl PeerConnection {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Get the remote address of this connection.
    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Open the bidirectional control stream (controller side).
    pub async fn open_control_stream(
        &self,
    ) -> Result<(MessageSender, MessageReceiver), ProtocolError> {
        let (send, recv) = self
            .connection
            .open_bi()
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        Ok((MessageSender::new(send), MessageReceiver::new(recv)))
    }

    /// Accept the bidirectional control stream (host side).
    pub async fn accept_control_stream(
        &self,
    ) -> Result<(MessageSender, MessageReceiver), ProtocolError> {
        let (send, recv) = self
            .connection
            .accept_bi()
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        Ok((MessageSender::new(send), MessageReceiver::new(recv)))
    }

    /// Close the connection with an application close code. Does not block.
    pub fn close(&self, reason: CloseReason) {
        self.connection
            .close(quinn::VarInt::from_u32(reason.code()), reason.as_bytes());
    }

    /// The end-entity certificate presented by the peer, DER-encoded.
    pub fn peer_certificate(&self) -> Option<Vec<u8>> {
        let identity = self.connection.peer_identity()?;
        let certs = identity
            .downcast::<Vec<rustls::pki_types::CertificateDer<'static>>>()
            .ok()?;
        certs.first().map(|c| c.as_ref().to_vec())
    }
}

/// Sends length-prefixed bincode messages over a QUIC send stream.
pub struct MessageSender {
    stream: SendStream,
}

impl MessageSender {
    fn new(stream: SendStream) -> Self {
        Self { stream }
    }

    /// Send a message, encoding it as length-prefixed bincode.
    pub async fn send<T: Encode>(&mut self, msg: &T) -> Result<(), ProtocolError> {
        let payload = wire::encode_payload(msg)?;
        let len = wire::frame_len(&payload)?;

        self.stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        self.stream
            .write_all(&payload)
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;

        trace!(len, "sent message");
        Ok(())
    }

    /// Finish the stream (signal no more data).
    pub fn finish(mut self) -> Result<(), ProtocolError> {
        self.stream
            .finish()
            .map_err(|e| ProtocolError::Connection(e.to_string()))
    }
}

/// Receives length-prefixed bincode messages from a QUIC recv stream.
pub struct MessageReceiver {
    stream: RecvStream,
}

impl MessageReceiver {
    fn new(stream: RecvStream) -> Self {
        Self { stream }
    }

    /// Receive and decode a message.
    ///
    /// Returns `None` if the stream has been cleanly closed by the peer. A
    /// [`ProtocolError::Deserialization`] leaves the stream positioned at the
    /// next frame, so the caller may keep reading.
    pub async fn recv<T: Decode<()>>(&mut self) -> Result<Option<T>, ProtocolError> {
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf).await {
            Ok(()) => {}
            Err(quinn::ReadExactError::FinishedEarly(_)) => return Ok(None),
            Err(quinn::ReadExactError::ReadError(e)) => return Err(read_error(e)),
        }

        let len = u32::from_be_bytes(len_buf);
        if len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::FrameTooLarge(len));
        }

        let mut payload = vec![0u8; len as usize];
        match self.stream.read_exact(&mut payload).await {
            Ok(()) => {}
            Err(quinn::ReadExactError::FinishedEarly(_)) => {
                return Err(ProtocolError::StreamClosed);
            }
            Err(quinn::ReadExactError::ReadError(e)) => return Err(read_error(e)),
        }

        let msg = wire::decode_message(&payload)?;
        trace!(len, "received message");
        Ok(Some(msg))
    }
}

fn read_error(e: quinn::ReadError) -> ProtocolError {
    match e {
        quinn::ReadError::ConnectionLost(quinn::ConnectionError::ApplicationClosed(close)) => {
            ProtocolError::ClosedByPeer {
                code: close.error_code.into_inner(),
                reason: String::from_utf8_lossy(&close.reason).into_owned(),
            }
        }
        other => ProtocolError::Connection(other.to_string()),
    }
}
