//! The framed byte stream of one connection.
//!
//! Reads and writes are serialized by separate locks: at most one frame is
//! being read and at most one frame is being written at any time.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::trace;

use crate::codec::{self, FRAME_HEADER_LEN, HELLO_HEADER_LEN};
use crate::error::{BepError, Result};
use crate::messages::{Hello, Message};
use crate::transport::ByteStream;

pub struct Wire {
    reader: Mutex<ReadHalf<Box<dyn ByteStream>>>,
    writer: Mutex<WriteHalf<Box<dyn ByteStream>>>,
    connected: AtomicBool,
}

impl Wire {
    pub fn new(stream: Box<dyn ByteStream>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            connected: AtomicBool::new(true),
        }
    }

    /// False once the stream hit EOF, failed, or was shut down.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(BepError::Io(_)) | Err(BepError::ConnectionClosed)) {
            self.mark_disconnected();
        }
        result
    }

    /// Write one whole frame. A write dropped halfway leaves the wire
    /// disconnected so nothing is appended to the partial frame.
    async fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if !self.is_connected() {
            return Err(BepError::ConnectionClosed);
        }
        let mut partial = PartialWrite {
            wire: self,
            done: false,
        };
        let result = async {
            writer.write_all(frame).await?;
            writer.flush().await?;
            Ok::<(), BepError>(())
        }
        .await;
        partial.done = true;
        self.track(result)
    }

    pub async fn send_hello(&self, hello: &Hello) -> Result<()> {
        let frame = codec::encode_hello(hello)?;
        self.write_frame(&frame).await
    }

    pub async fn recv_hello(&self) -> Result<Hello> {
        let mut reader = self.reader.lock().await;
        let result = async {
            let mut header = [0u8; HELLO_HEADER_LEN];
            read_exact_or_closed(&mut *reader, &mut header).await?;
            let len = codec::hello_payload_len(&header)?;
            let mut payload = vec![0u8; len];
            read_exact_or_closed(&mut *reader, &mut payload).await?;
            Ok::<_, BepError>(codec::decode_hello_payload(&payload)?)
        }
        .await;
        self.track(result)
    }

    pub async fn send(&self, message: &Message) -> Result<()> {
        let frame = codec::encode_frame(message)?;
        trace!(kind = message.kind(), len = frame.len(), "sending message");
        self.write_frame(&frame).await
    }

    pub async fn recv(&self) -> Result<Message> {
        let mut reader = self.reader.lock().await;
        let result = async {
            let mut header = [0u8; FRAME_HEADER_LEN];
            read_exact_or_closed(&mut *reader, &mut header).await?;
            let len = codec::frame_payload_len(&header)?;
            let mut payload = vec![0u8; len];
            read_exact_or_closed(&mut *reader, &mut payload).await?;
            Ok::<_, BepError>(codec::decode_message_payload(&payload)?)
        }
        .await;
        if let Ok(message) = &result {
            trace!(kind = message.kind(), "received message");
        }
        self.track(result)
    }

    /// Close the write side. Errors are ignored; the peer may be gone.
    pub async fn shutdown(&self) {
        self.mark_disconnected();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

struct PartialWrite<'a> {
    wire: &'a Wire,
    done: bool,
}

impl Drop for PartialWrite<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.wire.mark_disconnected();
        }
    }
}

async fn read_exact_or_closed(
    reader: &mut ReadHalf<Box<dyn ByteStream>>,
    buf: &mut [u8],
) -> Result<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(BepError::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}
