//! Framed byte stream to a single remote side
//!
//! Every payload travels as a 4-byte big-endian length followed by the payload
//! bytes. The connection knows nothing about message kinds; decoding is left
//! to [`crate::protocol`] so a bad payload never costs the stream.
//!
//! A frame announcing more than `MAX_FRAME_SIZE` bytes is skipped rather than
//! buffered. The reader reports it once as `TransportError::FrameTooLarge` and
//! carries on with the next frame.

use crate::{Handshake, Message, MAX_FRAME_SIZE};
use futures_util::{FutureExt, SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, FramedRead, FramedWrite, LengthDelimitedCodec};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport failure: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed by remote")]
    Closed,
    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not encode frame: {0}")]
    Encode(#[from] crate::CodecError),
}

impl TransportError {
    /// True when the stream is still usable after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::FrameTooLarge(_))
    }
}

fn encode_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_codec()
}

/// What the decoder found at the head of the stream
#[derive(Debug)]
enum InboundFrame {
    Payload(Bytes),
    /// Announced length of a frame that is being skipped
    Oversize(usize),
}

#[derive(Debug, Default)]
struct DecodeCodec {
    /// Bytes of an oversize frame still to throw away
    discarding: usize,
}

impl DecodeCodec {
    fn discard(&mut self, src: &mut BytesMut) {
        let skip = self.discarding.min(src.len());
        src.advance(skip);
        self.discarding -= skip;
    }
}

impl Decoder for DecodeCodec {
    type Item = InboundFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        if self.discarding > 0 {
            self.discard(src);
            if self.discarding > 0 {
                return Ok(None);
            }
        }

        if src.len() < 4 {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if len > MAX_FRAME_SIZE {
            src.advance(4);
            self.discarding = len;
            self.discard(src);
            return Ok(Some(InboundFrame::Oversize(len)));
        }

        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(4 + len);
        frame.advance(4);

        Ok(Some(InboundFrame::Payload(frame.freeze())))
    }
}

/// Receiving half of a connection
pub struct ConnectionReader {
    frames: FramedRead<OwnedReadHalf, DecodeCodec>,
}

fn inbound(next: Option<io::Result<InboundFrame>>) -> Result<Bytes, TransportError> {
    match next {
        Some(Ok(InboundFrame::Payload(frame))) => Ok(frame),
        Some(Ok(InboundFrame::Oversize(len))) => Err(TransportError::FrameTooLarge(len)),
        Some(Err(e)) => Err(TransportError::Io(e)),
        None => Err(TransportError::Closed),
    }
}

impl ConnectionReader {
    /// Waits for the next complete frame.
    ///
    /// A clean close between frames is reported as `TransportError::Closed`.
    /// An oversize frame gives `TransportError::FrameTooLarge` and leaves the
    /// stream readable.
    pub async fn receive(&mut self) -> Result<Bytes, TransportError> {
        inbound(self.frames.next().await)
    }

    /// Returns a frame only if one can be produced without waiting.
    ///
    /// `Ok(None)` is the would-block case.
    pub fn try_receive(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.frames.next().now_or_never() {
            None => Ok(None),
            Some(next) => inbound(next).map(Some),
        }
    }

    /// Like `receive`, but gives up with `TransportError::Timeout` after `limit`
    pub async fn receive_timeout(&mut self, limit: Duration) -> Result<Bytes, TransportError> {
        tokio::time::timeout(limit, self.receive())
            .await
            .map_err(|_| TransportError::Timeout(limit))?
    }
}

/// Sending half of a connection
pub struct ConnectionWriter {
    frames: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
}

impl ConnectionWriter {
    /// Writes one frame and flushes it.
    pub async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(payload.len()));
        }
        SinkExt::<Bytes>::send(&mut self.frames, payload).await?;
        Ok(())
    }

    /// Like `send`, but gives up with `TransportError::Timeout` after `limit`
    pub async fn send_timeout(
        &mut self,
        payload: Bytes,
        limit: Duration,
    ) -> Result<(), TransportError> {
        tokio::time::timeout(limit, self.send(payload))
            .await
            .map_err(|_| TransportError::Timeout(limit))?
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), TransportError> {
        let payload = message.encode()?;
        self.send(Bytes::from(payload)).await
    }

    /// Flushes pending frames and closes the write side.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        SinkExt::<Bytes>::close(&mut self.frames).await?;
        Ok(())
    }
}

/// A framed TCP stream to one remote side
pub struct Connection {
    reader: ConnectionReader,
    writer: ConnectionWriter,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Wraps an accepted or connected stream
    ///
    /// Disables Nagle so small position frames go out immediately.
    pub fn new(stream: TcpStream) -> Result<Self, TransportError> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();

        Ok(Connection {
            reader: ConnectionReader {
                frames: FramedRead::new(read_half, DecodeCodec::default()),
            },
            writer: ConnectionWriter {
                frames: FramedWrite::new(write_half, encode_codec()),
            },
            peer_addr,
        })
    }

    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        Self::new(stream)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.writer.send(payload).await
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), TransportError> {
        self.writer.send_message(message).await
    }

    pub async fn send_handshake(&mut self, handshake: Handshake) -> Result<(), TransportError> {
        let payload = handshake.encode()?;
        self.writer.send(Bytes::from(payload)).await
    }

    pub async fn receive(&mut self) -> Result<Bytes, TransportError> {
        self.reader.receive().await
    }

    pub fn try_receive(&mut self) -> Result<Option<Bytes>, TransportError> {
        self.reader.try_receive()
    }

    pub async fn receive_timeout(&mut self, limit: Duration) -> Result<Bytes, TransportError> {
        self.reader.receive_timeout(limit).await
    }

    /// Splits into halves that can be driven from separate tasks.
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        (self.reader, self.writer)
    }
}
