//! Frame transports.
//!
//! A transport turns a byte stream into frames. The session opens it once
//! per connection and splits it into a reader half, owned by the background
//! reader task, and a writer half, shared by every caller behind a lock.

use std::future::Future;
use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::config::Endpoint;

/// Opens connections to an [`Endpoint`].
pub trait Transport: Send + Sync + 'static {
    type Reader: FrameReader;
    type Writer: FrameWriter;

    fn open(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = io::Result<(Self::Reader, Self::Writer)>> + Send;
}

/// Receiving half of an open connection.
pub trait FrameReader: Send + 'static {
    /// Wait for the next complete frame.
    fn read_frame(&mut self) -> impl Future<Output = io::Result<Vec<u8>>> + Send;
}

/// Sending half of an open connection.
pub trait FrameWriter: Send + 'static {
    fn write_frame(&mut self, frame: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

// ─── Abridged TCP ─────────────────────────────────────────────────────────────

/// TCP with MTProto abridged framing.
///
/// The connection starts with a single `0xef` byte. Every frame is prefixed
/// with its length in 4-byte words: one byte below `0x7f`, otherwise `0x7f`
/// followed by three little-endian bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    type Reader = AbridgedReader;
    type Writer = AbridgedWriter;

    async fn open(&self, endpoint: &Endpoint) -> io::Result<(AbridgedReader, AbridgedWriter)> {
        log::info!("[mtsender] connecting to {endpoint} …");
        let mut stream = TcpStream::connect(&endpoint.addr).await?;
        stream.set_nodelay(true)?;
        stream.write_all(&[0xef]).await?;
        let (read, write) = stream.into_split();
        Ok((AbridgedReader { read }, AbridgedWriter { write }))
    }
}

/// Largest payload the abridged length prefix can describe.
pub(crate) const MAX_FRAME_LEN: usize = 0xff_ffff * 4;

pub struct AbridgedReader {
    read: OwnedReadHalf,
}

impl FrameReader for AbridgedReader {
    async fn read_frame(&mut self) -> io::Result<Vec<u8>> {
        let mut h = [0u8; 1];
        self.read.read_exact(&mut h).await?;
        let words = if h[0] < 0x7f {
            h[0] as usize
        } else {
            let mut b = [0u8; 3];
            self.read.read_exact(&mut b).await?;
            b[0] as usize | (b[1] as usize) << 8 | (b[2] as usize) << 16
        };
        let mut buf = vec![0u8; words * 4];
        self.read.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

pub struct AbridgedWriter {
    write: OwnedWriteHalf,
}

impl FrameWriter for AbridgedWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        if frame.len() % 4 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes is not word-aligned", frame.len()),
            ));
        }
        let mut out = Vec::with_capacity(frame.len() + 4);
        out.extend(abridged_header(frame.len() / 4));
        out.extend_from_slice(frame);
        self.write.write_all(&out).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.write.shutdown().await
    }
}

fn abridged_header(words: usize) -> Vec<u8> {
    if words < 0x7f {
        vec![words as u8]
    } else {
        vec![0x7f, words as u8, (words >> 8) as u8, (words >> 16) as u8]
    }
}
