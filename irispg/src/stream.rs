//! Buffered frame stream over an accepted client socket.
use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::{
    Result,
    protocol::{BackendProtocol, FrontendMessage, MAX_FRAME_LEN, ProtocolError, StartupMessage, backend},
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// Buffered connection to a PostgreSQL client.
///
/// Reads are frame-at-a-time; writes are buffered until [`flush`][PgStream::flush],
/// which writes the whole pending batch atomically from the caller's view.
#[derive(Debug)]
pub struct PgStream {
    socket: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
    max_frame_len: usize,
}

impl PgStream {
    pub fn new(socket: TcpStream) -> Self {
        Self {
            socket,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Lower the frame length ceiling below the protocol hard limit.
    pub fn set_max_frame_len(&mut self, max: usize) {
        self.max_frame_len = max.min(MAX_FRAME_LEN);
    }

    /// Read the untyped first frame: Startup, SSLRequest, GSSENCRequest or
    /// CancelRequest.
    pub async fn read_startup(&mut self) -> Result<StartupMessage> {
        loop {
            if self.read_buf.len() >= 4 {
                let mut header = &self.read_buf[..4];
                let len = header.get_i32() as i64;

                // length includes itself
                if len < 8 || len as usize > self.max_frame_len {
                    return Err(ProtocolError::bad_length(len).into());
                }
                let len = len as usize;

                if self.read_buf.len() >= len {
                    self.read_buf.advance(4);
                    let body = self.read_buf.split_to(len - 4).freeze();
                    return Ok(StartupMessage::decode(body)?);
                }
                self.read_buf.reserve(len - self.read_buf.len());
            }
            self.read_more().await?;
        }
    }

    /// Read one typed frame and decode it.
    pub async fn read_message(&mut self) -> Result<FrontendMessage> {
        loop {
            if self.read_buf.len() >= 5 {
                let mut header = &self.read_buf[1..5];
                let msgtype = self.read_buf[0];
                let len = header.get_i32() as i64;

                if len < 4 || len as usize > self.max_frame_len {
                    return Err(ProtocolError::bad_length(len).into());
                }
                let len = len as usize;

                if self.read_buf.len() >= 1 + len {
                    self.read_buf.advance(5);
                    let body = self.read_buf.split_to(len - 4).freeze();
                    return Ok(FrontendMessage::decode(msgtype, body)?);
                }
                self.read_buf.reserve(1 + len - self.read_buf.len());
            }
            self.read_more().await?;
        }
    }

    async fn read_more(&mut self) -> Result<()> {
        let n = self.socket.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(())
    }

    /// Buffer a backend message; call [`flush`][PgStream::flush] to send.
    pub fn send<B: BackendProtocol>(&mut self, msg: B) {
        backend::write(msg, &mut self.write_buf);
    }

    /// Write a single raw byte, used only for the SSL probe reply which is
    /// the one unframed byte in the protocol.
    pub async fn send_ssl_reply(&mut self, accept: bool) -> Result<()> {
        self.write_buf.put_u8(if accept { b'S' } else { b'N' });
        self.flush().await
    }

    /// Flush every buffered message to the socket.
    pub async fn flush(&mut self) -> Result<()> {
        self.socket.write_all_buf(&mut self.write_buf).await?;
        self.socket.flush().await?;
        Ok(())
    }

    /// Half-close the write side, letting the peer observe EOF.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.socket.shutdown().await
    }
}
