//! Concrete [`e84_core::LineTransport`] over a TCP socket. A real serial
//! driver is out of scope for this core (spec §1) — most ASCII-handshake
//! load ports on the floor are in fact reached over a terminal server or
//! simulator listening on TCP, so this is the realistic stand-in rather
//! than a bespoke serial crate.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use e84_core::{Error, LineTransport, TransportError};

pub struct TcpLineTransport {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl TcpLineTransport {
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, writer) = stream.into_split();
        Ok(Self { reader: BufReader::new(read_half), writer })
    }
}

#[async_trait]
impl LineTransport for TcpLineTransport {
    async fn send_line(&mut self, line: &str) -> Result<String, Error> {
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Transport(TransportError::SerialFraming(e.to_string())))?;

        let mut response = String::new();
        self.reader
            .read_line(&mut response)
            .await
            .map_err(|_| Error::Transport(TransportError::SerialTimeout))?;

        let trimmed = response.trim_end_matches(['\r', '\n']).to_string();
        if trimmed.is_empty() {
            return Err(Error::Transport(TransportError::SerialTimeout));
        }
        Ok(trimmed)
    }
}
