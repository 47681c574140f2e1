use std::io::{BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use serde::Deserialize;
use serde_json::de::IoRead;
use serde_json::Deserializer;
use tracing::debug;

use crate::command::Frame;
use crate::error::{PmixError, Result};

/// Moves frames between a client and its server.
pub trait Transport {
    /// writes `frame` to the server; failures are reported synchronously
    fn send(&mut self, frame: &Frame) -> Result<()>;

    /// blocks until the next frame from the server arrives
    fn recv(&mut self) -> Result<Frame>;
}

/// `TcpTransport` carries frames over a socket connection to the server
pub struct TcpTransport {
    reader: Deserializer<IoRead<BufReader<TcpStream>>>,
    writer: BufWriter<TcpStream>,
    peer: SocketAddr,
}

impl TcpTransport {
    /// establishes a socket connection to the server at the given `addr`
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let tcp_reader = TcpStream::connect(addr)?;
        let tcp_writer = tcp_reader.try_clone()?;
        let peer = tcp_reader.peer_addr()?;
        debug!("connected to server at {}", peer);

        Ok(TcpTransport {
            reader: Deserializer::from_reader(BufReader::new(tcp_reader)),
            writer: BufWriter::new(tcp_writer),
            peer,
        })
    }

    /// the address of the server
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        serde_json::to_writer(&mut self.writer, frame)
            .map_err(|e| PmixError::LostConnection(e.to_string()))?;
        self.writer
            .flush()
            .map_err(|e| PmixError::LostConnection(e.to_string()))?;
        Ok(())
    }

    fn recv(&mut self) -> Result<Frame> {
        Frame::deserialize(&mut self.reader).map_err(|e| {
            if e.is_eof() || e.is_io() {
                PmixError::LostConnection(format!("{}: {}", self.peer, e))
            } else {
                PmixError::Serde(e)
            }
        })
    }
}
