//! Star-topology communicator over TCP, one OS process per rank.
//!
//! Rank 0 listens; every other rank connects to it and announces its rank.
//! Frames are a big-endian `u32` length followed by the payload. Broadcasts
//! from a non-zero root are relayed through rank 0; gathers only target
//! rank 0.

use super::comm::Communicator;
use crate::error::{AnnealError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const MAX_FRAME: usize = 1 << 31;
const CONNECT_RETRY: Duration = Duration::from_millis(200);

#[derive(Debug)]
pub struct TcpCommunicator {
    rank: usize,
    size: usize,
    /// On rank 0: one stream per rank (index 0 unused). Elsewhere: the
    /// stream to rank 0 only.
    streams: Vec<Option<TcpStream>>,
}

impl TcpCommunicator {
    /// Rank 0 side: accepts `size - 1` workers on `addr`.
    pub fn listen(addr: SocketAddr, size: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Self::accept_workers(listener, size)
    }

    /// Rank 0 side on an already bound listener.
    pub fn accept_workers(listener: TcpListener, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(AnnealError::config("cluster size must be at least 1"));
        }
        info!(addr = ?listener.local_addr().ok(), size, "waiting for worker ranks");
        let mut streams: Vec<Option<TcpStream>> = (0..size).map(|_| None).collect();
        for _ in 1..size {
            let (mut stream, peer) = listener.accept()?;
            stream.set_nodelay(true)?;
            let mut rank = [0u8; 4];
            stream.read_exact(&mut rank)?;
            let rank = u32::from_be_bytes(rank) as usize;
            if rank == 0 || rank >= size || streams[rank].is_some() {
                return Err(AnnealError::Comm(format!(
                    "peer {peer} announced invalid or duplicate rank {rank}"
                )));
            }
            debug!(rank, %peer, "worker rank connected");
            streams[rank] = Some(stream);
        }
        Ok(Self {
            rank: 0,
            size,
            streams,
        })
    }

    /// Worker side: connects to rank 0, retrying until `timeout` elapses.
    pub fn connect(addr: SocketAddr, rank: usize, size: usize, timeout: Duration) -> Result<Self> {
        if rank == 0 || rank >= size {
            return Err(AnnealError::config(format!(
                "worker rank {rank} out of range for cluster size {size}"
            )));
        }
        let deadline = Instant::now() + timeout;
        let mut stream = loop {
            match TcpStream::connect(addr) {
                Ok(s) => break s,
                Err(e) if Instant::now() < deadline => {
                    debug!(%addr, error = %e, "rank 0 not reachable yet, retrying");
                    thread::sleep(CONNECT_RETRY);
                }
                Err(e) => {
                    return Err(AnnealError::Comm(format!(
                        "could not reach rank 0 at {addr}: {e}"
                    )))
                }
            }
        };
        stream.set_nodelay(true)?;
        stream.write_all(&(rank as u32).to_be_bytes())?;
        Ok(Self {
            rank,
            size,
            streams: vec![Some(stream)],
        })
    }

    fn stream(&mut self, peer: usize) -> Result<&mut TcpStream> {
        let idx = if self.rank == 0 { peer } else { 0 };
        self.streams
            .get_mut(idx)
            .and_then(Option::as_mut)
            .ok_or_else(|| AnnealError::Comm(format!("no connection to rank {peer}")))
    }

    fn send(&mut self, peer: usize, payload: &[u8]) -> Result<()> {
        if payload.len() >= MAX_FRAME {
            return Err(AnnealError::Comm(format!("frame of {} bytes too large", payload.len())));
        }
        let mut frame = BytesMut::with_capacity(4 + payload.len());
        frame.put_u32(payload.len() as u32);
        frame.put_slice(payload);
        self.stream(peer)?
            .write_all(&frame)
            .map_err(|e| AnnealError::Comm(format!("send to rank {peer} failed: {e}")))
    }

    fn recv(&mut self, peer: usize) -> Result<Bytes> {
        let stream = self.stream(peer)?;
        let lost = |e: std::io::Error| AnnealError::Comm(format!("rank {peer} disconnected: {e}"));
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).map_err(lost)?;
        let len = u32::from_be_bytes(len) as usize;
        if len >= MAX_FRAME {
            return Err(AnnealError::Comm(format!(
                "rank {peer} announced a frame of {len} bytes"
            )));
        }
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).map_err(lost)?;
        Ok(Bytes::from(buf))
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast(&mut self, root: usize, data: Option<Bytes>) -> Result<Bytes> {
        if root >= self.size {
            return Err(AnnealError::Comm(format!("root {root} out of range")));
        }
        if self.rank == root {
            let data = data.ok_or_else(|| AnnealError::Comm("broadcast root sent nothing".into()))?;
            if root == 0 {
                for peer in 1..self.size {
                    self.send(peer, &data)?;
                }
            } else {
                self.send(0, &data)?;
            }
            return Ok(data);
        }
        if self.rank == 0 {
            // relay from a non-zero root
            let data = self.recv(root)?;
            for peer in (1..self.size).filter(|&p| p != root) {
                self.send(peer, &data)?;
            }
            return Ok(data);
        }
        self.recv(0)
    }

    fn gather(&mut self, root: usize, data: Bytes) -> Result<Option<Vec<Bytes>>> {
        if root != 0 {
            return Err(AnnealError::Comm("tcp gather only supports root 0".into()));
        }
        if self.rank != 0 {
            self.send(0, &data)?;
            return Ok(None);
        }
        let mut out = Vec::with_capacity(self.size);
        out.push(data);
        for peer in 1..self.size {
            out.push(self.recv(peer)?);
        }
        Ok(Some(out))
    }

    fn abort(&mut self, _reason: &str) {
        // peers see the closed sockets as disconnects
        for s in self.streams.iter_mut().flatten() {
            let _ = s.shutdown(std::net::Shutdown::Both);
        }
    }
}
