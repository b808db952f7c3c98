//! Collective operations between ranks.

use crate::error::{AnnealError, Result};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};

/// The two collectives the distributed coordinator needs.
///
/// Every rank must call the same collectives in the same order. A failure
/// on any rank surfaces as [`AnnealError::Comm`] on the others.
pub trait Communicator: Send {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Sends `data` from `root` to every rank and returns it on all of them.
    ///
    /// Only the root passes `Some`.
    fn broadcast(&mut self, root: usize, data: Option<Bytes>) -> Result<Bytes>;

    /// Collects one payload per rank on `root`, in rank order.
    ///
    /// Returns `Some` on the root and `None` elsewhere.
    fn gather(&mut self, root: usize, data: Bytes) -> Result<Option<Vec<Bytes>>>;

    /// Tells the other ranks this one is giving up. Best effort.
    fn abort(&mut self, _reason: &str) {}
}

#[derive(Debug)]
enum Envelope {
    Data { from: usize, payload: Bytes },
    Abort { from: usize, reason: String },
}

/// One rank of an in-process cluster. Ranks talk over channels, so each
/// rank normally runs on its own thread.
#[derive(Debug)]
pub struct LocalCluster {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    pending: Vec<VecDeque<Bytes>>,
}

impl LocalCluster {
    /// Creates `size` connected ranks, indexed by rank.
    pub fn new(size: usize) -> Vec<LocalCluster> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalCluster {
                rank,
                peers: senders.clone(),
                inbox,
                pending: vec![VecDeque::new(); size],
            })
            .collect()
    }

    fn send(&self, to: usize, payload: Bytes) -> Result<()> {
        self.peers[to]
            .send(Envelope::Data {
                from: self.rank,
                payload,
            })
            .map_err(|_| AnnealError::Comm(format!("rank {to} disconnected")))
    }

    /// Next payload from `from`, buffering anything that arrives from other
    /// ranks in the meantime.
    fn recv_from(&mut self, from: usize) -> Result<Bytes> {
        if let Some(b) = self.pending[from].pop_front() {
            return Ok(b);
        }
        loop {
            match self.inbox.recv() {
                Ok(Envelope::Data { from: src, payload }) if src == from => return Ok(payload),
                Ok(Envelope::Data { from: src, payload }) => self.pending[src].push_back(payload),
                Ok(Envelope::Abort { from: src, reason }) => {
                    return Err(AnnealError::Comm(format!("rank {src} aborted: {reason}")))
                }
                Err(_) => return Err(AnnealError::Comm("all peers disconnected".into())),
            }
        }
    }

    fn check_rank(&self, root: usize) -> Result<()> {
        if root >= self.size() {
            return Err(AnnealError::Comm(format!(
                "root {root} out of range for {} ranks",
                self.size()
            )));
        }
        Ok(())
    }
}

impl Communicator for LocalCluster {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn broadcast(&mut self, root: usize, data: Option<Bytes>) -> Result<Bytes> {
        self.check_rank(root)?;
        if self.rank == root {
            let data = data.ok_or_else(|| AnnealError::Comm("broadcast root sent nothing".into()))?;
            for to in (0..self.size()).filter(|&r| r != root) {
                self.send(to, data.clone())?;
            }
            Ok(data)
        } else {
            self.recv_from(root)
        }
    }

    fn gather(&mut self, root: usize, data: Bytes) -> Result<Option<Vec<Bytes>>> {
        self.check_rank(root)?;
        if self.rank != root {
            self.send(root, data)?;
            return Ok(None);
        }
        let mut out = Vec::with_capacity(self.size());
        for from in 0..self.size() {
            if from == root {
                out.push(data.clone());
            } else {
                out.push(self.recv_from(from)?);
            }
        }
        Ok(Some(out))
    }

    fn abort(&mut self, reason: &str) {
        for (to, peer) in self.peers.iter().enumerate() {
            if to != self.rank {
                let _ = peer.send(Envelope::Abort {
                    from: self.rank,
                    reason: reason.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_broadcast_and_gather() {
        let ranks = LocalCluster::new(4);
        let results: Vec<(Bytes, Option<Vec<Bytes>>)> = thread::scope(|s| {
            let handles: Vec<_> = ranks
                .into_iter()
                .map(|mut c| {
                    s.spawn(move || {
                        let root_data = (c.rank() == 2).then(|| Bytes::from_static(b"hello"));
                        let got = c.broadcast(2, root_data).unwrap();
                        let mine = Bytes::from(vec![c.rank() as u8]);
                        let gathered = c.gather(0, mine).unwrap();
                        (got, gathered)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for (rank, (got, gathered)) in results.iter().enumerate() {
            assert_eq!(&got[..], b"hello");
            if rank == 0 {
                let g = gathered.as_ref().unwrap();
                let firsts: Vec<u8> = g.iter().map(|b| b[0]).collect();
                assert_eq!(firsts, vec![0, 1, 2, 3]);
            } else {
                assert!(gathered.is_none());
            }
        }
    }

    #[test]
    fn test_back_to_back_gathers_stay_ordered() {
        let ranks = LocalCluster::new(3);
        let root = thread::scope(|s| {
            let handles: Vec<_> = ranks
                .into_iter()
                .map(|mut c| {
                    s.spawn(move || {
                        let mut rounds = Vec::new();
                        for round in 0..5u8 {
                            let g = c.gather(0, Bytes::from(vec![round, c.rank() as u8])).unwrap();
                            rounds.push(g);
                        }
                        rounds
                    })
                })
                .collect();
            let mut all: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            all.swap_remove(0)
        });
        for (round, g) in root.into_iter().enumerate() {
            for (rank, b) in g.unwrap().iter().enumerate() {
                assert_eq!(&b[..], &[round as u8, rank as u8]);
            }
        }
    }

    #[test]
    fn test_abort_reaches_waiting_peer() {
        let mut ranks = LocalCluster::new(2);
        let mut one = ranks.pop().unwrap();
        let mut zero = ranks.pop().unwrap();
        one.abort("worker failed");
        let err = zero.broadcast(1, None).unwrap_err();
        assert!(err.to_string().contains("worker failed"), "{err}");
    }

    #[test]
    fn test_single_rank() {
        let mut c = LocalCluster::new(1).pop().unwrap();
        assert_eq!(&c.broadcast(0, Some(Bytes::from_static(b"x"))).unwrap()[..], b"x");
        assert_eq!(c.gather(0, Bytes::from_static(b"y")).unwrap().unwrap().len(), 1);
    }
}
