//! Message passing between ranks
//!
//! `Communicator` is the only transport surface the search needs: rank 0
//! broadcasts a payload to every rank and later gathers one payload from each
//! rank, in rank order. Payloads are opaque bytes.

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::error::{BinningError, Result};

pub const ROOT: usize = 0;

pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Deliver the root's payload to every rank. Blocks until the root has
    /// sent. Non-root ranks pass `None`.
    fn broadcast(&self, payload: Option<Vec<u8>>) -> Result<Vec<u8>>;

    /// Collect one payload per rank at the root, ordered by rank. Non-root
    /// ranks receive `None`. The root blocks until every rank has sent.
    fn gather(&self, payload: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>>;

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }
}

/// In-process transport: one communicator per rank, connected by channels.
/// Each rank is expected to run on its own thread.
pub struct ChannelCommunicator {
    rank: usize,
    size: usize,
    bcast_tx: Vec<Sender<Vec<u8>>>,
    bcast_rx: Receiver<Vec<u8>>,
    gather_tx: Sender<(usize, Vec<u8>)>,
    gather_rx: Option<Receiver<(usize, Vec<u8>)>>,
}

impl ChannelCommunicator {
    /// Communicators for ranks `0..size`
    pub fn group(size: usize) -> Vec<ChannelCommunicator> {
        let (bcast_tx, bcast_rx): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        let (gather_tx, gather_rx) = unbounded();
        let mut gather_rx = Some(gather_rx);

        bcast_rx
            .into_iter()
            .enumerate()
            .map(|(rank, rx)| ChannelCommunicator {
                rank,
                size,
                bcast_tx: if rank == ROOT { bcast_tx.clone() } else { Vec::new() },
                bcast_rx: rx,
                gather_tx: gather_tx.clone(),
                gather_rx: if rank == ROOT { gather_rx.take() } else { None },
            })
            .collect()
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast(&self, payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
        if self.is_root() {
            let payload = payload.ok_or_else(|| {
                BinningError::DistributedProtocol("root rank has nothing to broadcast".into())
            })?;
            for (rank, tx) in self.bcast_tx.iter().enumerate().skip(1) {
                tx.send(payload.clone()).map_err(|_| {
                    BinningError::DistributedProtocol(format!("broadcast to rank {} failed", rank))
                })?;
            }
            Ok(payload)
        } else {
            self.bcast_rx.recv().map_err(|_| {
                BinningError::DistributedProtocol(format!("rank {} never received the broadcast", self.rank))
            })
        }
    }

    fn gather(&self, payload: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>> {
        let rx = match &self.gather_rx {
            Some(rx) => rx,
            None => {
                self.gather_tx.send((self.rank, payload)).map_err(|_| {
                    BinningError::DistributedProtocol(format!("rank {} could not reach the root", self.rank))
                })?;
                return Ok(None);
            }
        };

        let mut slots: Vec<Option<Vec<u8>>> = vec![None; self.size];
        slots[ROOT] = Some(payload);
        for _ in 1..self.size {
            let (rank, bytes) = rx
                .recv()
                .map_err(|_| BinningError::DistributedProtocol("a rank left before the gather".into()))?;
            match slots.get_mut(rank) {
                Some(slot) if slot.is_none() => *slot = Some(bytes),
                _ => {
                    return Err(BinningError::DistributedProtocol(format!(
                        "unexpected gather message from rank {}",
                        rank
                    )))
                }
            }
        }
        Ok(Some(slots.into_iter().flatten().collect()))
    }
}

#[cfg(feature = "mpi-support")]
pub use self::mpi_comm::MpiCommunicator;

#[cfg(feature = "mpi-support")]
mod mpi_comm {
    use mpi::datatype::PartitionMut;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use mpi::Count;

    use super::{Communicator, ROOT};
    use crate::error::{BinningError, Result};

    /// MPI transport over a world communicator
    pub struct MpiCommunicator {
        world: SimpleCommunicator,
    }

    impl MpiCommunicator {
        pub fn new(world: SimpleCommunicator) -> Self {
            Self { world }
        }
    }

    impl Communicator for MpiCommunicator {
        fn rank(&self) -> usize {
            self.world.rank() as usize
        }

        fn size(&self) -> usize {
            self.world.size() as usize
        }

        fn broadcast(&self, payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
            let root = self.world.process_at_rank(ROOT as i32);
            if self.is_root() && payload.is_none() {
                return Err(BinningError::DistributedProtocol("root rank has nothing to broadcast".into()));
            }

            let mut len: u64 = payload.as_ref().map_or(0, |p| p.len() as u64);
            root.broadcast_into(&mut len);

            let mut buf = match payload {
                Some(p) if self.is_root() => p,
                _ => vec![0u8; len as usize],
            };
            root.broadcast_into(&mut buf[..]);
            Ok(buf)
        }

        fn gather(&self, payload: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>> {
            let root = self.world.process_at_rank(ROOT as i32);
            let len = Count::try_from(payload.len())
                .map_err(|_| BinningError::DistributedProtocol("gather payload too large".into()))?;

            if !self.is_root() {
                root.gather_into(&len);
                root.gather_varcount_into(&payload[..]);
                return Ok(None);
            }

            let mut counts = vec![0 as Count; self.size()];
            root.gather_into_root(&len, &mut counts[..]);
            let displs: Vec<Count> = counts
                .iter()
                .scan(0, |acc, &c| {
                    let start = *acc;
                    *acc += c;
                    Some(start)
                })
                .collect();
            let total: usize = counts.iter().map(|&c| c as usize).sum();

            let mut buf = vec![0u8; total];
            {
                let mut partition = PartitionMut::new(&mut buf[..], &counts[..], &displs[..]);
                root.gather_varcount_into_root(&payload[..], &mut partition);
            }

            let mut out = Vec::with_capacity(counts.len());
            for (&start, &count) in displs.iter().zip(counts.iter()) {
                let start = start as usize;
                out.push(buf[start..start + count as usize].to_vec());
            }
            Ok(Some(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_broadcast_then_gather_in_rank_order() {
        let comms = ChannelCommunicator::group(4);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let payload = comm.is_root().then(|| b"hello".to_vec());
                    let got = comm.broadcast(payload).unwrap();
                    assert_eq!(got, b"hello");
                    comm.gather(vec![comm.rank() as u8; comm.rank() + 1]).unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let gathered = results[0].clone().unwrap();
        assert_eq!(gathered, vec![vec![0], vec![1, 1], vec![2, 2, 2], vec![3, 3, 3, 3]]);
        assert!(results[1..].iter().all(|r| r.is_none()));
    }

    #[test]
    fn test_single_rank() {
        let comm = ChannelCommunicator::group(1).pop().unwrap();
        assert_eq!(comm.broadcast(Some(vec![1, 2])).unwrap(), vec![1, 2]);
        assert_eq!(comm.gather(vec![9]).unwrap(), Some(vec![vec![9]]));
    }

    #[test]
    fn test_root_must_send() {
        let comm = ChannelCommunicator::group(1).pop().unwrap();
        assert!(matches!(comm.broadcast(None), Err(BinningError::DistributedProtocol(_))));
    }
}
