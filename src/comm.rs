//! Rank-to-rank communication used for distributed equation numbering.
//!
//! The library only ever exchanges equation counts between ranks, so the [`Communicator`]
//! abstraction is restricted to sending and receiving `usize` values. Besides MPI (behind the
//! `mpi` feature), two implementations are provided: [`SerialCommunicator`] for single-process
//! runs and [`ThreadCommunicator`], which connects in-process ranks through channels.
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{channel, Receiver, Sender};

pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Blocking send of a single value to rank `destination`.
    fn send_usize(&self, destination: usize, value: usize) -> Result<()>;

    /// Blocking receive of a single value from rank `source`.
    fn receive_usize(&self, source: usize) -> Result<usize>;

    /// Gathers one value from every rank, ordered by rank, on every rank.
    fn all_gather_usize(&self, value: usize) -> Result<Vec<usize>>;
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send_usize(&self, destination: usize, _value: usize) -> Result<()> {
        Err(Error::Communication(format!(
            "cannot send to rank {destination} from a serial communicator"
        )))
    }

    fn receive_usize(&self, source: usize) -> Result<usize> {
        Err(Error::Communication(format!(
            "cannot receive from rank {source} on a serial communicator"
        )))
    }

    fn all_gather_usize(&self, value: usize) -> Result<Vec<usize>> {
        Ok(vec![value])
    }
}

/// A communicator for ranks living on separate threads of the same process.
///
/// Every ordered pair of ranks is connected by its own channel, so messages between two ranks
/// arrive in the order they were sent.
#[derive(Debug)]
pub struct ThreadCommunicator {
    rank: usize,
    senders: Vec<Sender<usize>>,
    receivers: Vec<Receiver<usize>>,
}

impl ThreadCommunicator {
    /// Creates one communicator per rank. Each must be moved to the thread acting as that rank.
    pub fn create_world(size: usize) -> Vec<Self> {
        assert!(size > 0, "A communicator world needs at least one rank");
        // channels[from][to]
        let mut senders: Vec<Vec<Sender<usize>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers: Vec<Vec<Receiver<usize>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        for from in 0..size {
            for to in 0..size {
                let (sender, receiver) = channel();
                senders[from].push(sender);
                receivers[to].push(receiver);
                debug_assert_eq!(receivers[to].len(), from + 1);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| Self {
                rank,
                senders,
                receivers,
            })
            .collect()
    }

    fn check_peer(&self, peer: usize) -> Result<()> {
        if peer >= self.size() || peer == self.rank {
            Err(Error::Communication(format!(
                "rank {} cannot communicate with rank {peer} in a world of size {}",
                self.rank,
                self.size()
            )))
        } else {
            Ok(())
        }
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn send_usize(&self, destination: usize, value: usize) -> Result<()> {
        self.check_peer(destination)?;
        self.senders[destination]
            .send(value)
            .map_err(|_| Error::Communication(format!("rank {destination} hung up")))
    }

    fn receive_usize(&self, source: usize) -> Result<usize> {
        self.check_peer(source)?;
        self.receivers[source]
            .recv()
            .map_err(|_| Error::Communication(format!("rank {source} hung up")))
    }

    fn all_gather_usize(&self, value: usize) -> Result<Vec<usize>> {
        for peer in (0..self.size()).filter(|&peer| peer != self.rank) {
            self.send_usize(peer, value)?;
        }
        (0..self.size())
            .map(|peer| {
                if peer == self.rank {
                    Ok(value)
                } else {
                    self.receive_usize(peer)
                }
            })
            .collect()
    }
}

#[cfg(feature = "mpi")]
mod mpi_impl {
    use super::Communicator;
    use crate::error::Result;
    use mpi::point_to_point::{Destination, Source};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{Communicator as MpiCommunicator, CommunicatorCollectives};

    impl Communicator for SimpleCommunicator {
        fn rank(&self) -> usize {
            MpiCommunicator::rank(self) as usize
        }

        fn size(&self) -> usize {
            MpiCommunicator::size(self) as usize
        }

        fn send_usize(&self, destination: usize, value: usize) -> Result<()> {
            self.process_at_rank(destination as i32).send(&value);
            Ok(())
        }

        fn receive_usize(&self, source: usize) -> Result<usize> {
            let (value, _status) = self.process_at_rank(source as i32).receive::<usize>();
            Ok(value)
        }

        fn all_gather_usize(&self, value: usize) -> Result<Vec<usize>> {
            let mut values = vec![0usize; Communicator::size(self)];
            self.all_gather_into(&value, &mut values[..]);
            Ok(values)
        }
    }
}

/// How the first global equation number owned by each rank is determined.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffsetStrategy {
    /// Rank `r` blocks until rank `r-1` sends its running total, then forwards its own.
    #[default]
    RankChain,
    /// Every rank gathers all local counts and sums those of lower ranks.
    ExclusiveScan,
}

/// Returns $\sum_{i < r} c_i$ on rank $r$, where $c_i$ is `local_count` on rank $i$.
///
/// Both strategies produce identical offsets. The ascending-rank order of the assignment is
/// observable and preserved.
pub fn exclusive_prefix_sum(
    comm: &dyn Communicator,
    local_count: usize,
    strategy: OffsetStrategy,
) -> Result<usize> {
    match strategy {
        OffsetStrategy::RankChain => chain_exclusive_prefix_sum(comm, local_count),
        OffsetStrategy::ExclusiveScan => {
            let counts = comm.all_gather_usize(local_count)?;
            Ok(counts[..comm.rank()].iter().sum())
        }
    }
}

fn chain_exclusive_prefix_sum(comm: &dyn Communicator, local_count: usize) -> Result<usize> {
    let rank = comm.rank();
    let base = if rank == 0 {
        0
    } else {
        comm.receive_usize(rank - 1)?
    };
    if rank + 1 < comm.size() {
        comm.send_usize(rank + 1, base + local_count)?;
    }
    Ok(base)
}

/// Sums `local_count` over all ranks.
pub fn global_sum(comm: &dyn Communicator, local_count: usize) -> Result<usize> {
    Ok(comm.all_gather_usize(local_count)?.into_iter().sum())
}
