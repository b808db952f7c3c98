//! Process-level coordination across cluster ranks.
//!
//! Same round structure as the threaded coordinator, but ranks share no
//! memory: each round is a broadcast of the start counters, local
//! annealing, a gather of round reports on rank 0, a broadcast of the
//! winning rank and a broadcast of the winner's best state. After every
//! round all ranks hold identical best states.
//!
//! # Key Types
//!
//! - [`Communicator`]: broadcast and gather between ranks
//! - [`LocalCluster`]: in-process ranks over channels
//! - [`TcpCommunicator`]: one process per rank, star topology through rank 0
//! - [`DistributedAnnealer`]: the rank loop around any [`Annealer`](crate::sa::Annealer)

mod comm;
mod config;
pub mod message;
mod runner;
mod tcp;

pub use comm::{Communicator, LocalCluster};
pub use config::DistributedConfig;
pub use runner::DistributedAnnealer;
pub use tcp::TcpCommunicator;
