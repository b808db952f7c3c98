//! Thread-level coordination of annealing cores.
//!
//! A fixed-size rayon pool runs one [`SerialAnnealer`](crate::sa::SerialAnnealer)
//! per thread. The problem matrices are shared read-only through `Arc`; each
//! core owns its solution and misfit buffers. Work proceeds in rounds
//! separated by a join barrier, and the merged best state is installed on
//! every core before the next round starts.
//!
//! # Key Types
//!
//! - [`ThreadedConfig`]: thread count, round budget, merge mode, checkpoints
//! - [`ThreadedAnnealer`]: the round loop, itself an [`Annealer`](crate::sa::Annealer)
//!
//! # References
//!
//! - Ram, Sreenivas & Subramaniam (1996), "Parallel Simulated Annealing Algorithms"
//! - Page et al. (2014), "The UCERF3 Grand Inversion: Solving for the Long-Term
//!   Rate of Ruptures in a Fault System"

mod config;
pub mod merge;
mod runner;

pub use config::{parse_threads, Checkpoint, ThreadedConfig};
pub use runner::{checkpoint_path, ThreadedAnnealer};
