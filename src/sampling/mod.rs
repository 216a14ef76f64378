//! Sampling module - consensus, refinement, blockwise and chain samplers.

mod keywords;
mod consensus;
mod refiner;
mod propose;
mod blockwise;
mod chain;
mod scorer;
mod solver;

pub use keywords::*;
pub use consensus::*;
pub use refiner::*;
pub use propose::*;
pub use blockwise::*;
pub use chain::*;
pub use scorer::*;
pub use solver::*;
