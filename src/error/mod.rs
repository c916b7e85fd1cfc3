//! Set of module Error
pub mod bus;
pub mod engine;
pub mod hashtree;
pub mod live;
pub mod swarm;
pub mod tracker;
