pub mod classify;
pub mod encrypted;
pub mod inflight;
pub mod item;
pub mod journal;
pub mod paths;
pub mod propagator;
pub mod remote_delete;
pub mod transport;
