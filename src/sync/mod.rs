//! File synchronization: reconciling asset folders with their desired
//! contents, preview generation, and the background copy worker.

pub mod preview;
pub mod reconcile;
pub mod worker;
