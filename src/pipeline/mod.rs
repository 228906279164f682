pub mod failure;
pub mod normalizer;
pub mod orchestrator;
pub mod persistence;
pub mod preparation;
pub mod transport;
