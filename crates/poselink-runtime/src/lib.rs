//! poselink-runtime: composition layer. Wires session ports, the context
//! synchronizer, and the reality selector into a manager process and an
//! augmenter process, pumped from a single-threaded tick loop.

pub mod augmenter;
pub mod manager;

pub use augmenter::AugmenterRuntime;
pub use manager::{ManagerError, ManagerRuntime};
