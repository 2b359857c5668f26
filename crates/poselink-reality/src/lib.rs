//! poselink-reality: provider lifecycle for the manager. Keeps a registry of
//! provider-type handlers, tracks which provider each managed peer would
//! like active, runs the fixed-priority selection policy, and swaps
//! providers connect-before-close so there is never a visible gap.

pub mod error;
pub mod provider;
pub mod selector;

pub use error::RealityError;
pub use provider::{ProviderDescriptor, ProviderHandler};
pub use selector::{
    ForwardTarget, RealitySelector, SelectorConfig, SelectorEvent, SelectorState,
};
