use thiserror::Error;

use poselink_session::SessionError;

/// Selection and configuration mistakes are hard errors; provider churn at
/// runtime is not (it re-enters selection instead).
#[derive(Debug, Error)]
pub enum RealityError {
    #[error("no provider handler registered for type '{0}'")]
    UnsupportedProviderType(String),
    #[error("peer '{0}' is not managed by this selector")]
    UnknownPeer(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}
