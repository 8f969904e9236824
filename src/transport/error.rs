//! Engine-level error taxonomy. Wraps the codec/crypto-core `RnsError` and
//! adds the kinds that only make sense once tables, interfaces, and links
//! are in play.

use crate::error::RnsError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Core(#[from] RnsError),
    #[error("no known path to destination")]
    UnknownDestination,
    #[error("path table entry expired")]
    PathExpired,
    #[error("link establishment timed out")]
    EstablishmentTimeout,
    #[error("link proof was not received in time")]
    ProofTimeout,
    #[error("resource failed integrity check")]
    IntegrityFailure,
    #[error("resource transfer rejected by receiver")]
    ResourceRejected,
    #[error("resource transfer timed out")]
    ResourceTimeout,
    #[error("interface is down")]
    InterfaceDown,
    #[error("interface access code mismatch")]
    IfacMismatch,
}

/// Silent-drop kinds are logged at debug and never returned to a caller as
/// an engine-fatal error; `is_silent_drop` lets the engine loop decide
/// whether to swallow an error or surface it.
impl TransportError {
    pub fn is_silent_drop(&self) -> bool {
        matches!(
            self,
            TransportError::Core(RnsError::PacketError)
                | TransportError::Core(RnsError::IncorrectSignature)
                | TransportError::Core(RnsError::CryptoError)
                | TransportError::IfacMismatch
        )
    }
}
