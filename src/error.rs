#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RnsError {
    #[error("malformed packet")]
    PacketError,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("cryptographic operation failed")]
    CryptoError,
    #[error("signature or MAC did not verify")]
    IncorrectSignature,
    #[error("hash mismatch")]
    IncorrectHash,
    #[error("buffer exhausted")]
    OutOfMemory,
    #[error("backend connection failed")]
    ConnectionError,
}
