use thiserror::Error;

/// Parse and arithmetic failures on domain primitives. Call sites map these
/// onto the stable user-facing error codes (`pair_invalid`, `amount_invalid`,
/// ...) depending on which input was being validated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid asset name: {0}")]
    InvalidAssetName(String),

    #[error("invalid asset pair: {0}")]
    InvalidPair(String),

    #[error("invalid entity id: {0}")]
    InvalidId(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("amount out of range: {0}")]
    AmountOverflow(String),

    #[error("invalid price: {0}")]
    InvalidPrice(String),
}
