use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MintError>;

/// Every failure surfaced by the mint, each carrying a stable snake_case code
/// reported to clients alongside an HTTP status.
#[derive(Error, Debug)]
pub enum MintError {
    #[error("The asset you provided is invalid: {0}")]
    AssetInvalid(String),

    #[error("The pair you provided is invalid: {0}")]
    PairInvalid(String),

    #[error("The source address you provided is invalid: {0}")]
    SourceInvalid(String),

    #[error("The destination address you provided is invalid: {0}")]
    DestinationInvalid(String),

    #[error("The amount you provided is invalid: {0}")]
    AmountInvalid(String),

    #[error("The offer you provided is invalid: {0}")]
    OfferInvalid(String),

    #[error("The operation is invalid: {0}")]
    OperationInvalid(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Offer not found: {0}")]
    OfferNotFound(String),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Balance not found: {0}")]
    BalanceNotFound(String),

    #[error("You can only operate on assets created by the account you are authenticated with: {0}")]
    OperationNotAuthorized(String),

    #[error("Insufficient offer remainder: required {required}, available {available}")]
    OfferInsufficient { required: String, available: String },

    #[error("The transaction failed: {0}")]
    TransactionFailed(String),

    #[error("The transaction expired: {0}")]
    TransactionExpired(String),

    #[error("The transaction is already settled: {0}")]
    TransactionSettled(String),

    #[error("The lock you provided is invalid: {0}")]
    LockInvalid(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MintError {
    /// Stable snake_case code of the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            MintError::AssetInvalid(_) => "asset_invalid",
            MintError::PairInvalid(_) => "pair_invalid",
            MintError::SourceInvalid(_) => "source_invalid",
            MintError::DestinationInvalid(_) => "destination_invalid",
            MintError::AmountInvalid(_) => "amount_invalid",
            MintError::OfferInvalid(_) => "offer_invalid",
            MintError::OperationInvalid(_) => "operation_invalid",
            MintError::AssetNotFound(_) => "asset_not_found",
            MintError::OfferNotFound(_) => "offer_not_found",
            MintError::OperationNotFound(_) => "operation_not_found",
            MintError::TransactionNotFound(_) => "transaction_not_found",
            MintError::BalanceNotFound(_) => "balance_not_found",
            MintError::OperationNotAuthorized(_) => "operation_not_authorized",
            MintError::OfferInsufficient { .. } => "offer_insufficient",
            MintError::TransactionFailed(_) => "transaction_failed",
            MintError::TransactionExpired(_) => "transaction_expired",
            MintError::TransactionSettled(_) => "transaction_settled",
            MintError::LockInvalid(_) => "lock_invalid",
            MintError::Database(_) | MintError::Transport(_) | MintError::Internal(_) => "internal",
        }
    }

    /// True for the not-found family, which cancel walks tolerate: a mint
    /// that never stored the transaction has nothing to reverse.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MintError::AssetNotFound(_)
                | MintError::OfferNotFound(_)
                | MintError::OperationNotFound(_)
                | MintError::TransactionNotFound(_)
                | MintError::BalanceNotFound(_)
        )
    }
}

impl ResponseError for MintError {
    fn status_code(&self) -> StatusCode {
        match self {
            MintError::AssetInvalid(_)
            | MintError::PairInvalid(_)
            | MintError::SourceInvalid(_)
            | MintError::DestinationInvalid(_)
            | MintError::AmountInvalid(_)
            | MintError::OfferInvalid(_)
            | MintError::OperationInvalid(_)
            | MintError::OperationNotAuthorized(_)
            | MintError::TransactionExpired(_)
            | MintError::TransactionSettled(_)
            | MintError::LockInvalid(_) => StatusCode::BAD_REQUEST,

            MintError::AssetNotFound(_)
            | MintError::OfferNotFound(_)
            | MintError::OperationNotFound(_)
            | MintError::TransactionNotFound(_)
            | MintError::BalanceNotFound(_) => StatusCode::NOT_FOUND,

            MintError::OfferInsufficient { .. } | MintError::TransactionFailed(_) => {
                StatusCode::PAYMENT_REQUIRED
            }

            MintError::Database(_) | MintError::Transport(_) | MintError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }))
    }
}
