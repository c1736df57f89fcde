//! Inter-mint transport. Every verb is a pull: the receiving mint fetches the
//! canonical snapshot from the mint named in the entity id and updates its
//! propagated copy, which makes the verbs idempotent and replay-safe.
//!
//! The trait seam lets functional tests install an in-process router in place
//! of the HTTP client.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::errors::{MintError, Result};
use crate::models::{BalanceResource, OfferResource, OperationResource, TransactionResource};

#[async_trait]
pub trait MintTransport: Send + Sync {
    async fn retrieve_offer(&self, host: &str, id: &str) -> Result<OfferResource>;
    async fn retrieve_operation(&self, host: &str, id: &str) -> Result<OperationResource>;
    async fn retrieve_transaction(&self, host: &str, id: &str) -> Result<TransactionResource>;
    async fn retrieve_balance(
        &self,
        host: &str,
        asset: &str,
        holder: &str,
    ) -> Result<BalanceResource>;

    /// Asks `host` to refresh its propagated copy of the offer.
    async fn propagate_offer(&self, host: &str, id: &str) -> Result<()>;

    /// Asks `host` to refresh its propagated copy of the operation and of the
    /// balances it settled for holders homed there.
    async fn propagate_operation(&self, host: &str, id: &str) -> Result<()>;

    /// Asks `host` to reserve the transaction's hops starting at `hop`,
    /// recursing to the next mint along the path.
    async fn propagate_transaction(
        &self,
        host: &str,
        id: &str,
        lock: &str,
        hop: usize,
    ) -> Result<TransactionResource>;

    /// Asks `host` to flip its reserved rows for the transaction to settled.
    async fn settle_transaction(&self, host: &str, id: &str, lock: &str) -> Result<()>;

    /// Asks `host` to reverse its reserved rows for the transaction.
    async fn cancel_transaction(&self, host: &str, id: &str, lock: &str) -> Result<()>;
}

#[derive(Deserialize)]
struct OfferEnvelope {
    offer: OfferResource,
}

#[derive(Deserialize)]
struct OperationEnvelope {
    operation: OperationResource,
}

#[derive(Deserialize)]
struct TransactionEnvelope {
    transaction: TransactionResource,
}

#[derive(Deserialize)]
struct BalanceEnvelope {
    balance: BalanceResource,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

pub struct HttpMintTransport {
    client: reqwest::Client,
}

impl HttpMintTransport {
    pub fn new(timeout_secs: u64) -> HttpMintTransport {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        HttpMintTransport { client }
    }

    fn url(&self, host: &str, path: &str) -> String {
        format!("http://{}{}", host, path)
    }

    async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| MintError::Transport(format!("decoding response: {}", e)));
        }
        let envelope = response.json::<ErrorEnvelope>().await.map_err(|e| {
            MintError::Transport(format!("remote returned {} with opaque body: {}", status, e))
        })?;
        Err(remote_error(status, envelope.error))
    }

    async fn get<T: DeserializeOwned>(&self, host: &str, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(host, path))
            .send()
            .await
            .map_err(|e| MintError::Transport(format!("GET {}{}: {}", host, path, e)))?;
        self.decode(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        host: &str,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.url(host, path))
            .json(&body)
            .send()
            .await
            .map_err(|e| MintError::Transport(format!("POST {}{}: {}", host, path, e)))?;
        self.decode(response).await
    }
}

/// Maps a remote error envelope back onto the local error kinds the
/// coordinator distinguishes; anything unrecognized stays a transport error.
fn remote_error(status: StatusCode, body: ErrorBody) -> MintError {
    match body.code.as_str() {
        "asset_not_found" => MintError::AssetNotFound(body.message),
        "offer_not_found" => MintError::OfferNotFound(body.message),
        "operation_not_found" => MintError::OperationNotFound(body.message),
        "transaction_not_found" => MintError::TransactionNotFound(body.message),
        "balance_not_found" => MintError::BalanceNotFound(body.message),
        "offer_insufficient" | "transaction_failed" => MintError::TransactionFailed(body.message),
        "transaction_expired" => MintError::TransactionExpired(body.message),
        "transaction_settled" => MintError::TransactionSettled(body.message),
        "lock_invalid" => MintError::LockInvalid(body.message),
        _ => MintError::Transport(format!("{}: {}: {}", status, body.code, body.message)),
    }
}

/// Entity ids and asset names carry `@`, `[` and `]`, which must not appear
/// raw in a URL path segment.
pub fn encode_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'@' => out.push_str("%40"),
            b'[' => out.push_str("%5B"),
            b']' => out.push_str("%5D"),
            _ => out.push(b as char),
        }
    }
    out
}

#[async_trait]
impl MintTransport for HttpMintTransport {
    async fn retrieve_offer(&self, host: &str, id: &str) -> Result<OfferResource> {
        let envelope: OfferEnvelope = self
            .get(host, &format!("/offers/{}", encode_segment(id)))
            .await?;
        Ok(envelope.offer)
    }

    async fn retrieve_operation(&self, host: &str, id: &str) -> Result<OperationResource> {
        let envelope: OperationEnvelope = self
            .get(host, &format!("/operations/{}", encode_segment(id)))
            .await?;
        Ok(envelope.operation)
    }

    async fn retrieve_transaction(&self, host: &str, id: &str) -> Result<TransactionResource> {
        let envelope: TransactionEnvelope = self
            .get(host, &format!("/transactions/{}", encode_segment(id)))
            .await?;
        Ok(envelope.transaction)
    }

    async fn retrieve_balance(
        &self,
        host: &str,
        asset: &str,
        holder: &str,
    ) -> Result<BalanceResource> {
        let envelope: BalanceEnvelope = self
            .get(
                host,
                &format!(
                    "/assets/{}/balances/{}",
                    encode_segment(asset),
                    encode_segment(holder)
                ),
            )
            .await?;
        Ok(envelope.balance)
    }

    async fn propagate_offer(&self, host: &str, id: &str) -> Result<()> {
        let _: OfferEnvelope = self
            .post(
                host,
                &format!("/offers/{}/propagate", encode_segment(id)),
                json!({}),
            )
            .await?;
        Ok(())
    }

    async fn propagate_operation(&self, host: &str, id: &str) -> Result<()> {
        let _: OperationEnvelope = self
            .post(
                host,
                &format!("/operations/{}/propagate", encode_segment(id)),
                json!({}),
            )
            .await?;
        Ok(())
    }

    async fn propagate_transaction(
        &self,
        host: &str,
        id: &str,
        lock: &str,
        hop: usize,
    ) -> Result<TransactionResource> {
        let envelope: TransactionEnvelope = self
            .post(
                host,
                &format!("/transactions/{}/propagate", encode_segment(id)),
                json!({ "lock": lock, "hop": hop }),
            )
            .await?;
        Ok(envelope.transaction)
    }

    async fn settle_transaction(&self, host: &str, id: &str, lock: &str) -> Result<()> {
        let _: TransactionEnvelope = self
            .post(
                host,
                &format!("/transactions/{}/settle", encode_segment(id)),
                json!({ "lock": lock }),
            )
            .await?;
        Ok(())
    }

    async fn cancel_transaction(&self, host: &str, id: &str, lock: &str) -> Result<()> {
        let _: TransactionEnvelope = self
            .post(
                host,
                &format!("/transactions/{}/cancel", encode_segment(id)),
                json!({ "lock": lock }),
            )
            .await?;
        Ok(())
    }
}
