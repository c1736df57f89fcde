//! Applies a single operation (issuance / annihilation / transfer) to the
//! affected balances, and reverses reserved operations on expiration.
//!
//! The issuer's balance of its own asset is implicit: crediting or debiting
//! the asset owner mutates no stored row, which is what makes issuance and
//! annihilation plain operations with one endpoint missing.

use sqlx::SqliteConnection;

use mint_core::{Address, Amount, AssetName, EntityId};

use crate::database;
use crate::errors::{MintError, Result};
use crate::models::{Operation, PropagationType, TxStatus};

pub struct OperationParams<'a> {
    /// The asset's issuer; also the operation's owner.
    pub owner: &'a Address,
    pub asset: &'a AssetName,
    pub source: Option<&'a Address>,
    pub destination: Option<&'a Address>,
    pub amount: Amount,
    pub status: TxStatus,
    pub transaction: Option<(&'a EntityId, i64)>,
    pub created: i64,
}

/// Mutates the affected balances and writes the operation row, all inside the
/// caller's session. Any failure leaves the session to roll back as a whole.
pub async fn apply(conn: &mut SqliteConnection, params: OperationParams<'_>) -> Result<Operation> {
    if params.source.is_none() && params.destination.is_none() {
        return Err(MintError::OperationInvalid(
            "an operation requires a source (annihilation), a destination \
             (issuance) or both (transfer)"
                .to_string(),
        ));
    }

    // The issuer's balance is implicit; only non-issuer endpoints touch rows.
    let stored_source = params.source.filter(|s| **s != params.asset.owner);
    let stored_destination = params.destination.filter(|d| **d != params.asset.owner);

    match (stored_source, stored_destination) {
        // A self-transfer moves nothing, but the holder must still cover the
        // amount out of the pre-operation balance.
        (Some(source), Some(destination)) if source == destination => {
            let balance = database::load_balance(
                conn,
                params.asset,
                source,
                PropagationType::Canonical,
            )
            .await?
            .ok_or_else(|| {
                MintError::SourceInvalid(format!(
                    "the source address has no balance of {}: {}",
                    params.asset, source
                ))
            })?;
            balance.value.checked_sub(params.amount).map_err(|_| {
                MintError::AmountInvalid(format!(
                    "insufficient balance of {} for {}: has {}, needs {}",
                    params.asset, source, balance.value, params.amount
                ))
            })?;
        }
        (source, destination) => {
            // Debit first: the source check must run against the balance as
            // it stood before this operation.
            if let Some(source) = source {
                let mut balance = database::load_balance(
                    conn,
                    params.asset,
                    source,
                    PropagationType::Canonical,
                )
                .await?
                .ok_or_else(|| {
                    MintError::SourceInvalid(format!(
                        "the source address has no balance of {}: {}",
                        params.asset, source
                    ))
                })?;
                balance.value = balance.value.checked_sub(params.amount).map_err(|_| {
                    MintError::AmountInvalid(format!(
                        "insufficient balance of {} for {}: has {}, needs {}",
                        params.asset, source, balance.value, params.amount
                    ))
                })?;
                database::save_balance(conn, &balance).await?;
            }
            if let Some(destination) = destination {
                let mut balance = database::load_or_create_balance(
                    conn,
                    params.asset,
                    destination,
                    params.created,
                )
                .await?;
                balance.value = balance.value.checked_add(params.amount).map_err(|_| {
                    MintError::AmountInvalid(format!(
                        "resulting balance of {} for {} exceeds the valid range",
                        params.asset, destination
                    ))
                })?;
                database::save_balance(conn, &balance).await?;
            }
        }
    }

    let operation = Operation {
        id: EntityId::generate(params.owner.clone(), "operation"),
        owner: params.owner.clone(),
        asset: params.asset.clone(),
        source: params.source.cloned(),
        destination: params.destination.cloned(),
        amount: params.amount,
        status: params.status,
        transaction: params.transaction.map(|(id, _)| id.clone()),
        transaction_hop: params.transaction.map(|(_, hop)| hop),
        created: params.created,
        propagation: PropagationType::Canonical,
    };
    database::save_operation(conn, &operation).await?;
    Ok(operation)
}

/// Reverses a reserved operation's balance mutations: the source is credited
/// back and the destination debited. Used by expiration and cancel; callers
/// guarantee the operation is still `reserved`.
pub async fn reverse(conn: &mut SqliteConnection, operation: &Operation) -> Result<()> {
    if let Some(source) = &operation.source {
        if *source != operation.asset.owner {
            let mut balance = database::load_balance(
                conn,
                &operation.asset,
                source,
                PropagationType::Canonical,
            )
            .await?
            .ok_or_else(|| {
                MintError::Internal(format!(
                    "missing balance of {} for reserved source {}",
                    operation.asset, source
                ))
            })?;
            balance.value = balance
                .value
                .checked_add(operation.amount)
                .map_err(|e| MintError::Internal(format!("restoring source balance: {}", e)))?;
            database::save_balance(conn, &balance).await?;
        }
    }

    if let Some(destination) = &operation.destination {
        if *destination != operation.asset.owner {
            let mut balance = database::load_balance(
                conn,
                &operation.asset,
                destination,
                PropagationType::Canonical,
            )
            .await?
            .ok_or_else(|| {
                MintError::Internal(format!(
                    "missing balance of {} for reserved destination {}",
                    operation.asset, destination
                ))
            })?;
            balance.value = balance
                .value
                .checked_sub(operation.amount)
                .map_err(|e| MintError::Internal(format!("restoring destination balance: {}", e)))?;
            database::save_balance(conn, &balance).await?;
        }
    }

    Ok(())
}
