//! Expands a transaction request into its hop list: which operations and
//! crossings to create, with which amounts, and which mint owns each hop.
//!
//! Amounts are computed walking the path from the destination back to the
//! source: the running amount starts at the transaction amount in quote units
//! and each offer transforms it by `ceil(a * p / q)`, so every upstream hop
//! covers at least its downstream target.

use mint_core::{Address, Amount, AssetName};

use crate::database::{self, Database};
use crate::errors::{MintError, Result};
use crate::models::{Offer, Transaction};
use crate::propagation::MintTransport;

#[derive(Debug, Clone)]
pub struct PlannedOperation {
    pub asset: AssetName,
    pub source: Address,
    pub destination: Address,
    pub amount: Amount,
}

#[derive(Debug, Clone)]
pub struct PlannedCrossing {
    pub offer: Offer,
    pub amount: Amount,
}

#[derive(Debug, Clone)]
pub enum HopKind {
    Operation(PlannedOperation),
    Crossing(PlannedCrossing),
}

#[derive(Debug, Clone)]
pub struct PlanHop {
    pub index: i64,
    /// The mint authoritative for this hop: the asset owner's host for
    /// operations, the offer owner's host for crossings.
    pub host: String,
    pub kind: HopKind,
}

#[derive(Debug, Clone)]
pub struct TransactionPlan {
    pub hops: Vec<PlanHop>,
}

impl TransactionPlan {
    /// Index just past the contiguous run of hops owned by `host`, starting
    /// at `start`. Applies nothing when `start` is not owned by `host`.
    pub fn segment_end(&self, start: usize, host: &str) -> usize {
        let mut i = start;
        while i < self.hops.len() && self.hops[i].host == host {
            i += 1;
        }
        i
    }
}

/// The mints a transaction touches, one entry per contiguous hop segment, in
/// path order. Derivable without resolving offers: every operation after hop
/// 0 lives on the mint of the preceding offer's base issuer, which is the
/// offer's own mint.
pub fn transaction_hosts(transaction: &Transaction) -> Vec<String> {
    let mut hosts = Vec::with_capacity(transaction.path.len() + 2);
    hosts.push(transaction.pair.base.owner.host.clone());
    for offer in &transaction.path {
        hosts.push(offer.host().to_string());
    }
    hosts.push(transaction.pair.quote.owner.host.clone());
    hosts.dedup();
    hosts
}

/// Resolves one path offer: the locally stored copy when present, otherwise
/// the canonical snapshot pulled from the owning mint. Planning never writes.
async fn resolve_offer(
    db: &Database,
    transport: &dyn MintTransport,
    self_host: &str,
    id: &mint_core::EntityId,
) -> Result<Offer> {
    let mut conn = db.acquire().await?;
    if let Some(offer) = database::load_offer(&mut conn, id).await? {
        return Ok(offer);
    }
    drop(conn);

    if id.host() == self_host {
        return Err(MintError::OfferNotFound(id.to_string()));
    }
    let snapshot = transport.retrieve_offer(id.host(), &id.to_string()).await?;
    if snapshot.id != *id {
        return Err(MintError::OfferInvalid(format!(
            "the mint at {} answered for a different offer: {}",
            id.host(),
            snapshot.id
        )));
    }
    Ok(Offer::from_resource(
        snapshot,
        crate::models::PropagationType::Propagated,
    ))
}

pub async fn plan(
    db: &Database,
    transport: &dyn MintTransport,
    self_host: &str,
    transaction: &Transaction,
) -> Result<TransactionPlan> {
    let path_len = transaction.path.len();

    if path_len == 0 {
        if transaction.pair.base != transaction.pair.quote {
            return Err(MintError::PairInvalid(format!(
                "a transaction without a path requires base and quote to be \
                 the same asset: {}",
                transaction.pair
            )));
        }
        let asset = transaction.pair.base.clone();
        let host = asset.owner.host.clone();
        return Ok(TransactionPlan {
            hops: vec![PlanHop {
                index: 0,
                host,
                kind: HopKind::Operation(PlannedOperation {
                    asset,
                    source: transaction.owner.clone(),
                    destination: transaction.destination.clone(),
                    amount: transaction.amount,
                }),
            }],
        });
    }

    let mut offers = Vec::with_capacity(path_len);
    for id in &transaction.path {
        offers.push(resolve_offer(db, transport, self_host, id).await?);
    }

    // The asset chain: base, then each offer's base, ending at quote. Each
    // offer receives the previous asset as its quote and emits its base.
    let mut assets: Vec<AssetName> = Vec::with_capacity(path_len + 1);
    assets.push(transaction.pair.base.clone());
    for (i, offer) in offers.iter().enumerate() {
        if offer.pair.quote != assets[i] {
            return Err(MintError::OfferInvalid(format!(
                "offer {} quotes {} where the path requires {}",
                offer.id, offer.pair.quote, assets[i]
            )));
        }
        assets.push(offer.pair.base.clone());
    }
    if assets[path_len] != transaction.pair.quote {
        return Err(MintError::OfferInvalid(format!(
            "offer {} emits {} where the pair requires {}",
            offers[path_len - 1].id,
            assets[path_len],
            transaction.pair.quote
        )));
    }

    // Amounts, destination first.
    let mut operation_amounts = vec![Amount::ZERO; path_len + 1];
    let mut crossing_amounts = vec![Amount::ZERO; path_len];
    let mut running = transaction.amount;
    operation_amounts[path_len] = running;
    for i in (0..path_len).rev() {
        let required = running
            .scale_ceil(&offers[i].price)
            .map_err(|e| MintError::AmountInvalid(e.to_string()))?;
        // Advisory availability check against the closest copy; the owning
        // mint's atomic decrement is authoritative at reservation.
        if offers[i].remainder < required {
            return Err(MintError::TransactionFailed(format!(
                "offer {} remainder {} is below the required {}",
                offers[i].id, offers[i].remainder, required
            )));
        }
        crossing_amounts[i] = required;
        operation_amounts[i] = required;
        running = required;
    }

    let mut hops = Vec::with_capacity(2 * path_len + 1);
    hops.push(PlanHop {
        index: 0,
        host: assets[0].owner.host.clone(),
        kind: HopKind::Operation(PlannedOperation {
            asset: assets[0].clone(),
            source: transaction.owner.clone(),
            destination: offers[0].owner.clone(),
            amount: operation_amounts[0],
        }),
    });
    for i in 0..path_len {
        hops.push(PlanHop {
            index: (2 * i + 1) as i64,
            host: offers[i].owner.host.clone(),
            kind: HopKind::Crossing(PlannedCrossing {
                offer: offers[i].clone(),
                amount: crossing_amounts[i],
            }),
        });
        let destination = if i + 1 < path_len {
            offers[i + 1].owner.clone()
        } else {
            transaction.destination.clone()
        };
        hops.push(PlanHop {
            index: (2 * i + 2) as i64,
            host: assets[i + 1].owner.host.clone(),
            kind: HopKind::Operation(PlannedOperation {
                asset: assets[i + 1].clone(),
                source: offers[i].owner.clone(),
                destination,
                amount: operation_amounts[i + 1],
            }),
        });
    }

    Ok(TransactionPlan { hops })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mint_core::{Address, AssetPair, EntityId};
    use std::str::FromStr;

    #[test]
    fn transaction_hosts_dedups_consecutive_segments() {
        let tx = Transaction {
            id: EntityId::from_str("u0@m0[transaction_a1]").unwrap(),
            owner: Address::from_str("u0@m0").unwrap(),
            pair: AssetPair::from_str("u0@m0[USD.2]/u2@m2[USD.2]").unwrap(),
            amount: Amount::new(10),
            destination: Address::from_str("u2@m2").unwrap(),
            path: vec![
                EntityId::from_str("u1@m1[offer_b2]").unwrap(),
                EntityId::from_str("u2@m2[offer_c3]").unwrap(),
            ],
            status: crate::models::TxStatus::Reserved,
            lock: "l".into(),
            created: 0,
            expiry: 0,
            propagation: crate::models::PropagationType::Canonical,
        };
        assert_eq!(transaction_hosts(&tx), vec!["m0", "m1", "m2"]);
    }
}
