//! The mint node: user-facing asset, operation, offer and balance surface,
//! plus the receiving side of offer and operation propagation. Transaction
//! coordination lives in `coordinator`.

use std::sync::Arc;

use mint_core::{Address, Amount, AssetName, AssetPair, EntityId, Price};
use tracing::info;

use crate::config::Config;
use crate::database::{self, Database};
use crate::errors::{MintError, Result};
use crate::models::{
    now_millis, Asset, AssetResource, Balance, BalanceResource, CreateAssetRequest,
    CreateOfferRequest, CreateOperationRequest, Offer, OfferResource, OfferStatus, Operation,
    OperationResource, PropagationType, TaskKind, TransactionResource, TxStatus,
};
use crate::operations::{self, OperationParams};
use crate::propagation::MintTransport;

/// Task subjects that target a specific remote mint are `<id>|<host>`.
pub(crate) fn task_subject(id: &EntityId, host: &str) -> String {
    format!("{}|{}", id, host)
}

pub(crate) fn split_task_subject(subject: &str) -> Result<(&str, &str)> {
    subject
        .split_once('|')
        .ok_or_else(|| MintError::Internal(format!("malformed task subject: {}", subject)))
}

pub struct Mint {
    config: Config,
    db: Arc<Database>,
    transport: Arc<dyn MintTransport>,
}

impl Mint {
    pub fn new(config: Config, db: Arc<Database>, transport: Arc<dyn MintTransport>) -> Mint {
        Mint {
            config,
            db,
            transport,
        }
    }

    pub fn host(&self) -> &str {
        &self.config.mint_host
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub(crate) fn transport(&self) -> &dyn MintTransport {
        self.transport.as_ref()
    }

    /// The address minted for a locally authenticated user.
    pub fn address_for(&self, user: &str) -> Result<Address> {
        format!("{}@{}", user, self.host())
            .parse()
            .map_err(|_| MintError::OperationNotAuthorized(format!("invalid user: {}", user)))
    }

    pub(crate) async fn enqueue(
        &self,
        kind: TaskKind,
        subject: &str,
        ready_at: i64,
    ) -> Result<()> {
        let mut conn = self.db.acquire().await?;
        database::enqueue_task(&mut conn, kind, subject, ready_at, now_millis()).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Assets
    // -----------------------------------------------------------------------

    pub async fn create_asset(
        &self,
        caller: &Address,
        request: &CreateAssetRequest,
    ) -> Result<AssetResource> {
        let name = AssetName::new(caller.clone(), request.code.clone(), request.scale)
            .map_err(|e| MintError::AssetInvalid(e.to_string()))?;

        let mut session = self.db.begin().await?;
        if database::load_asset(&mut session, &name).await?.is_some() {
            return Err(MintError::AssetInvalid(format!(
                "the asset already exists: {}",
                name
            )));
        }
        let asset = Asset {
            name,
            created: now_millis(),
            propagation: PropagationType::Canonical,
        };
        database::create_asset(&mut session, &asset).await?;
        session.commit().await?;

        info!("Created asset {}", asset.name);
        Ok((&asset).into())
    }

    pub async fn get_balance(&self, asset: &str, holder: &str) -> Result<BalanceResource> {
        let asset: AssetName = asset
            .parse()
            .map_err(|_| MintError::AssetInvalid(asset.to_string()))?;
        let holder: Address = holder
            .parse()
            .map_err(|_| MintError::SourceInvalid(holder.to_string()))?;
        let mut conn = self.db.acquire().await?;
        let balance =
            database::load_balance(&mut conn, &asset, &holder, PropagationType::Canonical)
                .await?
                .ok_or_else(|| {
                    MintError::BalanceNotFound(format!("{} held by {}", asset, holder))
                })?;
        Ok((&balance).into())
    }

    // -----------------------------------------------------------------------
    // Operations (direct)
    // -----------------------------------------------------------------------

    /// Creates a settled operation outside any transaction. Only the asset's
    /// issuer may do this; holders move value through transactions instead.
    pub async fn create_operation(
        &self,
        caller: &Address,
        asset: &str,
        request: &CreateOperationRequest,
    ) -> Result<OperationResource> {
        let asset_name: AssetName = asset
            .parse()
            .map_err(|_| MintError::AssetInvalid(asset.to_string()))?;
        if asset_name.owner != *caller {
            return Err(MintError::OperationNotAuthorized(format!(
                "{} was created by {}",
                asset_name, asset_name.owner
            )));
        }
        let amount: Amount = request
            .amount
            .parse()
            .map_err(|_| MintError::AmountInvalid(request.amount.clone()))?;
        let source = request
            .source
            .as_deref()
            .map(|s| {
                s.parse::<Address>()
                    .map_err(|_| MintError::SourceInvalid(s.to_string()))
            })
            .transpose()?;
        let destination = request
            .destination
            .as_deref()
            .map(|s| {
                s.parse::<Address>()
                    .map_err(|_| MintError::DestinationInvalid(s.to_string()))
            })
            .transpose()?;

        let created = now_millis();
        let mut session = self.db.begin().await?;
        database::load_asset(&mut session, &asset_name)
            .await?
            .ok_or_else(|| MintError::AssetNotFound(asset_name.to_string()))?;
        let operation = operations::apply(
            &mut session,
            OperationParams {
                owner: caller,
                asset: &asset_name,
                source: source.as_ref(),
                destination: destination.as_ref(),
                amount,
                status: TxStatus::Settled,
                transaction: None,
                created,
            },
        )
        .await?;
        session.commit().await?;

        self.enqueue_operation_propagation(&operation).await?;

        info!(
            "Created operation {} on {} amount={}",
            operation.id, operation.asset, operation.amount
        );
        Ok((&operation).into())
    }

    pub async fn get_operation(&self, id: &str) -> Result<OperationResource> {
        let id: EntityId = id
            .parse()
            .map_err(|_| MintError::OperationNotFound(id.to_string()))?;
        let mut conn = self.db.acquire().await?;
        let operation = database::load_operation(&mut conn, &id)
            .await?
            .ok_or_else(|| MintError::OperationNotFound(id.to_string()))?;
        Ok((&operation).into())
    }

    /// Queues mirror refreshes of a finalized operation towards the mints
    /// hosting its endpoints.
    pub(crate) async fn enqueue_operation_propagation(&self, operation: &Operation) -> Result<()> {
        let mut hosts: Vec<&str> = Vec::new();
        for endpoint in [&operation.source, &operation.destination] {
            if let Some(address) = endpoint {
                if address.host != self.host() && !hosts.contains(&address.host.as_str()) {
                    hosts.push(&address.host);
                }
            }
        }
        let now = now_millis();
        let mut conn = self.db.acquire().await?;
        for host in hosts {
            database::enqueue_task(
                &mut conn,
                TaskKind::PropagateOperation,
                &task_subject(&operation.id, host),
                now,
                now,
            )
            .await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Offers
    // -----------------------------------------------------------------------

    pub async fn create_offer(
        &self,
        caller: &Address,
        request: &CreateOfferRequest,
    ) -> Result<OfferResource> {
        let pair: AssetPair = request
            .pair
            .parse()
            .map_err(|_| MintError::PairInvalid(request.pair.clone()))?;
        let price: Price = request
            .price
            .parse()
            .map_err(|_| MintError::OfferInvalid(format!("invalid price: {}", request.price)))?;
        let amount: Amount = request
            .amount
            .parse()
            .map_err(|_| MintError::AmountInvalid(request.amount.clone()))?;
        if pair.base.owner != *caller {
            return Err(MintError::OperationNotAuthorized(format!(
                "offers exchange an asset you issued; {} was created by {}",
                pair.base, pair.base.owner
            )));
        }

        let offer = Offer {
            id: EntityId::generate(caller.clone(), "offer"),
            owner: caller.clone(),
            pair,
            price,
            amount,
            remainder: amount,
            status: OfferStatus::Active,
            created: now_millis(),
            propagation: PropagationType::Canonical,
        };

        let mut session = self.db.begin().await?;
        database::save_offer(&mut session, &offer).await?;
        session.commit().await?;

        // Mirror the offer on the quote asset's mint so paths can be planned
        // there.
        self.enqueue_offer_propagation(&offer.id).await?;

        info!("Created offer {} {} at {}", offer.id, offer.pair, offer.price);
        Ok((&offer).into())
    }

    /// Queues a mirror refresh of an offer towards its quote asset's mint,
    /// after creation and after every remainder change.
    pub(crate) async fn enqueue_offer_propagation(&self, offer_id: &EntityId) -> Result<()> {
        let offer = {
            let mut conn = self.db.acquire().await?;
            database::load_offer(&mut conn, offer_id).await?
        };
        let offer = match offer {
            Some(offer) => offer,
            None => return Ok(()),
        };
        let quote_host = offer.pair.quote.owner.host.clone();
        if quote_host != self.host() {
            self.enqueue(
                TaskKind::PropagateOffer,
                &task_subject(offer_id, &quote_host),
                now_millis(),
            )
            .await?;
        }
        Ok(())
    }

    pub async fn get_offer(&self, id: &str) -> Result<OfferResource> {
        let id: EntityId = id
            .parse()
            .map_err(|_| MintError::OfferInvalid(id.to_string()))?;
        let mut conn = self.db.acquire().await?;
        let offer = database::load_offer(&mut conn, &id)
            .await?
            .ok_or_else(|| MintError::OfferNotFound(id.to_string()))?;
        Ok((&offer).into())
    }

    // -----------------------------------------------------------------------
    // Transactions (read side; coordination is in `coordinator`)
    // -----------------------------------------------------------------------

    pub async fn get_transaction(&self, id: &str) -> Result<TransactionResource> {
        let id: EntityId = id
            .parse()
            .map_err(|_| MintError::TransactionNotFound(id.to_string()))?;
        self.transaction_resource(&id).await
    }

    /// The transaction snapshot plus the operation and crossing rows stored
    /// on this mint.
    pub(crate) async fn transaction_resource(&self, id: &EntityId) -> Result<TransactionResource> {
        let mut conn = self.db.acquire().await?;
        let transaction = database::load_transaction(&mut conn, id)
            .await?
            .ok_or_else(|| MintError::TransactionNotFound(id.to_string()))?;
        let operations = database::list_operations_by_transaction(&mut conn, id).await?;
        let crossings = database::list_crossings_by_transaction(&mut conn, id).await?;
        Ok(TransactionResource {
            id: transaction.id.clone(),
            owner: transaction.owner.clone(),
            pair: transaction.pair.clone(),
            amount: transaction.amount,
            destination: transaction.destination.clone(),
            path: transaction.path.clone(),
            status: transaction.status,
            lock: transaction.lock.clone(),
            created: transaction.created,
            expiry: transaction.expiry,
            operations: operations.iter().map(Into::into).collect(),
            crossings: crossings.iter().map(Into::into).collect(),
        })
    }

    // -----------------------------------------------------------------------
    // Propagation receivers
    // -----------------------------------------------------------------------

    /// Pulls the canonical offer from its owning mint and refreshes the local
    /// mirror. Idempotent.
    pub async fn receive_offer_propagation(&self, id: &str) -> Result<OfferResource> {
        let parsed: EntityId = id
            .parse()
            .map_err(|_| MintError::OfferInvalid(id.to_string()))?;
        if parsed.host() == self.host() {
            return self.get_offer(id).await;
        }

        let snapshot = self.transport.retrieve_offer(parsed.host(), id).await?;
        if snapshot.id != parsed {
            return Err(MintError::OfferInvalid(format!(
                "the mint at {} answered for a different offer: {}",
                parsed.host(),
                snapshot.id
            )));
        }
        let offer = Offer::from_resource(snapshot, PropagationType::Propagated);

        let mut session = self.db.begin().await?;
        database::save_offer(&mut session, &offer).await?;
        session.commit().await?;

        Ok((&offer).into())
    }

    /// Pulls the canonical operation, stores the mirror, and refreshes the
    /// mirrored balances of endpoints homed on this mint.
    pub async fn receive_operation_propagation(&self, id: &str) -> Result<OperationResource> {
        let parsed: EntityId = id
            .parse()
            .map_err(|_| MintError::OperationNotFound(id.to_string()))?;
        if parsed.host() == self.host() {
            return self.get_operation(id).await;
        }

        let snapshot = self.transport.retrieve_operation(parsed.host(), id).await?;
        if snapshot.id != parsed {
            return Err(MintError::OperationNotFound(format!(
                "the mint at {} answered for a different operation: {}",
                parsed.host(),
                snapshot.id
            )));
        }
        let operation = Operation::from_resource(snapshot, PropagationType::Propagated);

        let mut mirrored: Vec<Balance> = Vec::new();
        for endpoint in [&operation.source, &operation.destination] {
            let holder = match endpoint {
                Some(address) if address.host == self.host() => address,
                _ => continue,
            };
            if *holder == operation.asset.owner {
                continue;
            }
            let balance = self
                .transport
                .retrieve_balance(
                    &operation.asset.owner.host,
                    &operation.asset.to_string(),
                    &holder.to_string(),
                )
                .await?;
            if balance.asset != operation.asset || balance.holder != *holder {
                return Err(MintError::Internal(format!(
                    "the mint at {} answered for a different balance",
                    operation.asset.owner.host
                )));
            }
            mirrored.push(Balance {
                token: balance.token,
                asset: balance.asset,
                holder: balance.holder,
                value: balance.value,
                created: balance.created,
                propagation: PropagationType::Propagated,
            });
        }

        let mut session = self.db.begin().await?;
        database::save_operation(&mut session, &operation).await?;
        for balance in &mirrored {
            database::save_balance(&mut session, balance).await?;
        }
        session.commit().await?;

        Ok((&operation).into())
    }
}
