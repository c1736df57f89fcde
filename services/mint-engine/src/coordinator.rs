//! Transaction coordination: two-phase reserve/settle with time-based
//! expiration, across every mint a path touches.
//!
//! Reserve applies the local hop segment in one store session, commits, then
//! synchronously propagates to the mint owning the next hop, which recurses
//! onward. Settle walks the mints destination-first so that a crash mid-walk
//! leaves the unsettled prefix covered by its reservation and recoverable by
//! expiry. Expiration idempotently reverses reserved rows and is retried
//! against every mint until acknowledged.

use mint_core::{Address, Amount, AssetPair, EntityId};
use sqlx::SqliteConnection;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database;
use crate::errors::{MintError, Result};
use crate::models::{
    now_millis, CreateTransactionRequest, Crossing, PropagationType, TaskKind, Transaction,
    TransactionResource, TxStatus,
};
use crate::operations::{self, OperationParams};
use crate::planner::{self, HopKind, TransactionPlan};
use crate::service::{task_subject, Mint};

impl Mint {
    /// Reserves a transaction across its full path and answers with the
    /// coordinator's view of it. Validation happens before any store write;
    /// reservation failures reverse every partial effect before surfacing
    /// `transaction_failed`.
    pub async fn create_transaction(
        &self,
        caller: &Address,
        request: &CreateTransactionRequest,
    ) -> Result<TransactionResource> {
        let pair: AssetPair = request
            .pair
            .parse()
            .map_err(|_| MintError::PairInvalid(request.pair.clone()))?;
        let amount: Amount = request
            .amount
            .parse()
            .map_err(|_| MintError::AmountInvalid(request.amount.clone()))?;
        let destination: Address = request
            .destination
            .parse()
            .map_err(|_| MintError::DestinationInvalid(request.destination.clone()))?;
        let mut path = Vec::with_capacity(request.path.len());
        for id in &request.path {
            path.push(
                id.parse::<EntityId>()
                    .map_err(|_| MintError::OfferInvalid(id.clone()))?,
            );
        }

        let created = now_millis();
        let transaction = Transaction {
            id: EntityId::generate(caller.clone(), "transaction"),
            owner: caller.clone(),
            pair,
            amount,
            destination,
            path,
            status: TxStatus::Reserved,
            lock: Uuid::new_v4().simple().to_string(),
            created,
            expiry: created + self.config().transaction.expiry_ms,
            propagation: PropagationType::Canonical,
        };

        let plan =
            planner::plan(self.db(), self.transport(), self.host(), &transaction).await?;

        // Canonical row plus the leading local hop segment, one session:
        // a failure here rolls everything back before anything propagated.
        let next = {
            let mut session = self.db().begin().await?;
            database::save_transaction(&mut session, &transaction).await?;
            let next = self
                .apply_hops(&mut session, &transaction, &plan, 0)
                .await
                .map_err(reservation_failure)?;
            session.commit().await?;
            next
        };

        self.enqueue(
            TaskKind::ExpireTransaction,
            &transaction.id.to_string(),
            transaction.expiry,
        )
        .await?;
        for hop in &plan.hops[..next] {
            if let HopKind::Crossing(planned) = &hop.kind {
                self.enqueue_offer_propagation(&planned.offer.id).await?;
            }
        }

        if next < plan.hops.len() {
            let host = plan.hops[next].host.clone();
            if let Err(e) = self
                .transport()
                .propagate_transaction(&host, &transaction.id.to_string(), &transaction.lock, next)
                .await
            {
                warn!(
                    "Reserve propagation of {} to {} failed: {}",
                    transaction.id, host, e
                );
                self.cancel_walk(&transaction).await;
                if let Err(cancel_err) = self.cancel_local(&transaction.id).await {
                    error!(
                        "Reversing local reservation of {}: {}",
                        transaction.id, cancel_err
                    );
                }
                return Err(MintError::TransactionFailed(e.to_string()));
            }
        }

        info!(
            "Reserved transaction {} across {} hops",
            transaction.id,
            plan.hops.len()
        );
        self.transaction_resource(&transaction.id).await
    }

    /// The receiving side of reserve propagation: pull the canonical
    /// snapshot, apply the local hop segment starting at `hop`, recurse to
    /// the mint owning the next hop.
    pub async fn receive_transaction_propagation(
        &self,
        id: &str,
        lock: &str,
        hop: usize,
    ) -> Result<TransactionResource> {
        let parsed: EntityId = id
            .parse()
            .map_err(|_| MintError::TransactionNotFound(id.to_string()))?;

        let transaction = if parsed.host() == self.host() {
            // The chain recursed back to the coordinator's own mint.
            let mut conn = self.db().acquire().await?;
            let transaction = database::load_transaction(&mut conn, &parsed)
                .await?
                .ok_or_else(|| MintError::TransactionNotFound(id.to_string()))?;
            if transaction.lock != lock {
                return Err(MintError::LockInvalid(id.to_string()));
            }
            transaction
        } else {
            let snapshot = self.transport().retrieve_transaction(parsed.host(), id).await?;
            if snapshot.id != parsed {
                return Err(MintError::Transport(format!(
                    "the mint at {} answered for a different transaction: {}",
                    parsed.host(),
                    snapshot.id
                )));
            }
            if snapshot.lock != lock {
                return Err(MintError::LockInvalid(id.to_string()));
            }
            Transaction::from_resource(&snapshot, PropagationType::Propagated)
        };

        let plan =
            planner::plan(self.db(), self.transport(), self.host(), &transaction).await?;
        if hop >= plan.hops.len() || plan.hops[hop].host != self.host() {
            return Err(MintError::Internal(format!(
                "hop {} of {} is not owned by {}",
                hop, transaction.id, self.host()
            )));
        }

        let next = {
            let mut session = self.db().begin().await?;
            if transaction.propagation == PropagationType::Propagated {
                database::save_transaction(&mut session, &transaction).await?;
            }
            let next = self.apply_hops(&mut session, &transaction, &plan, hop).await?;
            session.commit().await?;
            next
        };

        self.enqueue(
            TaskKind::ExpireTransaction,
            &transaction.id.to_string(),
            transaction.expiry,
        )
        .await?;
        for applied in &plan.hops[hop..next] {
            if let HopKind::Crossing(planned) = &applied.kind {
                self.enqueue_offer_propagation(&planned.offer.id).await?;
            }
        }

        if next < plan.hops.len() {
            let host = plan.hops[next].host.clone();
            self.transport()
                .propagate_transaction(&host, id, lock, next)
                .await?;
        }

        self.transaction_resource(&parsed).await
    }

    /// Applies the contiguous run of locally-owned hops starting at `start`
    /// inside the caller's session; returns the index just past it. Hops
    /// whose rows already exist are skipped, which makes re-propagation a
    /// no-op.
    async fn apply_hops(
        &self,
        conn: &mut SqliteConnection,
        transaction: &Transaction,
        plan: &TransactionPlan,
        start: usize,
    ) -> Result<usize> {
        let end = plan.segment_end(start, self.host());
        for hop in &plan.hops[start..end] {
            match &hop.kind {
                HopKind::Operation(planned) => {
                    if database::load_operation_by_hop(conn, &transaction.id, hop.index)
                        .await?
                        .is_some()
                    {
                        continue;
                    }
                    operations::apply(
                        conn,
                        OperationParams {
                            owner: &planned.asset.owner,
                            asset: &planned.asset,
                            source: Some(&planned.source),
                            destination: Some(&planned.destination),
                            amount: planned.amount,
                            status: TxStatus::Reserved,
                            transaction: Some((&transaction.id, hop.index)),
                            created: now_millis(),
                        },
                    )
                    .await?;
                }
                HopKind::Crossing(planned) => {
                    if database::load_crossing_by_hop(conn, &transaction.id, hop.index)
                        .await?
                        .is_some()
                    {
                        continue;
                    }
                    database::reserve_remainder(conn, &planned.offer.id, planned.amount).await?;
                    database::save_crossing(
                        conn,
                        &Crossing {
                            id: EntityId::generate(planned.offer.owner.clone(), "crossing"),
                            owner: planned.offer.owner.clone(),
                            offer: planned.offer.id.clone(),
                            amount: planned.amount,
                            status: TxStatus::Reserved,
                            transaction: transaction.id.clone(),
                            transaction_hop: hop.index,
                            created: now_millis(),
                        },
                    )
                    .await?;
                }
            }
        }
        Ok(end)
    }

    /// Settles a reserved transaction. On the coordinator this walks the
    /// path's mints destination-first (transport failures are queued for
    /// retry) and settles the local rows last; on a propagated copy it flips
    /// the local rows only, authenticated by the lock.
    pub async fn settle_transaction(
        &self,
        caller: Option<&Address>,
        id: &str,
        lock: Option<&str>,
    ) -> Result<TransactionResource> {
        let parsed: EntityId = id
            .parse()
            .map_err(|_| MintError::TransactionNotFound(id.to_string()))?;
        let transaction = {
            let mut conn = self.db().acquire().await?;
            database::load_transaction(&mut conn, &parsed)
                .await?
                .ok_or_else(|| MintError::TransactionNotFound(id.to_string()))?
        };

        match transaction.propagation {
            PropagationType::Propagated => {
                let lock =
                    lock.ok_or_else(|| MintError::LockInvalid("a lock is required".to_string()))?;
                if lock != transaction.lock {
                    return Err(MintError::LockInvalid(id.to_string()));
                }
                match transaction.status {
                    TxStatus::Settled => {} // idempotent for retries
                    TxStatus::Canceled => {
                        return Err(MintError::TransactionExpired(id.to_string()))
                    }
                    TxStatus::Reserved => self.settle_local(&transaction).await?,
                }
                self.transaction_resource(&parsed).await
            }
            PropagationType::Canonical => {
                let authorized = lock.map_or(false, |l| l == transaction.lock)
                    || caller.map_or(false, |c| *c == transaction.owner);
                if !authorized {
                    return Err(MintError::LockInvalid(id.to_string()));
                }
                match transaction.status {
                    TxStatus::Settled => {
                        return Err(MintError::TransactionSettled(id.to_string()))
                    }
                    TxStatus::Canceled => {
                        return Err(MintError::TransactionExpired(id.to_string()))
                    }
                    TxStatus::Reserved => {}
                }
                if now_millis() >= transaction.expiry {
                    return Err(MintError::TransactionExpired(id.to_string()));
                }

                let hosts = planner::transaction_hosts(&transaction);
                let mut visited: Vec<&str> = Vec::new();
                for host in hosts.iter().rev() {
                    if host == self.host() || visited.contains(&host.as_str()) {
                        continue;
                    }
                    visited.push(host.as_str());
                    if let Err(e) = self
                        .transport()
                        .settle_transaction(host, id, &transaction.lock)
                        .await
                    {
                        warn!(
                            "Settle propagation of {} to {} failed, queuing retry: {}",
                            transaction.id, host, e
                        );
                        self.enqueue(
                            TaskKind::PropagateSettle,
                            &task_subject(&transaction.id, host),
                            now_millis(),
                        )
                        .await?;
                    }
                }

                self.settle_local(&transaction).await?;
                info!("Settled transaction {}", transaction.id);
                self.transaction_resource(&parsed).await
            }
        }
    }

    /// Flips this mint's reserved rows to settled in one session. Balance and
    /// remainder mutations already happened at reserve; only statuses change.
    async fn settle_local(&self, transaction: &Transaction) -> Result<()> {
        let operations = {
            let mut session = self.db().begin().await?;
            let operations =
                database::list_operations_by_transaction(&mut session, &transaction.id).await?;
            for operation in &operations {
                if operation.status != TxStatus::Reserved {
                    continue;
                }
                let mut settled = operation.clone();
                settled.status = TxStatus::Settled;
                database::save_operation(&mut session, &settled).await?;
            }
            let crossings =
                database::list_crossings_by_transaction(&mut session, &transaction.id).await?;
            for crossing in &crossings {
                if crossing.status != TxStatus::Reserved {
                    continue;
                }
                let mut settled = crossing.clone();
                settled.status = TxStatus::Settled;
                database::save_crossing(&mut session, &settled).await?;
            }
            let mut settled = transaction.clone();
            settled.status = TxStatus::Settled;
            database::save_transaction(&mut session, &settled).await?;
            session.commit().await?;
            operations
        };

        // The settled balances are now final; refresh their mirrors.
        for operation in &operations {
            self.enqueue_operation_propagation(operation).await?;
        }
        Ok(())
    }

    /// Cancels a reserved transaction: forced expiration, requiring the lock
    /// (or the owner on the coordinator). Idempotent on already-canceled
    /// copies.
    pub async fn cancel_transaction(
        &self,
        caller: Option<&Address>,
        id: &str,
        lock: Option<&str>,
    ) -> Result<TransactionResource> {
        let parsed: EntityId = id
            .parse()
            .map_err(|_| MintError::TransactionNotFound(id.to_string()))?;
        let transaction = {
            let mut conn = self.db().acquire().await?;
            database::load_transaction(&mut conn, &parsed)
                .await?
                .ok_or_else(|| MintError::TransactionNotFound(id.to_string()))?
        };

        let authorized = lock.map_or(false, |l| l == transaction.lock)
            || (transaction.propagation == PropagationType::Canonical
                && caller.map_or(false, |c| *c == transaction.owner));
        if !authorized {
            return Err(MintError::LockInvalid(id.to_string()));
        }

        match transaction.status {
            TxStatus::Settled => return Err(MintError::TransactionSettled(id.to_string())),
            TxStatus::Canceled => return self.transaction_resource(&parsed).await,
            TxStatus::Reserved => {}
        }

        self.cancel_local(&parsed).await?;
        if transaction.propagation == PropagationType::Canonical {
            self.cancel_walk(&transaction).await;
        }

        info!("Canceled transaction {}", transaction.id);
        self.transaction_resource(&parsed).await
    }

    /// Issues the cancel verb to every other mint on the path. Mints that
    /// never stored the transaction answer not-found, which is fine; other
    /// failures are queued for retry.
    pub(crate) async fn cancel_walk(&self, transaction: &Transaction) {
        let hosts = planner::transaction_hosts(transaction);
        let mut visited: Vec<&str> = Vec::new();
        for host in &hosts {
            if host == self.host() || visited.contains(&host.as_str()) {
                continue;
            }
            visited.push(host.as_str());
            match self
                .transport()
                .cancel_transaction(host, &transaction.id.to_string(), &transaction.lock)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(
                        "Cancel propagation of {} to {} failed, queuing retry: {}",
                        transaction.id, host, e
                    );
                    if let Err(queue_err) = self
                        .enqueue(
                            TaskKind::PropagateCancel,
                            &task_subject(&transaction.id, host),
                            now_millis(),
                        )
                        .await
                    {
                        error!("Queuing cancel retry: {}", queue_err);
                    }
                }
            }
        }
    }

    /// Reverses this mint's reserved rows in one session: sources credited
    /// back, destinations debited, offer remainders released, rows flipped to
    /// canceled. Rows already past `reserved` are left untouched, so running
    /// this twice changes nothing.
    pub(crate) async fn cancel_local(&self, id: &EntityId) -> Result<()> {
        let (operations, released_offers) = {
            let mut session = self.db().begin().await?;
            let transaction = database::load_transaction(&mut session, id)
                .await?
                .ok_or_else(|| MintError::TransactionNotFound(id.to_string()))?;
            if transaction.status == TxStatus::Settled {
                return Err(MintError::TransactionSettled(id.to_string()));
            }
            let operations = database::list_operations_by_transaction(&mut session, id).await?;
            for operation in &operations {
                if operation.status != TxStatus::Reserved {
                    continue;
                }
                operations::reverse(&mut session, operation).await?;
                let mut canceled = operation.clone();
                canceled.status = TxStatus::Canceled;
                database::save_operation(&mut session, &canceled).await?;
            }
            let crossings = database::list_crossings_by_transaction(&mut session, id).await?;
            let mut released_offers = Vec::new();
            for crossing in &crossings {
                if crossing.status != TxStatus::Reserved {
                    continue;
                }
                database::release_remainder(&mut session, &crossing.offer, crossing.amount)
                    .await?;
                released_offers.push(crossing.offer.clone());
                let mut canceled = crossing.clone();
                canceled.status = TxStatus::Canceled;
                database::save_crossing(&mut session, &canceled).await?;
            }
            if transaction.status != TxStatus::Canceled {
                let mut canceled = transaction.clone();
                canceled.status = TxStatus::Canceled;
                database::save_transaction(&mut session, &canceled).await?;
            }
            session.commit().await?;
            (operations, released_offers)
        };

        // Restored balances and remainders need their mirrors refreshed too.
        for operation in &operations {
            self.enqueue_operation_propagation(operation).await?;
        }
        for offer in &released_offers {
            self.enqueue_offer_propagation(offer).await?;
        }
        Ok(())
    }

    /// The expiration task body: once past expiry, reverse the local rows and
    /// push the cancel verb along the path. Any transport failure fails the
    /// task, which the runner retries until every mint acknowledged.
    pub async fn expire_transaction(&self, id: &str) -> Result<()> {
        let parsed: EntityId = id
            .parse()
            .map_err(|e| MintError::Internal(format!("malformed expiration subject: {}", e)))?;
        let transaction = {
            let mut conn = self.db().acquire().await?;
            match database::load_transaction(&mut conn, &parsed).await? {
                Some(transaction) => transaction,
                None => return Ok(()),
            }
        };
        if transaction.status != TxStatus::Reserved {
            return Ok(()); // settled or already canceled
        }
        if now_millis() < transaction.expiry {
            return Err(MintError::Internal(format!(
                "transaction {} is not expired yet",
                transaction.id
            )));
        }

        info!("Expiring transaction {}", transaction.id);
        self.cancel_local(&parsed).await?;

        let hosts = planner::transaction_hosts(&transaction);
        let mut visited: Vec<&str> = Vec::new();
        for host in &hosts {
            if host == self.host() || visited.contains(&host.as_str()) {
                continue;
            }
            visited.push(host.as_str());
            match self
                .transport()
                .cancel_transaction(host, id, &transaction.lock)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Local reservation failures surface as `transaction_failed`; store and
/// internal failures keep their own kind.
fn reservation_failure(e: MintError) -> MintError {
    match e {
        MintError::Database(_) | MintError::Internal(_) | MintError::Transport(_) => e,
        other => MintError::TransactionFailed(other.to_string()),
    }
}
