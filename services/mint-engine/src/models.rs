use chrono::Utc;
use mint_core::{Address, Amount, AssetName, AssetPair, EntityId, Price};
use serde::{Deserialize, Serialize};

use crate::errors::MintError;

/// Granularity of wire timestamps: stored/emitted values are nanoseconds
/// since epoch divided by this constant (1 ms).
pub const TIME_RESOLUTION_NS: i64 = 1_000_000;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Whether a row is the authoritative copy (stored by the owning mint) or an
/// eventually-consistent mirror refreshed by pulling from the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationType {
    Canonical,
    Propagated,
}

impl PropagationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropagationType::Canonical => "canonical",
            PropagationType::Propagated => "propagated",
        }
    }

    pub fn parse(s: &str) -> Result<PropagationType, MintError> {
        match s {
            "canonical" => Ok(PropagationType::Canonical),
            "propagated" => Ok(PropagationType::Propagated),
            other => Err(MintError::Internal(format!(
                "unknown propagation type: {}",
                other
            ))),
        }
    }
}

/// Status shared by transactions and their hops. Transitions are monotone:
/// `reserved -> settled` or `reserved -> canceled`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Reserved,
    Settled,
    Canceled,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Reserved => "reserved",
            TxStatus::Settled => "settled",
            TxStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Result<TxStatus, MintError> {
        match s {
            "reserved" => Ok(TxStatus::Reserved),
            "settled" => Ok(TxStatus::Settled),
            "canceled" => Ok(TxStatus::Canceled),
            other => Err(MintError::Internal(format!("unknown status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Active,
    Closed,
    Consumed,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Active => "active",
            OfferStatus::Closed => "closed",
            OfferStatus::Consumed => "consumed",
        }
    }

    pub fn parse(s: &str) -> Result<OfferStatus, MintError> {
        match s {
            "active" => Ok(OfferStatus::Active),
            "closed" => Ok(OfferStatus::Closed),
            "consumed" => Ok(OfferStatus::Consumed),
            other => Err(MintError::Internal(format!(
                "unknown offer status: {}",
                other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Store entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Asset {
    pub name: AssetName,
    pub created: i64,
    pub propagation: PropagationType,
}

/// Stored holding of an asset by a non-issuer address. The issuer's own
/// balance is implicit and unbounded: no row is ever stored for it. The
/// `token` is the propagation key mirrors are looked up by.
#[derive(Debug, Clone)]
pub struct Balance {
    pub token: String,
    pub asset: AssetName,
    pub holder: Address,
    pub value: Amount,
    pub created: i64,
    pub propagation: PropagationType,
}

#[derive(Debug, Clone)]
pub struct Offer {
    pub id: EntityId,
    pub owner: Address,
    pub pair: AssetPair,
    pub price: Price,
    pub amount: Amount,
    pub remainder: Amount,
    pub status: OfferStatus,
    pub created: i64,
    pub propagation: PropagationType,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub id: EntityId,
    pub owner: Address,
    pub asset: AssetName,
    pub source: Option<Address>,
    pub destination: Option<Address>,
    pub amount: Amount,
    pub status: TxStatus,
    pub transaction: Option<EntityId>,
    pub transaction_hop: Option<i64>,
    pub created: i64,
    pub propagation: PropagationType,
}

#[derive(Debug, Clone)]
pub struct Crossing {
    pub id: EntityId,
    pub owner: Address,
    pub offer: EntityId,
    pub amount: Amount,
    pub status: TxStatus,
    pub transaction: EntityId,
    pub transaction_hop: i64,
    pub created: i64,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: EntityId,
    pub owner: Address,
    pub pair: AssetPair,
    pub amount: Amount,
    pub destination: Address,
    pub path: Vec<EntityId>,
    pub status: TxStatus,
    pub lock: String,
    pub created: i64,
    pub expiry: i64,
    pub propagation: PropagationType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    PropagateOffer,
    PropagateOperation,
    ExpireTransaction,
    PropagateSettle,
    PropagateCancel,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::PropagateOffer => "propagate_offer",
            TaskKind::PropagateOperation => "propagate_operation",
            TaskKind::ExpireTransaction => "expire_transaction",
            TaskKind::PropagateSettle => "propagate_settle",
            TaskKind::PropagateCancel => "propagate_cancel",
        }
    }

    pub fn parse(s: &str) -> Result<TaskKind, MintError> {
        match s {
            "propagate_offer" => Ok(TaskKind::PropagateOffer),
            "propagate_operation" => Ok(TaskKind::PropagateOperation),
            "expire_transaction" => Ok(TaskKind::ExpireTransaction),
            "propagate_settle" => Ok(TaskKind::PropagateSettle),
            "propagate_cancel" => Ok(TaskKind::PropagateCancel),
            other => Err(MintError::Internal(format!("unknown task kind: {}", other))),
        }
    }
}

/// A unit of deferred work: propagation or expiration, executed one at a time
/// by the runner.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: i64,
    pub kind: TaskKind,
    pub subject: String,
    pub ready_at: i64,
    pub attempts: i64,
    pub created: i64,
}

// ---------------------------------------------------------------------------
// Wire resources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetResource {
    pub name: AssetName,
    pub owner: Address,
    pub code: String,
    pub scale: u8,
    pub created: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BalanceResource {
    pub token: String,
    pub asset: AssetName,
    pub holder: Address,
    pub value: Amount,
    pub created: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferResource {
    pub id: EntityId,
    pub owner: Address,
    pub pair: AssetPair,
    pub price: Price,
    pub amount: Amount,
    pub remainder: Amount,
    pub status: OfferStatus,
    pub created: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationResource {
    pub id: EntityId,
    pub owner: Address,
    pub asset: AssetName,
    pub source: Option<Address>,
    pub destination: Option<Address>,
    pub amount: Amount,
    pub status: TxStatus,
    pub transaction: Option<EntityId>,
    pub transaction_hop: Option<i64>,
    pub created: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrossingResource {
    pub id: EntityId,
    pub owner: Address,
    pub offer: EntityId,
    pub amount: Amount,
    pub status: TxStatus,
    pub transaction: EntityId,
    pub transaction_hop: i64,
    pub created: i64,
}

/// The transaction envelope a mint answers with: the shared snapshot plus the
/// operation and crossing rows stored on the answering mint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionResource {
    pub id: EntityId,
    pub owner: Address,
    pub pair: AssetPair,
    pub amount: Amount,
    pub destination: Address,
    pub path: Vec<EntityId>,
    pub status: TxStatus,
    pub lock: String,
    pub created: i64,
    pub expiry: i64,
    pub operations: Vec<OperationResource>,
    pub crossings: Vec<CrossingResource>,
}

impl From<&Asset> for AssetResource {
    fn from(a: &Asset) -> AssetResource {
        AssetResource {
            name: a.name.clone(),
            owner: a.name.owner.clone(),
            code: a.name.code.clone(),
            scale: a.name.scale,
            created: a.created,
        }
    }
}

impl From<&Balance> for BalanceResource {
    fn from(b: &Balance) -> BalanceResource {
        BalanceResource {
            token: b.token.clone(),
            asset: b.asset.clone(),
            holder: b.holder.clone(),
            value: b.value,
            created: b.created,
        }
    }
}

impl From<&Offer> for OfferResource {
    fn from(o: &Offer) -> OfferResource {
        OfferResource {
            id: o.id.clone(),
            owner: o.owner.clone(),
            pair: o.pair.clone(),
            price: o.price,
            amount: o.amount,
            remainder: o.remainder,
            status: o.status,
            created: o.created,
        }
    }
}

impl From<&Operation> for OperationResource {
    fn from(o: &Operation) -> OperationResource {
        OperationResource {
            id: o.id.clone(),
            owner: o.owner.clone(),
            asset: o.asset.clone(),
            source: o.source.clone(),
            destination: o.destination.clone(),
            amount: o.amount,
            status: o.status,
            transaction: o.transaction.clone(),
            transaction_hop: o.transaction_hop,
            created: o.created,
        }
    }
}

impl From<&Crossing> for CrossingResource {
    fn from(c: &Crossing) -> CrossingResource {
        CrossingResource {
            id: c.id.clone(),
            owner: c.owner.clone(),
            offer: c.offer.clone(),
            amount: c.amount,
            status: c.status,
            transaction: c.transaction.clone(),
            transaction_hop: c.transaction_hop,
            created: c.created,
        }
    }
}

impl Offer {
    /// Rebuilds an entity from a pulled snapshot, e.g. when refreshing a
    /// propagated mirror.
    pub fn from_resource(resource: OfferResource, propagation: PropagationType) -> Offer {
        Offer {
            id: resource.id,
            owner: resource.owner,
            pair: resource.pair,
            price: resource.price,
            amount: resource.amount,
            remainder: resource.remainder,
            status: resource.status,
            created: resource.created,
            propagation,
        }
    }
}

impl Operation {
    pub fn from_resource(resource: OperationResource, propagation: PropagationType) -> Operation {
        Operation {
            id: resource.id,
            owner: resource.owner,
            asset: resource.asset,
            source: resource.source,
            destination: resource.destination,
            amount: resource.amount,
            status: resource.status,
            transaction: resource.transaction,
            transaction_hop: resource.transaction_hop,
            created: resource.created,
            propagation,
        }
    }
}

impl Transaction {
    /// The shared snapshot of a transaction; the answering mint's local hop
    /// rows are dropped, each mint stores its own.
    pub fn from_resource(resource: &TransactionResource, propagation: PropagationType) -> Transaction {
        Transaction {
            id: resource.id.clone(),
            owner: resource.owner.clone(),
            pair: resource.pair.clone(),
            amount: resource.amount,
            destination: resource.destination.clone(),
            path: resource.path.clone(),
            status: resource.status,
            lock: resource.lock.clone(),
            created: resource.created,
            expiry: resource.expiry,
            propagation,
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateAssetRequest {
    pub code: String,
    pub scale: u8,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateOperationRequest {
    pub amount: String,
    pub source: Option<String>,
    pub destination: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateOfferRequest {
    pub pair: String,
    pub price: String,
    pub amount: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateTransactionRequest {
    pub pair: String,
    pub amount: String,
    pub destination: String,
    #[serde(default)]
    pub path: Vec<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SettleTransactionRequest {
    #[serde(default)]
    pub lock: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CancelTransactionRequest {
    #[serde(default)]
    pub lock: Option<String>,
}

/// Body of the mint-to-mint reserve propagation call: the lock proves the
/// caller saw the coordinator's canonical row, `hop` is the first hop the
/// receiving mint is asked to apply.
#[derive(Debug, Deserialize, Serialize)]
pub struct PropagateTransactionRequest {
    pub lock: String,
    pub hop: usize,
}
