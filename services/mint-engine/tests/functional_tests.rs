//! End-to-end scenarios across several in-process mints.
//!
//! The harness wires every mint's transport to an in-process router that
//! dispatches directly to the target mint, and each mint runs on its own
//! in-memory store. Deferred work (propagation, expiration) advances one
//! deterministic step at a time through `run_one`.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use mint_core::{Address, Amount, AssetName, EntityId};
use mint_engine::config::{
    Config, DatabaseConfig, PropagationConfig, ServerConfig, TransactionConfig,
};
use mint_engine::database::{self, Database};
use mint_engine::errors::MintError;
use mint_engine::models::{
    BalanceResource, CreateAssetRequest, CreateOfferRequest, CreateOperationRequest,
    CreateTransactionRequest, OfferResource, OfferStatus, OperationResource, PropagationType,
    TransactionResource, TxStatus,
};
use mint_engine::propagation::MintTransport;
use mint_engine::Mint;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TestRouter {
    mints: RwLock<HashMap<String, Arc<Mint>>>,
}

impl TestRouter {
    fn mint(&self, host: &str) -> Result<Arc<Mint>, MintError> {
        self.mints
            .read()
            .unwrap()
            .get(host)
            .cloned()
            .ok_or_else(|| MintError::Transport(format!("unknown mint: {}", host)))
    }

    fn register(&self, host: &str, mint: Arc<Mint>) {
        self.mints.write().unwrap().insert(host.to_string(), mint);
    }
}

#[async_trait]
impl MintTransport for TestRouter {
    async fn retrieve_offer(&self, host: &str, id: &str) -> Result<OfferResource, MintError> {
        self.mint(host)?.get_offer(id).await
    }

    async fn retrieve_operation(
        &self,
        host: &str,
        id: &str,
    ) -> Result<OperationResource, MintError> {
        self.mint(host)?.get_operation(id).await
    }

    async fn retrieve_transaction(
        &self,
        host: &str,
        id: &str,
    ) -> Result<TransactionResource, MintError> {
        self.mint(host)?.get_transaction(id).await
    }

    async fn retrieve_balance(
        &self,
        host: &str,
        asset: &str,
        holder: &str,
    ) -> Result<BalanceResource, MintError> {
        self.mint(host)?.get_balance(asset, holder).await
    }

    async fn propagate_offer(&self, host: &str, id: &str) -> Result<(), MintError> {
        self.mint(host)?.receive_offer_propagation(id).await?;
        Ok(())
    }

    async fn propagate_operation(&self, host: &str, id: &str) -> Result<(), MintError> {
        self.mint(host)?.receive_operation_propagation(id).await?;
        Ok(())
    }

    async fn propagate_transaction(
        &self,
        host: &str,
        id: &str,
        lock: &str,
        hop: usize,
    ) -> Result<TransactionResource, MintError> {
        self.mint(host)?
            .receive_transaction_propagation(id, lock, hop)
            .await
    }

    async fn settle_transaction(&self, host: &str, id: &str, lock: &str) -> Result<(), MintError> {
        self.mint(host)?
            .settle_transaction(None, id, Some(lock))
            .await?;
        Ok(())
    }

    async fn cancel_transaction(&self, host: &str, id: &str, lock: &str) -> Result<(), MintError> {
        self.mint(host)?
            .cancel_transaction(None, id, Some(lock))
            .await?;
        Ok(())
    }
}

fn test_config(host: &str, expiry_ms: i64) -> Config {
    Config {
        environment: "test".to_string(),
        mint_host: host.to_string(),
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 2406,
            workers: 1,
        },
        database: DatabaseConfig {
            path: ":memory:".to_string(),
            max_connections: 1,
        },
        transaction: TransactionConfig {
            expiry_ms,
        },
        propagation: PropagationConfig {
            timeout_secs: 5,
            max_retry_attempts: 8,
            retry_delay_seconds: 1,
        },
    }
}

async fn setup_mints(hosts: &[&str], expiry_ms: i64) -> Vec<Arc<Mint>> {
    let router = Arc::new(TestRouter::default());
    let mut mints = Vec::with_capacity(hosts.len());
    for host in hosts {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let mint = Arc::new(Mint::new(
            test_config(host, expiry_ms),
            db,
            router.clone() as Arc<dyn MintTransport>,
        ));
        router.register(host, mint.clone());
        mints.push(mint);
    }
    mints
}

/// Runs every mint's deferred work until a full round executes nothing.
async fn drain(mints: &[Arc<Mint>]) {
    loop {
        let mut ran = false;
        for mint in mints {
            while mint.run_one().await.unwrap() {
                ran = true;
            }
        }
        if !ran {
            break;
        }
    }
}

/// Three mints, one user each, one USD.2 asset each, and the two offers the
/// multi-hop scenarios chain through:
/// o1: u1 sells a1 against a0 at 100/100, amount 100;
/// o2: u2 sells a2 against a1 at 100/98, amount 100.
struct Net {
    mints: Vec<Arc<Mint>>,
    users: Vec<Address>,
    assets: Vec<AssetName>,
    offers: Vec<EntityId>,
}

async fn setup_net(expiry_ms: i64) -> Net {
    let mints = setup_mints(&["m0.mint.test", "m1.mint.test", "m2.mint.test"], expiry_ms).await;

    let mut users = Vec::new();
    let mut assets = Vec::new();
    for (i, mint) in mints.iter().enumerate() {
        let user = mint.address_for(&format!("u{}", i)).unwrap();
        mint.create_asset(
            &user,
            &CreateAssetRequest {
                code: "USD".to_string(),
                scale: 2,
            },
        )
        .await
        .unwrap();
        assets.push(AssetName::new(user.clone(), "USD", 2).unwrap());
        users.push(user);
    }

    let o1 = mints[1]
        .create_offer(
            &users[1],
            &CreateOfferRequest {
                pair: format!("{}/{}", assets[1], assets[0]),
                price: "100/100".to_string(),
                amount: "100".to_string(),
            },
        )
        .await
        .unwrap();
    let o2 = mints[2]
        .create_offer(
            &users[2],
            &CreateOfferRequest {
                pair: format!("{}/{}", assets[2], assets[1]),
                price: "100/98".to_string(),
                amount: "100".to_string(),
            },
        )
        .await
        .unwrap();

    Net {
        mints,
        users,
        assets,
        offers: vec![o1.id, o2.id],
    }
}

async fn canonical_balance(mint: &Mint, asset: &AssetName, holder: &Address) -> Option<Amount> {
    let mut conn = mint.db().acquire().await.unwrap();
    database::load_balance(&mut conn, asset, holder, PropagationType::Canonical)
        .await
        .unwrap()
        .map(|b| b.value)
}

async fn mirrored_balance(mint: &Mint, asset: &AssetName, holder: &Address) -> Option<Amount> {
    let mut conn = mint.db().acquire().await.unwrap();
    database::load_balance(&mut conn, asset, holder, PropagationType::Propagated)
        .await
        .unwrap()
        .map(|b| b.value)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_transaction_with_two_offers() {
    let net = setup_net(3_600_000).await;
    let (m0, m1, m2) = (&net.mints[0], &net.mints[1], &net.mints[2]);
    let (u0, u1, u2) = (&net.users[0], &net.users[1], &net.users[2]);
    let (a0, a1, a2) = (&net.assets[0], &net.assets[1], &net.assets[2]);

    let tx = m0
        .create_transaction(
            u0,
            &CreateTransactionRequest {
                pair: format!("{}/{}", a0, a2),
                amount: "10".to_string(),
                destination: u2.to_string(),
                path: vec![net.offers[0].to_string(), net.offers[1].to_string()],
            },
        )
        .await
        .unwrap();

    assert_eq!(tx.status, TxStatus::Reserved);
    assert_eq!(tx.amount, Amount::new(10));
    assert_eq!(tx.destination, *u2);
    assert_eq!(tx.path, net.offers);
    assert!(!tx.lock.is_empty());

    // The coordinator stores only hop 0: the initiator paying the first
    // offer's owner in base units.
    assert_eq!(tx.operations.len(), 1);
    assert_eq!(tx.crossings.len(), 0);
    let hop0 = &tx.operations[0];
    assert_eq!(hop0.transaction_hop, Some(0));
    assert_eq!(hop0.asset, *a0);
    assert_eq!(hop0.source.as_ref(), Some(u0));
    assert_eq!(hop0.destination.as_ref(), Some(u1));
    assert_eq!(hop0.amount, Amount::new(11));
    assert_eq!(hop0.status, TxStatus::Reserved);

    // m1 holds the crossing through o1 and the intermediate operation, with
    // the same lock.
    let tx1 = m1.get_transaction(&tx.id.to_string()).await.unwrap();
    assert_eq!(tx1.lock, tx.lock);
    assert_eq!(tx1.status, TxStatus::Reserved);
    assert_eq!(tx1.operations.len(), 1);
    assert_eq!(tx1.crossings.len(), 1);
    assert_eq!(tx1.crossings[0].transaction_hop, 1);
    assert_eq!(tx1.crossings[0].offer, net.offers[0]);
    assert_eq!(tx1.crossings[0].amount, Amount::new(11));
    assert_eq!(tx1.crossings[0].status, TxStatus::Reserved);
    assert_eq!(tx1.operations[0].transaction_hop, Some(2));
    assert_eq!(tx1.operations[0].asset, *a1);
    assert_eq!(tx1.operations[0].source.as_ref(), Some(u1));
    assert_eq!(tx1.operations[0].destination.as_ref(), Some(u2));
    assert_eq!(tx1.operations[0].amount, Amount::new(11));

    // m2 holds the crossing through o2 and the final delivery of the quote
    // amount.
    let tx2 = m2.get_transaction(&tx.id.to_string()).await.unwrap();
    assert_eq!(tx2.lock, tx.lock);
    assert_eq!(tx2.crossings.len(), 1);
    assert_eq!(tx2.operations.len(), 1);
    assert_eq!(tx2.crossings[0].transaction_hop, 3);
    assert_eq!(tx2.crossings[0].offer, net.offers[1]);
    assert_eq!(tx2.crossings[0].amount, Amount::new(11));
    assert_eq!(tx2.operations[0].transaction_hop, Some(4));
    assert_eq!(tx2.operations[0].asset, *a2);
    assert_eq!(tx2.operations[0].source.as_ref(), Some(u2));
    assert_eq!(tx2.operations[0].destination.as_ref(), Some(u2));
    assert_eq!(tx2.operations[0].amount, Amount::new(10));

    // Reservation effects are already visible: conservative totals.
    assert_eq!(canonical_balance(m0, a0, u1).await, Some(Amount::new(11)));
    assert_eq!(canonical_balance(m1, a1, u2).await, Some(Amount::new(11)));
    let o1 = m1.get_offer(&net.offers[0].to_string()).await.unwrap();
    assert_eq!(o1.remainder, Amount::new(89));
    let o2 = m2.get_offer(&net.offers[1].to_string()).await.unwrap();
    assert_eq!(o2.remainder, Amount::new(89));
}

#[tokio::test]
async fn insufficient_offer_remainder_fails_cleanly() {
    let net = setup_net(3_600_000).await;
    let (m0, m1) = (&net.mints[0], &net.mints[1]);
    let (u0, u1, u2) = (&net.users[0], &net.users[1], &net.users[2]);
    let (a0, a1, a2) = (&net.assets[0], &net.assets[1], &net.assets[2]);

    let o1_small = m1
        .create_offer(
            u1,
            &CreateOfferRequest {
                pair: format!("{}/{}", a1, a0),
                price: "100/100".to_string(),
                amount: "5".to_string(),
            },
        )
        .await
        .unwrap();

    let err = m0
        .create_transaction(
            u0,
            &CreateTransactionRequest {
                pair: format!("{}/{}", a0, a2),
                amount: "10".to_string(),
                destination: u2.to_string(),
                path: vec![o1_small.id.to_string(), net.offers[1].to_string()],
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "transaction_failed");

    // Nothing moved: no balance was created and the offer kept its remainder.
    assert_eq!(canonical_balance(m0, a0, u1).await, None);
    let offer = m1.get_offer(&o1_small.id.to_string()).await.unwrap();
    assert_eq!(offer.remainder, Amount::new(5));
}

#[tokio::test]
async fn negative_amount_is_rejected_before_any_write() {
    let net = setup_net(3_600_000).await;
    let (m0, m1) = (&net.mints[0], &net.mints[1]);
    let (u0, u1, u2) = (&net.users[0], &net.users[1], &net.users[2]);
    let (a0, a2) = (&net.assets[0], &net.assets[2]);

    let err = m0
        .create_transaction(
            u0,
            &CreateTransactionRequest {
                pair: format!("{}/{}", a0, a2),
                amount: "-10".to_string(),
                destination: u2.to_string(),
                path: vec![net.offers[0].to_string(), net.offers[1].to_string()],
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "amount_invalid");
    assert_eq!(canonical_balance(m0, a0, u1).await, None);
    let o1 = m1.get_offer(&net.offers[0].to_string()).await.unwrap();
    assert_eq!(o1.remainder, Amount::new(100));
}

#[tokio::test]
async fn invalid_pair_is_rejected() {
    let net = setup_net(3_600_000).await;
    let (m0, u0, u2) = (&net.mints[0], &net.users[0], &net.users[2]);

    let err = m0
        .create_transaction(
            u0,
            &CreateTransactionRequest {
                pair: format!("foo/{}", net.assets[2]),
                amount: "10".to_string(),
                destination: u2.to_string(),
                path: vec![],
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "pair_invalid");
}

#[tokio::test]
async fn empty_path_same_pair_is_a_pure_operation() {
    let net = setup_net(3_600_000).await;
    let (m0, u0, u2) = (&net.mints[0], &net.users[0], &net.users[2]);
    let a0 = &net.assets[0];

    let tx = m0
        .create_transaction(
            u0,
            &CreateTransactionRequest {
                pair: format!("{}/{}", a0, a0),
                amount: "10".to_string(),
                destination: u2.to_string(),
                path: vec![],
            },
        )
        .await
        .unwrap();

    assert_eq!(tx.operations.len(), 1);
    assert_eq!(tx.crossings.len(), 0);
    assert_eq!(tx.operations[0].transaction_hop, Some(0));
    assert_eq!(tx.operations[0].amount, Amount::new(10));
    assert_eq!(tx.operations[0].source.as_ref(), Some(u0));
    assert_eq!(tx.operations[0].destination.as_ref(), Some(u2));

    // Issuance from u0, so only the destination balance exists.
    assert_eq!(canonical_balance(m0, a0, u2).await, Some(Amount::new(10)));
}

#[tokio::test]
async fn remote_base_asset_leaves_coordinator_hopless() {
    let net = setup_net(3_600_000).await;
    let (m0, m1, m2) = (&net.mints[0], &net.mints[1], &net.mints[2]);
    let (u0, u1, u2) = (&net.users[0], &net.users[1], &net.users[2]);
    let (a1, a2) = (&net.assets[1], &net.assets[2]);

    // u0 already holds 11 units of u1's asset, settled through a direct
    // issuance on m1.
    m1.create_operation(
        u1,
        &a1.to_string(),
        &CreateOperationRequest {
            amount: "11".to_string(),
            source: None,
            destination: Some(u0.to_string()),
        },
    )
    .await
    .unwrap();

    let tx = m0
        .create_transaction(
            u0,
            &CreateTransactionRequest {
                pair: format!("{}/{}", a1, a2),
                amount: "10".to_string(),
                destination: u2.to_string(),
                path: vec![net.offers[1].to_string()],
            },
        )
        .await
        .unwrap();

    // The coordinator owns neither the base asset nor any offer: no hops.
    assert_eq!(tx.status, TxStatus::Reserved);
    assert_eq!(tx.operations.len(), 0);
    assert_eq!(tx.crossings.len(), 0);

    let tx1 = m1.get_transaction(&tx.id.to_string()).await.unwrap();
    assert_eq!(tx1.operations.len(), 1);
    assert_eq!(tx1.crossings.len(), 0);
    assert_eq!(tx1.operations[0].transaction_hop, Some(0));
    assert_eq!(tx1.operations[0].asset, *a1);
    assert_eq!(tx1.operations[0].source.as_ref(), Some(u0));
    assert_eq!(tx1.operations[0].destination.as_ref(), Some(u2));
    assert_eq!(tx1.operations[0].amount, Amount::new(11));

    let tx2 = m2.get_transaction(&tx.id.to_string()).await.unwrap();
    assert_eq!(tx2.crossings.len(), 1);
    assert_eq!(tx2.operations.len(), 1);
    assert_eq!(tx2.crossings[0].transaction_hop, 1);
    assert_eq!(tx2.crossings[0].amount, Amount::new(11));
    assert_eq!(tx2.operations[0].transaction_hop, Some(2));
    assert_eq!(tx2.operations[0].amount, Amount::new(10));
    assert_eq!(tx2.operations[0].destination.as_ref(), Some(u2));

    // u0's holding was fully consumed by the reservation.
    assert_eq!(canonical_balance(m1, a1, u0).await, Some(Amount::ZERO));
    assert_eq!(canonical_balance(m1, a1, u2).await, Some(Amount::new(11)));
}

#[tokio::test]
async fn settle_walks_destination_first() {
    let net = setup_net(3_600_000).await;
    let (m0, m1, m2) = (&net.mints[0], &net.mints[1], &net.mints[2]);
    let (u0, u1, u2) = (&net.users[0], &net.users[1], &net.users[2]);
    let (a0, a1, a2) = (&net.assets[0], &net.assets[1], &net.assets[2]);

    let tx = m0
        .create_transaction(
            u0,
            &CreateTransactionRequest {
                pair: format!("{}/{}", a0, a2),
                amount: "10".to_string(),
                destination: u2.to_string(),
                path: vec![net.offers[0].to_string(), net.offers[1].to_string()],
            },
        )
        .await
        .unwrap();

    let settled = m0
        .settle_transaction(Some(u0), &tx.id.to_string(), None)
        .await
        .unwrap();
    assert_eq!(settled.status, TxStatus::Settled);
    assert!(settled
        .operations
        .iter()
        .all(|op| op.status == TxStatus::Settled));

    for mint in [m1, m2] {
        let remote = mint.get_transaction(&tx.id.to_string()).await.unwrap();
        assert_eq!(remote.status, TxStatus::Settled);
        assert!(remote
            .operations
            .iter()
            .all(|op| op.status == TxStatus::Settled));
        assert!(remote
            .crossings
            .iter()
            .all(|c| c.status == TxStatus::Settled));
    }

    // Settlement changes no balances; the reservation already moved them.
    assert_eq!(canonical_balance(m0, a0, u1).await, Some(Amount::new(11)));
    assert_eq!(canonical_balance(m1, a1, u2).await, Some(Amount::new(11)));

    // Settling twice is an illegal transition, as is canceling afterwards.
    let err = m0
        .settle_transaction(Some(u0), &tx.id.to_string(), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "transaction_settled");
    let err = m0
        .cancel_transaction(Some(u0), &tx.id.to_string(), Some(&tx.lock))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "transaction_settled");

    // Draining propagation refreshes the mirrors of the consumed offers.
    drain(&net.mints).await;
    let o1_mirror = m0.get_offer(&net.offers[0].to_string()).await.unwrap();
    assert_eq!(o1_mirror.remainder, Amount::new(89));
}

#[tokio::test]
async fn settle_requires_owner_or_lock() {
    let net = setup_net(3_600_000).await;
    let (m0, u0, u1, u2) = (&net.mints[0], &net.users[0], &net.users[1], &net.users[2]);
    let (a0, a2) = (&net.assets[0], &net.assets[2]);

    let tx = m0
        .create_transaction(
            u0,
            &CreateTransactionRequest {
                pair: format!("{}/{}", a0, a2),
                amount: "10".to_string(),
                destination: u2.to_string(),
                path: vec![net.offers[0].to_string(), net.offers[1].to_string()],
            },
        )
        .await
        .unwrap();

    let err = m0
        .settle_transaction(Some(u1), &tx.id.to_string(), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "lock_invalid");

    let err = m0
        .settle_transaction(None, &tx.id.to_string(), Some("wrong"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "lock_invalid");

    // The lock alone authorizes settlement.
    let settled = m0
        .settle_transaction(None, &tx.id.to_string(), Some(&tx.lock))
        .await
        .unwrap();
    assert_eq!(settled.status, TxStatus::Settled);
}

#[tokio::test]
async fn expiration_restores_balances_and_remainders() {
    // Expiry of zero: every reservation is expirable as soon as it exists.
    let net = setup_net(0).await;
    let (m0, m1, m2) = (&net.mints[0], &net.mints[1], &net.mints[2]);
    let (u0, u1, u2) = (&net.users[0], &net.users[1], &net.users[2]);
    let (a0, a1) = (&net.assets[0], &net.assets[1]);

    // u2 holds 20 units of a0, settled through a direct issuance.
    m0.create_operation(
        u0,
        &a0.to_string(),
        &CreateOperationRequest {
            amount: "20".to_string(),
            source: None,
            destination: Some(u2.to_string()),
        },
    )
    .await
    .unwrap();

    // u2 moves 10 quote units through o1; coordinator m2 owns no hop.
    let tx = m2
        .create_transaction(
            u2,
            &CreateTransactionRequest {
                pair: format!("{}/{}", a0, a1),
                amount: "10".to_string(),
                destination: u1.to_string(),
                path: vec![net.offers[0].to_string()],
            },
        )
        .await
        .unwrap();
    assert_eq!(tx.status, TxStatus::Reserved);

    // Reservation is visible everywhere it applies.
    assert_eq!(canonical_balance(m0, a0, u2).await, Some(Amount::new(10)));
    assert_eq!(canonical_balance(m0, a0, u1).await, Some(Amount::new(10)));
    let o1 = m1.get_offer(&net.offers[0].to_string()).await.unwrap();
    assert_eq!(o1.remainder, Amount::new(90));

    // Run the expiration tasks (and the queued propagation) on every mint.
    drain(&net.mints).await;

    // Every balance and remainder is back to its pre-reservation value.
    assert_eq!(canonical_balance(m0, a0, u2).await, Some(Amount::new(20)));
    assert_eq!(canonical_balance(m0, a0, u1).await, Some(Amount::ZERO));
    let o1 = m1.get_offer(&net.offers[0].to_string()).await.unwrap();
    assert_eq!(o1.remainder, Amount::new(100));
    assert_eq!(o1.status, OfferStatus::Active);

    // The transaction is canceled on every mint that stored it.
    for mint in [m0, m1, m2] {
        let copy = mint.get_transaction(&tx.id.to_string()).await.unwrap();
        assert_eq!(copy.status, TxStatus::Canceled);
        assert!(copy.operations.iter().all(|op| op.status == TxStatus::Canceled));
        assert!(copy.crossings.iter().all(|c| c.status == TxStatus::Canceled));
    }

    // Mirrors caught up with the restored canonical state.
    assert_eq!(mirrored_balance(m2, a0, u2).await, Some(Amount::new(20)));
    let o1_mirror = m0.get_offer(&net.offers[0].to_string()).await.unwrap();
    assert_eq!(o1_mirror.remainder, Amount::new(100));

    // Expiration is idempotent: draining again changes nothing.
    drain(&net.mints).await;
    assert_eq!(canonical_balance(m0, a0, u2).await, Some(Amount::new(20)));
    let o1 = m1.get_offer(&net.offers[0].to_string()).await.unwrap();
    assert_eq!(o1.remainder, Amount::new(100));
}

#[tokio::test]
async fn mid_path_reservation_failure_reverses_partial_effects() {
    let net = setup_net(3_600_000).await;
    let (m0, m1) = (&net.mints[0], &net.mints[1]);
    let (u0, u1, u2) = (&net.users[0], &net.users[1], &net.users[2]);
    let (a0, a1, a2) = (&net.assets[0], &net.assets[1], &net.assets[2]);

    // Give m0 a mirror of o1 while its remainder is still 100.
    drain(&net.mints).await;

    // Consume 95 of o1 and settle, leaving remainder 5. The mirror refresh
    // stays queued on m1, so m0 plans against a stale remainder of 100.
    let consume = m0
        .create_transaction(
            u0,
            &CreateTransactionRequest {
                pair: format!("{}/{}", a0, a1),
                amount: "95".to_string(),
                destination: u1.to_string(),
                path: vec![net.offers[0].to_string()],
            },
        )
        .await
        .unwrap();
    m0.settle_transaction(Some(u0), &consume.id.to_string(), None)
        .await
        .unwrap();
    assert_eq!(
        m0.get_offer(&net.offers[0].to_string())
            .await
            .unwrap()
            .remainder,
        Amount::new(100)
    );

    // The plan passes on the stale mirror; m1's authoritative reservation
    // fails and the coordinator reverses its own hop.
    let err = m0
        .create_transaction(
            u0,
            &CreateTransactionRequest {
                pair: format!("{}/{}", a0, a2),
                amount: "10".to_string(),
                destination: u2.to_string(),
                path: vec![net.offers[0].to_string(), net.offers[1].to_string()],
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "transaction_failed");

    // u1's balance holds only the settled 95; the failed hop 0 credit of 11
    // was reversed.
    assert_eq!(canonical_balance(m0, a0, u1).await, Some(Amount::new(95)));
    let o1 = m1.get_offer(&net.offers[0].to_string()).await.unwrap();
    assert_eq!(o1.remainder, Amount::new(5));
}

#[tokio::test]
async fn direct_operations_enforce_issuer_and_balance_rules() {
    let net = setup_net(3_600_000).await;
    let (m0, m2) = (&net.mints[0], &net.mints[2]);
    let (u0, u1, u2) = (&net.users[0], &net.users[1], &net.users[2]);
    let a0 = &net.assets[0];

    // Only the issuer operates an asset directly.
    let err = m0
        .create_operation(
            u1,
            &a0.to_string(),
            &CreateOperationRequest {
                amount: "5".to_string(),
                source: None,
                destination: Some(u2.to_string()),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "operation_not_authorized");

    // At least one endpoint is required.
    let err = m0
        .create_operation(
            u0,
            &a0.to_string(),
            &CreateOperationRequest {
                amount: "5".to_string(),
                source: None,
                destination: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "operation_invalid");

    // Issuance, annihilation, transfer.
    m0.create_operation(
        u0,
        &a0.to_string(),
        &CreateOperationRequest {
            amount: "7".to_string(),
            source: None,
            destination: Some(u2.to_string()),
        },
    )
    .await
    .unwrap();
    assert_eq!(canonical_balance(m0, a0, u2).await, Some(Amount::new(7)));

    m0.create_operation(
        u0,
        &a0.to_string(),
        &CreateOperationRequest {
            amount: "3".to_string(),
            source: Some(u2.to_string()),
            destination: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(canonical_balance(m0, a0, u2).await, Some(Amount::new(4)));

    let err = m0
        .create_operation(
            u0,
            &a0.to_string(),
            &CreateOperationRequest {
                amount: "100".to_string(),
                source: Some(u2.to_string()),
                destination: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "amount_invalid");

    let operation = m0
        .create_operation(
            u0,
            &a0.to_string(),
            &CreateOperationRequest {
                amount: "2".to_string(),
                source: Some(u2.to_string()),
                destination: Some(u1.to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(operation.status, TxStatus::Settled);
    assert_eq!(canonical_balance(m0, a0, u2).await, Some(Amount::new(2)));
    assert_eq!(canonical_balance(m0, a0, u1).await, Some(Amount::new(2)));

    // A self-transfer moves nothing but must still be covered by the
    // pre-operation balance.
    let err = m0
        .create_operation(
            u0,
            &a0.to_string(),
            &CreateOperationRequest {
                amount: "5".to_string(),
                source: Some(u2.to_string()),
                destination: Some(u2.to_string()),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "amount_invalid");

    m0.create_operation(
        u0,
        &a0.to_string(),
        &CreateOperationRequest {
            amount: "2".to_string(),
            source: Some(u2.to_string()),
            destination: Some(u2.to_string()),
        },
    )
    .await
    .unwrap();
    assert_eq!(canonical_balance(m0, a0, u2).await, Some(Amount::new(2)));

    // A source with no balance at all is rejected.
    let stranger = Address::from_str("nobody@m2.mint.test").unwrap();
    let err = m0
        .create_operation(
            u0,
            &a0.to_string(),
            &CreateOperationRequest {
                amount: "1".to_string(),
                source: Some(stranger.to_string()),
                destination: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "source_invalid");

    // Draining mirrors the settled operations and balances on the holders'
    // mints.
    drain(&net.mints).await;
    assert_eq!(mirrored_balance(m2, a0, u2).await, Some(Amount::new(2)));
}

#[tokio::test]
async fn offers_propagate_to_the_quote_mint() {
    let net = setup_net(3_600_000).await;
    let m0 = &net.mints[0];

    // Before draining, m0 has no copy of o1.
    let err = m0.get_offer(&net.offers[0].to_string()).await.unwrap_err();
    assert_eq!(err.code(), "offer_not_found");

    drain(&net.mints).await;

    // o1's quote asset is issued on m0, so m0 received a mirror.
    let mirror = m0.get_offer(&net.offers[0].to_string()).await.unwrap();
    assert_eq!(mirror.amount, Amount::new(100));
    assert_eq!(mirror.remainder, Amount::new(100));
    assert_eq!(mirror.status, OfferStatus::Active);
}

#[tokio::test]
async fn cancel_with_lock_forces_expiration() {
    let net = setup_net(3_600_000).await;
    let (m0, m1) = (&net.mints[0], &net.mints[1]);
    let (u0, u1, u2) = (&net.users[0], &net.users[1], &net.users[2]);
    let (a0, a2) = (&net.assets[0], &net.assets[2]);

    let tx = m0
        .create_transaction(
            u0,
            &CreateTransactionRequest {
                pair: format!("{}/{}", a0, a2),
                amount: "10".to_string(),
                destination: u2.to_string(),
                path: vec![net.offers[0].to_string(), net.offers[1].to_string()],
            },
        )
        .await
        .unwrap();

    let err = m0
        .cancel_transaction(None, &tx.id.to_string(), Some("wrong"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "lock_invalid");

    let canceled = m0
        .cancel_transaction(Some(u0), &tx.id.to_string(), Some(&tx.lock))
        .await
        .unwrap();
    assert_eq!(canceled.status, TxStatus::Canceled);

    // Everything reserved was restored, on every mint.
    assert_eq!(canonical_balance(m0, a0, u1).await, Some(Amount::ZERO));
    let o1 = m1.get_offer(&net.offers[0].to_string()).await.unwrap();
    assert_eq!(o1.remainder, Amount::new(100));
    for mint in &net.mints {
        let copy = mint.get_transaction(&tx.id.to_string()).await.unwrap();
        assert_eq!(copy.status, TxStatus::Canceled);
    }

    // Canceling again is a no-op.
    let again = m0
        .cancel_transaction(Some(u0), &tx.id.to_string(), Some(&tx.lock))
        .await
        .unwrap();
    assert_eq!(again.status, TxStatus::Canceled);
}

#[tokio::test]
async fn path_revisiting_a_user_is_legal() {
    // A positive loop: u1 appears twice on the path through a third mint.
    let mints = setup_mints(
        &["m0.mint.test", "m1.mint.test", "m2.mint.test", "m3.mint.test"],
        3_600_000,
    )
    .await;
    let mut users = Vec::new();
    let mut assets = Vec::new();
    for (i, mint) in mints.iter().enumerate() {
        let user = mint.address_for(&format!("u{}", i)).unwrap();
        mint.create_asset(
            &user,
            &CreateAssetRequest {
                code: "USD".to_string(),
                scale: 2,
            },
        )
        .await
        .unwrap();
        assets.push(AssetName::new(user.clone(), "USD", 2).unwrap());
        users.push(user);
    }

    let offer = |mint: &Arc<Mint>, user: &Address, pair: String, price: &str| {
        let mint = mint.clone();
        let user = user.clone();
        let price = price.to_string();
        async move {
            mint.create_offer(
                &user,
                &CreateOfferRequest {
                    pair,
                    price,
                    amount: "100".to_string(),
                },
            )
            .await
            .unwrap()
            .id
        }
    };

    let o1 = offer(
        &mints[1],
        &users[1],
        format!("{}/{}", assets[1], assets[0]),
        "100/100",
    )
    .await;
    let o2 = offer(
        &mints[3],
        &users[3],
        format!("{}/{}", assets[3], assets[1]),
        "100/120",
    )
    .await;
    let o3 = offer(
        &mints[1],
        &users[1],
        format!("{}/{}", assets[1], assets[3]),
        "100/100",
    )
    .await;
    let o4 = offer(
        &mints[2],
        &users[2],
        format!("{}/{}", assets[2], assets[1]),
        "100/98",
    )
    .await;

    let tx = mints[0]
        .create_transaction(
            &users[0],
            &CreateTransactionRequest {
                pair: format!("{}/{}", assets[0], assets[2]),
                amount: "10".to_string(),
                destination: users[2].to_string(),
                path: vec![o1.to_string(), o2.to_string(), o3.to_string(), o4.to_string()],
            },
        )
        .await
        .unwrap();

    assert_eq!(tx.status, TxStatus::Reserved);
    assert_eq!(tx.operations.len(), 1);
    assert_eq!(tx.operations[0].transaction_hop, Some(0));
    // Straight price composition: 10 -> 11 (100/98) -> 11 (100/100)
    // -> ceil(11*100/120)=10 -> 10 (100/100).
    assert_eq!(tx.operations[0].amount, Amount::new(10));
}
