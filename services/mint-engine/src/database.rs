//! SQL store for one mint: schema bootstrap, sessions and entity primitives.
//!
//! Every entity helper takes a `&mut SqliteConnection` so it runs equally
//! inside a session (`Database::begin`) or on a plain pooled connection. A
//! session is the unit of atomicity: all hop mutations of one transaction on
//! one mint commit or roll back together.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite, SqliteConnection};
use tracing::info;
use uuid::Uuid;

use mint_core::{Address, Amount, AssetName, AssetPair, EntityId, Price};

use crate::errors::{MintError, Result};
use crate::models::{
    Asset, Balance, Crossing, Offer, OfferStatus, Operation, PropagationType, Task, TaskKind,
    Transaction, TxStatus,
};

pub type StoreSession = sqlx::Transaction<'static, Sqlite>;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS assets (
        name        TEXT PRIMARY KEY,
        owner       TEXT NOT NULL,
        code        TEXT NOT NULL,
        scale       INTEGER NOT NULL,
        created     INTEGER NOT NULL,
        propagation TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS balances (
        token       TEXT NOT NULL,
        asset       TEXT NOT NULL,
        holder      TEXT NOT NULL,
        value       TEXT NOT NULL,
        created     INTEGER NOT NULL,
        propagation TEXT NOT NULL,
        PRIMARY KEY (asset, holder, propagation)
    )",
    "CREATE TABLE IF NOT EXISTS offers (
        id          TEXT PRIMARY KEY,
        owner       TEXT NOT NULL,
        base_asset  TEXT NOT NULL,
        quote_asset TEXT NOT NULL,
        price       TEXT NOT NULL,
        amount      TEXT NOT NULL,
        remainder   TEXT NOT NULL,
        status      TEXT NOT NULL,
        created     INTEGER NOT NULL,
        propagation TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS operations (
        id              TEXT PRIMARY KEY,
        owner           TEXT NOT NULL,
        asset           TEXT NOT NULL,
        source          TEXT,
        destination     TEXT,
        amount          TEXT NOT NULL,
        status          TEXT NOT NULL,
        transaction_id  TEXT,
        transaction_hop INTEGER,
        created         INTEGER NOT NULL,
        propagation     TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_operations_transaction
        ON operations (transaction_id)",
    "CREATE TABLE IF NOT EXISTS crossings (
        id              TEXT PRIMARY KEY,
        owner           TEXT NOT NULL,
        offer_id        TEXT NOT NULL,
        amount          TEXT NOT NULL,
        status          TEXT NOT NULL,
        transaction_id  TEXT NOT NULL,
        transaction_hop INTEGER NOT NULL,
        created         INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_crossings_transaction
        ON crossings (transaction_id)",
    "CREATE TABLE IF NOT EXISTS transactions (
        id          TEXT PRIMARY KEY,
        owner       TEXT NOT NULL,
        pair        TEXT NOT NULL,
        amount      TEXT NOT NULL,
        destination TEXT NOT NULL,
        path        TEXT NOT NULL,
        status      TEXT NOT NULL,
        lock        TEXT NOT NULL,
        created     INTEGER NOT NULL,
        expiry      INTEGER NOT NULL,
        propagation TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS tasks (
        id       INTEGER PRIMARY KEY AUTOINCREMENT,
        kind     TEXT NOT NULL,
        subject  TEXT NOT NULL,
        ready_at INTEGER NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        status   TEXT NOT NULL DEFAULT 'pending',
        created  INTEGER NOT NULL
    )",
];

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the store at `path`; an empty path resolves to
    /// `~/.mint/mint-<environment>.db` and `:memory:` opens an in-memory
    /// store (tests).
    pub async fn open(path: &str, environment: &str, max_connections: u32) -> Result<Database> {
        if path == ":memory:" {
            return Database::in_memory().await;
        }

        let path = if path.is_empty() {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            format!("{}/.mint/mint-{}.db", home, environment)
        } else {
            path.to_string()
        };
        if let Some(dir) = Path::new(&path).parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    MintError::Internal(format!("creating {}: {}", dir.display(), e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        info!("Opened sqlite store: path={}", path);

        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// In-memory store pinned to a single connection so the database outlives
    /// individual acquires.
    pub async fn in_memory() -> Result<Database> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(MintError::Database)?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begins a store session. Dropping the session without `commit` rolls
    /// back, which guarantees release on every exit path.
    pub async fn begin(&self) -> Result<StoreSession> {
        Ok(self.pool.begin().await?)
    }

    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> MintError {
    MintError::Internal(format!("corrupt {} row: {}", what, err))
}

fn parse_address(s: &str, what: &str) -> Result<Address> {
    s.parse().map_err(|e| corrupt(what, e))
}

fn parse_amount(s: &str, what: &str) -> Result<Amount> {
    s.parse().map_err(|e| corrupt(what, e))
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

pub async fn create_asset(conn: &mut SqliteConnection, asset: &Asset) -> Result<()> {
    sqlx::query(
        "INSERT INTO assets (name, owner, code, scale, created, propagation)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(asset.name.to_string())
    .bind(asset.name.owner.to_string())
    .bind(&asset.name.code)
    .bind(asset.name.scale as i64)
    .bind(asset.created)
    .bind(asset.propagation.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn load_asset(conn: &mut SqliteConnection, name: &AssetName) -> Result<Option<Asset>> {
    let row = sqlx::query("SELECT * FROM assets WHERE name = ?1")
        .bind(name.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| row_to_asset(&r)).transpose()
}

fn row_to_asset(row: &SqliteRow) -> Result<Asset> {
    let name: String = row.get("name");
    Ok(Asset {
        name: name.parse().map_err(|e| corrupt("asset", e))?,
        created: row.get("created"),
        propagation: PropagationType::parse(&row.get::<String, _>("propagation"))?,
    })
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

pub async fn load_balance(
    conn: &mut SqliteConnection,
    asset: &AssetName,
    holder: &Address,
    propagation: PropagationType,
) -> Result<Option<Balance>> {
    let row = sqlx::query(
        "SELECT * FROM balances WHERE asset = ?1 AND holder = ?2 AND propagation = ?3",
    )
    .bind(asset.to_string())
    .bind(holder.to_string())
    .bind(propagation.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|r| row_to_balance(&r)).transpose()
}

/// Atomically initialises a zero canonical balance when absent; the caller's
/// session serialises the check-and-insert.
pub async fn load_or_create_balance(
    conn: &mut SqliteConnection,
    asset: &AssetName,
    holder: &Address,
    created: i64,
) -> Result<Balance> {
    if let Some(balance) =
        load_balance(conn, asset, holder, PropagationType::Canonical).await?
    {
        return Ok(balance);
    }
    let balance = Balance {
        token: format!("balance_{}", Uuid::new_v4().simple()),
        asset: asset.clone(),
        holder: holder.clone(),
        value: Amount::ZERO,
        created,
        propagation: PropagationType::Canonical,
    };
    save_balance(conn, &balance).await?;
    Ok(balance)
}

pub async fn save_balance(conn: &mut SqliteConnection, balance: &Balance) -> Result<()> {
    sqlx::query(
        "INSERT INTO balances (token, asset, holder, value, created, propagation)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (asset, holder, propagation) DO UPDATE SET
             value = excluded.value,
             token = excluded.token",
    )
    .bind(&balance.token)
    .bind(balance.asset.to_string())
    .bind(balance.holder.to_string())
    .bind(balance.value.to_string())
    .bind(balance.created)
    .bind(balance.propagation.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn row_to_balance(row: &SqliteRow) -> Result<Balance> {
    Ok(Balance {
        token: row.get("token"),
        asset: row
            .get::<String, _>("asset")
            .parse()
            .map_err(|e| corrupt("balance", e))?,
        holder: parse_address(&row.get::<String, _>("holder"), "balance")?,
        value: parse_amount(&row.get::<String, _>("value"), "balance")?,
        created: row.get("created"),
        propagation: PropagationType::parse(&row.get::<String, _>("propagation"))?,
    })
}

// ---------------------------------------------------------------------------
// Offers
// ---------------------------------------------------------------------------

pub async fn save_offer(conn: &mut SqliteConnection, offer: &Offer) -> Result<()> {
    sqlx::query(
        "INSERT INTO offers
             (id, owner, base_asset, quote_asset, price, amount, remainder,
              status, created, propagation)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT (id) DO UPDATE SET
             remainder = excluded.remainder,
             status = excluded.status",
    )
    .bind(offer.id.to_string())
    .bind(offer.owner.to_string())
    .bind(offer.pair.base.to_string())
    .bind(offer.pair.quote.to_string())
    .bind(offer.price.to_string())
    .bind(offer.amount.to_string())
    .bind(offer.remainder.to_string())
    .bind(offer.status.as_str())
    .bind(offer.created)
    .bind(offer.propagation.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn load_offer(conn: &mut SqliteConnection, id: &EntityId) -> Result<Option<Offer>> {
    let row = sqlx::query("SELECT * FROM offers WHERE id = ?1")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| row_to_offer(&r)).transpose()
}

/// Atomically consumes `base_units` of the offer's remainder. The caller's
/// session plus the optimistic remainder guard linearise concurrent
/// transactions targeting the same offer: the loser fails cleanly with
/// `offer_insufficient`.
pub async fn reserve_remainder(
    conn: &mut SqliteConnection,
    id: &EntityId,
    base_units: Amount,
) -> Result<Amount> {
    let offer = load_offer(conn, id)
        .await?
        .ok_or_else(|| MintError::OfferNotFound(id.to_string()))?;
    if offer.remainder < base_units {
        return Err(MintError::OfferInsufficient {
            required: base_units.to_string(),
            available: offer.remainder.to_string(),
        });
    }
    let new_remainder = offer
        .remainder
        .checked_sub(base_units)
        .map_err(|e| MintError::AmountInvalid(e.to_string()))?;
    let status = if new_remainder.is_zero() {
        OfferStatus::Consumed
    } else {
        offer.status
    };
    let result = sqlx::query(
        "UPDATE offers SET remainder = ?1, status = ?2 WHERE id = ?3 AND remainder = ?4",
    )
    .bind(new_remainder.to_string())
    .bind(status.as_str())
    .bind(id.to_string())
    .bind(offer.remainder.to_string())
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(MintError::Internal(format!(
            "concurrent remainder update on offer {}",
            id
        )));
    }
    Ok(new_remainder)
}

/// Restores `base_units` to the offer's remainder on expiration or cancel.
pub async fn release_remainder(
    conn: &mut SqliteConnection,
    id: &EntityId,
    base_units: Amount,
) -> Result<Amount> {
    let offer = load_offer(conn, id)
        .await?
        .ok_or_else(|| MintError::OfferNotFound(id.to_string()))?;
    let new_remainder = offer
        .remainder
        .checked_add(base_units)
        .map_err(|e| MintError::AmountInvalid(e.to_string()))?;
    if new_remainder > offer.amount {
        return Err(MintError::Internal(format!(
            "release would lift remainder above amount on offer {}",
            id
        )));
    }
    let status = if offer.status == OfferStatus::Consumed && !new_remainder.is_zero() {
        OfferStatus::Active
    } else {
        offer.status
    };
    let result = sqlx::query(
        "UPDATE offers SET remainder = ?1, status = ?2 WHERE id = ?3 AND remainder = ?4",
    )
    .bind(new_remainder.to_string())
    .bind(status.as_str())
    .bind(id.to_string())
    .bind(offer.remainder.to_string())
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(MintError::Internal(format!(
            "concurrent remainder update on offer {}",
            id
        )));
    }
    Ok(new_remainder)
}

fn row_to_offer(row: &SqliteRow) -> Result<Offer> {
    let base: AssetName = row
        .get::<String, _>("base_asset")
        .parse()
        .map_err(|e| corrupt("offer", e))?;
    let quote: AssetName = row
        .get::<String, _>("quote_asset")
        .parse()
        .map_err(|e| corrupt("offer", e))?;
    let price: Price = row
        .get::<String, _>("price")
        .parse()
        .map_err(|e| corrupt("offer", e))?;
    Ok(Offer {
        id: row
            .get::<String, _>("id")
            .parse()
            .map_err(|e| corrupt("offer", e))?,
        owner: parse_address(&row.get::<String, _>("owner"), "offer")?,
        pair: AssetPair::new(base, quote),
        price,
        amount: parse_amount(&row.get::<String, _>("amount"), "offer")?,
        remainder: parse_amount(&row.get::<String, _>("remainder"), "offer")?,
        status: OfferStatus::parse(&row.get::<String, _>("status"))?,
        created: row.get("created"),
        propagation: PropagationType::parse(&row.get::<String, _>("propagation"))?,
    })
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

pub async fn save_operation(conn: &mut SqliteConnection, operation: &Operation) -> Result<()> {
    sqlx::query(
        "INSERT INTO operations
             (id, owner, asset, source, destination, amount, status,
              transaction_id, transaction_hop, created, propagation)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT (id) DO UPDATE SET
             status = excluded.status,
             amount = excluded.amount",
    )
    .bind(operation.id.to_string())
    .bind(operation.owner.to_string())
    .bind(operation.asset.to_string())
    .bind(operation.source.as_ref().map(|a| a.to_string()))
    .bind(operation.destination.as_ref().map(|a| a.to_string()))
    .bind(operation.amount.to_string())
    .bind(operation.status.as_str())
    .bind(operation.transaction.as_ref().map(|t| t.to_string()))
    .bind(operation.transaction_hop)
    .bind(operation.created)
    .bind(operation.propagation.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn load_operation(
    conn: &mut SqliteConnection,
    id: &EntityId,
) -> Result<Option<Operation>> {
    let row = sqlx::query("SELECT * FROM operations WHERE id = ?1")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| row_to_operation(&r)).transpose()
}

pub async fn load_operation_by_hop(
    conn: &mut SqliteConnection,
    transaction: &EntityId,
    hop: i64,
) -> Result<Option<Operation>> {
    let row = sqlx::query(
        "SELECT * FROM operations
         WHERE transaction_id = ?1 AND transaction_hop = ?2
           AND propagation = 'canonical'",
    )
    .bind(transaction.to_string())
    .bind(hop)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|r| row_to_operation(&r)).transpose()
}

pub async fn list_operations_by_transaction(
    conn: &mut SqliteConnection,
    transaction: &EntityId,
) -> Result<Vec<Operation>> {
    // Mirrors of remote hop operations are not part of this mint's own hop
    // set: only canonical rows are listed, settled, or reversed.
    let rows = sqlx::query(
        "SELECT * FROM operations
         WHERE transaction_id = ?1 AND propagation = 'canonical'
         ORDER BY transaction_hop",
    )
    .bind(transaction.to_string())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(row_to_operation).collect()
}

fn row_to_operation(row: &SqliteRow) -> Result<Operation> {
    let source: Option<String> = row.get("source");
    let destination: Option<String> = row.get("destination");
    let transaction: Option<String> = row.get("transaction_id");
    Ok(Operation {
        id: row
            .get::<String, _>("id")
            .parse()
            .map_err(|e| corrupt("operation", e))?,
        owner: parse_address(&row.get::<String, _>("owner"), "operation")?,
        asset: row
            .get::<String, _>("asset")
            .parse()
            .map_err(|e| corrupt("operation", e))?,
        source: source
            .map(|s| parse_address(&s, "operation"))
            .transpose()?,
        destination: destination
            .map(|s| parse_address(&s, "operation"))
            .transpose()?,
        amount: parse_amount(&row.get::<String, _>("amount"), "operation")?,
        status: TxStatus::parse(&row.get::<String, _>("status"))?,
        transaction: transaction
            .map(|s| s.parse().map_err(|e| corrupt("operation", e)))
            .transpose()?,
        transaction_hop: row.get("transaction_hop"),
        created: row.get("created"),
        propagation: PropagationType::parse(&row.get::<String, _>("propagation"))?,
    })
}

// ---------------------------------------------------------------------------
// Crossings
// ---------------------------------------------------------------------------

pub async fn save_crossing(conn: &mut SqliteConnection, crossing: &Crossing) -> Result<()> {
    sqlx::query(
        "INSERT INTO crossings
             (id, owner, offer_id, amount, status, transaction_id,
              transaction_hop, created)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (id) DO UPDATE SET
             status = excluded.status",
    )
    .bind(crossing.id.to_string())
    .bind(crossing.owner.to_string())
    .bind(crossing.offer.to_string())
    .bind(crossing.amount.to_string())
    .bind(crossing.status.as_str())
    .bind(crossing.transaction.to_string())
    .bind(crossing.transaction_hop)
    .bind(crossing.created)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn load_crossing_by_hop(
    conn: &mut SqliteConnection,
    transaction: &EntityId,
    hop: i64,
) -> Result<Option<Crossing>> {
    let row = sqlx::query(
        "SELECT * FROM crossings WHERE transaction_id = ?1 AND transaction_hop = ?2",
    )
    .bind(transaction.to_string())
    .bind(hop)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|r| row_to_crossing(&r)).transpose()
}

pub async fn list_crossings_by_transaction(
    conn: &mut SqliteConnection,
    transaction: &EntityId,
) -> Result<Vec<Crossing>> {
    let rows = sqlx::query(
        "SELECT * FROM crossings WHERE transaction_id = ?1 ORDER BY transaction_hop",
    )
    .bind(transaction.to_string())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(row_to_crossing).collect()
}

fn row_to_crossing(row: &SqliteRow) -> Result<Crossing> {
    Ok(Crossing {
        id: row
            .get::<String, _>("id")
            .parse()
            .map_err(|e| corrupt("crossing", e))?,
        owner: parse_address(&row.get::<String, _>("owner"), "crossing")?,
        offer: row
            .get::<String, _>("offer_id")
            .parse()
            .map_err(|e| corrupt("crossing", e))?,
        amount: parse_amount(&row.get::<String, _>("amount"), "crossing")?,
        status: TxStatus::parse(&row.get::<String, _>("status"))?,
        transaction: row
            .get::<String, _>("transaction_id")
            .parse()
            .map_err(|e| corrupt("crossing", e))?,
        transaction_hop: row.get("transaction_hop"),
        created: row.get("created"),
    })
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

pub async fn save_transaction(
    conn: &mut SqliteConnection,
    transaction: &Transaction,
) -> Result<()> {
    let path: Vec<String> = transaction.path.iter().map(|p| p.to_string()).collect();
    let path = serde_json::to_string(&path)
        .map_err(|e| MintError::Internal(format!("encoding path: {}", e)))?;
    sqlx::query(
        "INSERT INTO transactions
             (id, owner, pair, amount, destination, path, status, lock,
              created, expiry, propagation)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT (id) DO UPDATE SET
             status = excluded.status",
    )
    .bind(transaction.id.to_string())
    .bind(transaction.owner.to_string())
    .bind(transaction.pair.to_string())
    .bind(transaction.amount.to_string())
    .bind(transaction.destination.to_string())
    .bind(path)
    .bind(transaction.status.as_str())
    .bind(&transaction.lock)
    .bind(transaction.created)
    .bind(transaction.expiry)
    .bind(transaction.propagation.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn load_transaction(
    conn: &mut SqliteConnection,
    id: &EntityId,
) -> Result<Option<Transaction>> {
    let row = sqlx::query("SELECT * FROM transactions WHERE id = ?1")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| row_to_transaction(&r)).transpose()
}

fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
    let path: Vec<String> = serde_json::from_str(&row.get::<String, _>("path"))
        .map_err(|e| corrupt("transaction", e))?;
    let path = path
        .iter()
        .map(|p| p.parse().map_err(|e| corrupt("transaction", e)))
        .collect::<Result<Vec<EntityId>>>()?;
    Ok(Transaction {
        id: row
            .get::<String, _>("id")
            .parse()
            .map_err(|e| corrupt("transaction", e))?,
        owner: parse_address(&row.get::<String, _>("owner"), "transaction")?,
        pair: row
            .get::<String, _>("pair")
            .parse()
            .map_err(|e| corrupt("transaction", e))?,
        amount: parse_amount(&row.get::<String, _>("amount"), "transaction")?,
        destination: parse_address(&row.get::<String, _>("destination"), "transaction")?,
        path,
        status: TxStatus::parse(&row.get::<String, _>("status"))?,
        lock: row.get("lock"),
        created: row.get("created"),
        expiry: row.get("expiry"),
        propagation: PropagationType::parse(&row.get::<String, _>("propagation"))?,
    })
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

pub async fn enqueue_task(
    conn: &mut SqliteConnection,
    kind: TaskKind,
    subject: &str,
    ready_at: i64,
    created: i64,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO tasks (kind, subject, ready_at, attempts, status, created)
         VALUES (?1, ?2, ?3, 0, 'pending', ?4)",
    )
    .bind(kind.as_str())
    .bind(subject)
    .bind(ready_at)
    .bind(created)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// The earliest pending task whose `ready_at` has passed, if any.
pub async fn next_ready_task(conn: &mut SqliteConnection, now: i64) -> Result<Option<Task>> {
    let row = sqlx::query(
        "SELECT * FROM tasks
         WHERE status = 'pending' AND ready_at <= ?1
         ORDER BY ready_at, id LIMIT 1",
    )
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|r| row_to_task(&r)).transpose()
}

pub async fn complete_task(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query("UPDATE tasks SET status = 'done' WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn reschedule_task(
    conn: &mut SqliteConnection,
    id: i64,
    attempts: i64,
    ready_at: i64,
) -> Result<()> {
    sqlx::query("UPDATE tasks SET attempts = ?1, ready_at = ?2 WHERE id = ?3")
        .bind(attempts)
        .bind(ready_at)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn fail_task(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query("UPDATE tasks SET status = 'failed' WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn row_to_task(row: &SqliteRow) -> Result<Task> {
    Ok(Task {
        id: row.get("id"),
        kind: TaskKind::parse(&row.get::<String, _>("kind"))?,
        subject: row.get("subject"),
        ready_at: row.get("ready_at"),
        attempts: row.get("attempts"),
        created: row.get("created"),
    })
}
