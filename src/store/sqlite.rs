//! SQLite-backed store
//!
//! One table per entity kind holding the wire JSON plus the columns the
//! engine filters on, an address table keyed by location/sublocation/port,
//! and a node table holding checkpoints.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, Transaction};
use tracing::{debug, info};

use super::{AddressFilter, AddressOrder, InsertMetrics, ReadQuery, Store};
use crate::api::{Address, Entity, EntityKind, Key, Node, Response, Timestamp};

const ADDRESS_COLUMNS: &str = "location, sublocation, location_type, port, address_type, \
     last_online, protocol, client, last_successful_ping, last_successful_sync";

pub struct SqliteStore {
    db: Mutex<Connection>,
    max_addresses: usize,
}

impl SqliteStore {
    /// Open or create `aether.db` under `data_dir`.
    pub fn open(data_dir: &Path, max_addresses: usize) -> Result<Self> {
        std::fs::create_dir_all(data_dir).context("creating data directory")?;
        let db_path = data_dir.join("aether.db");
        let db = Connection::open(&db_path)
            .with_context(|| format!("opening database at {}", db_path.display()))?;

        // Enable WAL mode for concurrent read access
        db.execute_batch("PRAGMA journal_mode=WAL;")?;

        let store = Self::init(db, max_addresses)?;
        info!(path = %db_path.display(), "Store initialized");
        Ok(store)
    }

    pub fn open_in_memory(max_addresses: usize) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, max_addresses)
    }

    fn init(db: Connection, max_addresses: usize) -> Result<Self> {
        for kind in EntityKind::ALL {
            let table = kind.plural();
            db.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    fingerprint TEXT PRIMARY KEY,
                    creation INTEGER NOT NULL,
                    last_update INTEGER NOT NULL DEFAULT 0,
                    last_referenced INTEGER NOT NULL,
                    owner TEXT NOT NULL DEFAULT '',
                    ancestor TEXT NOT NULL DEFAULT '',
                    body TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS {table}_last_referenced ON {table}(last_referenced);
                CREATE INDEX IF NOT EXISTS {table}_ancestor ON {table}(ancestor);"
            ))
            .with_context(|| format!("creating {} table", table))?;
        }

        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS addresses (
                location TEXT NOT NULL,
                sublocation TEXT NOT NULL DEFAULT '',
                port INTEGER NOT NULL,
                location_type INTEGER NOT NULL DEFAULT 0,
                address_type INTEGER NOT NULL DEFAULT 0,
                last_online INTEGER NOT NULL DEFAULT 0,
                protocol TEXT NOT NULL DEFAULT '',
                client TEXT NOT NULL DEFAULT '',
                last_successful_ping INTEGER NOT NULL DEFAULT 0,
                last_successful_sync INTEGER NOT NULL DEFAULT 0,
                seen_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                PRIMARY KEY (location, sublocation, port)
            );
            CREATE TABLE IF NOT EXISTS nodes (
                node_id TEXT PRIMARY KEY,
                checkpoints TEXT NOT NULL
            );",
        )
        .context("creating address and node tables")?;

        Ok(Self {
            db: Mutex::new(db),
            max_addresses,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))
    }

    /// Keep the most recently seen addresses up to the table bound.
    fn trim_addresses(&self, db: &Connection) -> Result<usize> {
        let removed = db.execute(
            "DELETE FROM addresses WHERE rowid NOT IN (
                SELECT rowid FROM addresses
                ORDER BY MAX(last_successful_ping, last_online) DESC, seen_at DESC
                LIMIT ?1
            )",
            params![self.max_addresses as i64],
        )?;
        if removed > 0 {
            debug!(removed, "Trimmed address table");
        }
        Ok(removed)
    }
}

fn address_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Address> {
    let protocol: String = row.get(6)?;
    let client: String = row.get(7)?;
    Ok(Address {
        location: row.get(0)?,
        sublocation: row.get(1)?,
        location_type: row.get(2)?,
        port: row.get(3)?,
        address_type: row.get(4)?,
        last_online: row.get(5)?,
        protocol: serde_json::from_str(&protocol).unwrap_or_default(),
        client: serde_json::from_str(&client).unwrap_or_default(),
        last_successful_ping: row.get(8)?,
        last_successful_sync: row.get(9)?,
    })
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Refresh retention of everything an arriving entity points at.
fn touch_referenced(tx: &Transaction<'_>, entity: &Entity) -> Result<()> {
    let ts = entity.last_timestamp();
    for fingerprint in entity.referenced() {
        for kind in EntityKind::ALL {
            let mut stmt = tx.prepare_cached(&format!(
                "UPDATE {} SET last_referenced = MAX(last_referenced, ?1) WHERE fingerprint = ?2",
                kind.plural()
            ))?;
            stmt.execute(params![ts, fingerprint])?;
        }
    }
    Ok(())
}

enum Written {
    Inserted,
    Updated,
    Unchanged,
}

fn write_entity(tx: &Transaction<'_>, entity: &Entity) -> Result<Written> {
    let table = entity.kind().plural();
    let body = entity.to_json_string();
    let fingerprint = entity.fingerprint();

    if entity.kind().is_updateable() {
        let stored: Option<Timestamp> = match tx.query_row(
            &format!("SELECT last_update FROM {} WHERE fingerprint = ?1", table),
            [fingerprint],
            |row| row.get(0),
        ) {
            Ok(lu) => Some(lu),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };
        if let Some(stored) = stored {
            if entity.last_update() <= stored {
                return Ok(Written::Unchanged);
            }
            let mut stmt = tx.prepare_cached(&format!(
                "UPDATE {} SET body = ?1, last_update = ?2,
                 last_referenced = MAX(last_referenced, ?3) WHERE fingerprint = ?4",
                table
            ))?;
            stmt.execute(params![
                body,
                entity.last_update(),
                entity.last_timestamp(),
                fingerprint
            ])?;
            return Ok(Written::Updated);
        }
    }

    let mut stmt = tx.prepare_cached(&format!(
        "INSERT OR IGNORE INTO {} (fingerprint, creation, last_update, last_referenced, owner, ancestor, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        table
    ))?;
    let changed = stmt.execute(params![
        fingerprint,
        entity.creation(),
        entity.last_update(),
        entity.last_timestamp(),
        entity.owner(),
        entity.ancestor().unwrap_or(""),
        body
    ])?;
    Ok(if changed > 0 {
        Written::Inserted
    } else {
        Written::Unchanged
    })
}

fn read_bodies(
    db: &Connection,
    kind: EntityKind,
    sql: &str,
    params: impl rusqlite::Params,
    out: &mut Response,
) -> Result<()> {
    let mut stmt = db.prepare_cached(sql)?;
    let bodies = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for body in bodies {
        let entity = Entity::from_json(kind, &body)
            .with_context(|| format!("decoding stored {}", kind))?;
        out.body.push(entity);
    }
    Ok(())
}

impl Store for SqliteStore {
    fn read_addresses(&self, filter: &AddressFilter) -> Result<Vec<Address>> {
        let db = self.conn()?;
        let order = match filter.order {
            AddressOrder::Freshest => "last_successful_ping DESC, last_online DESC",
            AddressOrder::Stalest => "last_successful_ping ASC, last_online ASC",
        };
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {} FROM addresses WHERE (?1 IS NULL OR address_type = ?1) ORDER BY {} LIMIT ?2",
            ADDRESS_COLUMNS, order
        ))?;
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let addresses = stmt
            .query_map(params![filter.address_type, limit], address_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(addresses)
    }

    fn insert_or_update_addresses(&self, addresses: &[Address]) -> Result<()> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO addresses (location, sublocation, port, location_type, address_type,
                    last_online, protocol, client, last_successful_ping, last_successful_sync, seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(location, sublocation, port) DO UPDATE SET
                    location_type = excluded.location_type,
                    address_type = excluded.address_type,
                    last_online = MAX(addresses.last_online, excluded.last_online),
                    protocol = excluded.protocol,
                    client = excluded.client,
                    last_successful_ping = MAX(addresses.last_successful_ping, excluded.last_successful_ping),
                    last_successful_sync = MAX(addresses.last_successful_sync, excluded.last_successful_sync),
                    seen_at = excluded.seen_at",
            )?;
            let seen = now();
            for a in addresses {
                stmt.execute(params![
                    a.location,
                    a.sublocation,
                    a.port,
                    a.location_type,
                    a.address_type,
                    a.last_online,
                    serde_json::to_string(&a.protocol)?,
                    serde_json::to_string(&a.client)?,
                    a.last_successful_ping,
                    a.last_successful_sync,
                    seen
                ])?;
            }
        }
        self.trim_addresses(&tx)?;
        tx.commit().context("committing addresses")?;
        Ok(())
    }

    fn record_inbound_address(&self, address: &Address) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO addresses (location, sublocation, port, location_type, last_successful_ping, seen_at)
             VALUES (?1, '', ?2, ?3, ?4, ?5)
             ON CONFLICT(location, sublocation, port) DO UPDATE SET
                last_successful_ping = MAX(addresses.last_successful_ping, excluded.last_successful_ping),
                seen_at = excluded.seen_at",
            params![
                address.location,
                address.port,
                address.location_type,
                address.last_successful_ping,
                now()
            ],
        )?;
        self.trim_addresses(&db)?;
        Ok(())
    }

    fn read_node(&self, node_id: &str) -> Result<Option<Node>> {
        let db = self.conn()?;
        let mut stmt = db.prepare_cached("SELECT checkpoints FROM nodes WHERE node_id = ?1")?;
        let result = stmt.query_row([node_id], |row| row.get::<_, String>(0));

        match result {
            Ok(data) => {
                let checkpoints = serde_json::from_str(&data)
                    .with_context(|| format!("decoding checkpoints for node {}", node_id))?;
                Ok(Some(Node {
                    node_id: node_id.to_string(),
                    checkpoints,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn insert_node(&self, node: &Node) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO nodes (node_id, checkpoints) VALUES (?1, ?2)
             ON CONFLICT(node_id) DO UPDATE SET checkpoints = ?2",
            params![node.node_id, serde_json::to_string(&node.checkpoints)?],
        )?;
        debug!(node_id = %node.node_id, "Saved node checkpoints");
        Ok(())
    }

    fn batch_insert(&self, entities: &[Entity], addresses: &[Address]) -> Result<InsertMetrics> {
        let mut metrics = InsertMetrics::default();
        let mut db = self.conn()?;
        let tx = db.transaction()?;

        for entity in entities {
            match write_entity(&tx, entity)
                .with_context(|| format!("writing {} {}", entity.kind(), entity.fingerprint()))?
            {
                Written::Inserted => *metrics.inserted.entry(entity.kind()).or_default() += 1,
                Written::Updated => *metrics.updated.entry(entity.kind()).or_default() += 1,
                Written::Unchanged => metrics.unchanged += 1,
            }
            touch_referenced(&tx, entity)?;
        }

        if !addresses.is_empty() {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO addresses (location, sublocation, port, location_type,
                    address_type, last_online, protocol, client, seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            let seen = now();
            for a in addresses {
                metrics.addresses_added += stmt.execute(params![
                    a.location,
                    a.sublocation,
                    a.port,
                    a.location_type,
                    a.address_type,
                    a.last_online,
                    serde_json::to_string(&a.protocol)?,
                    serde_json::to_string(&a.client)?,
                    seen
                ])?;
            }
            drop(stmt);
            self.trim_addresses(&tx)?;
        }

        tx.commit().context("committing batch")?;
        debug!(
            written = metrics.total_written(),
            unchanged = metrics.unchanged,
            addresses = metrics.addresses_added,
            "Batch insert"
        );
        Ok(metrics)
    }

    fn read(&self, query: &ReadQuery) -> Result<Response> {
        let db = self.conn()?;
        let table = query.kind.plural();
        let mut out = Response::default();

        let window = "MAX(creation, last_update) >= ?1 AND (?2 = 0 OR MAX(creation, last_update) < ?2)";
        if query.fingerprints.is_empty() {
            let sql = format!(
                "SELECT body FROM {} WHERE {} ORDER BY creation ASC",
                table, window
            );
            read_bodies(&db, query.kind, &sql, params![query.start, query.end], &mut out)?;
        } else {
            let sql = format!(
                "SELECT body FROM {} WHERE fingerprint = ?3 AND {}",
                table, window
            );
            for fp in &query.fingerprints {
                read_bodies(&db, query.kind, &sql, params![query.start, query.end, fp], &mut out)?;
            }
        }

        if !query.embeds.is_empty() {
            let parents: Vec<String> = out
                .body
                .entities()
                .iter()
                .map(|e| e.fingerprint().to_string())
                .collect();
            for kind in &query.embeds {
                let sql = format!("SELECT body FROM {} WHERE ancestor = ?1", kind.plural());
                for parent in &parents {
                    read_bodies(&db, *kind, &sql, params![parent], &mut out)?;
                }
            }
        }
        Ok(out)
    }

    fn read_keys(&self, fingerprint: &str) -> Result<Vec<Key>> {
        let db = self.conn()?;
        let mut stmt = db.prepare_cached("SELECT body FROM keys WHERE fingerprint = ?1")?;
        let bodies = stmt
            .query_map([fingerprint], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        bodies
            .iter()
            .map(|b| serde_json::from_str(b).context("decoding stored key"))
            .collect()
    }

    fn contains(&self, fingerprint: &str) -> Result<bool> {
        let db = self.conn()?;
        for kind in EntityKind::ALL {
            let mut stmt = db.prepare_cached(&format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE fingerprint = ?1)",
                kind.plural()
            ))?;
            let found: bool = stmt.query_row([fingerprint], |row| row.get(0))?;
            if found {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn prune(&self, kind: EntityKind, cutoff: Timestamp) -> Result<usize> {
        let db = self.conn()?;
        let removed = db
            .execute(
                &format!("DELETE FROM {} WHERE last_referenced < ?1", kind.plural()),
                [cutoff],
            )
            .with_context(|| format!("pruning {}", kind))?;
        Ok(removed)
    }

    fn size_bytes(&self) -> Result<u64> {
        let db = self.conn()?;
        let pragma = |name: &str| -> Result<i64> {
            Ok(db.query_row(&format!("PRAGMA {}", name), [], |row| row.get(0))?)
        };
        let used = pragma("page_count")? - pragma("freelist_count")?;
        Ok((used.max(0) * pragma("page_size")?) as u64)
    }
}
