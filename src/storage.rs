//! Telemetry store: where a vehicle's raw ping rows come from.
//!
//! The engine only consumes rows; stores own paging, persistence and fetch
//! failures. Rows are kept as raw JSON so schema drift between device
//! generations is resolved by the normalizer, not at write time.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;

use crate::ingest::RawRecord;
use crate::vehicle::{normalize_vin, Vehicle};

pub const DEFAULT_PAGE_SIZE: usize = 500;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PingPage {
    pub rows: Vec<RawRecord>,
    /// Offset of the following page; `None` once the store is exhausted.
    pub next_offset: Option<usize>,
}

pub trait PingStore {
    fn vehicle(&mut self, vin: &str) -> Result<Option<Vehicle>>;

    fn list_vins(&mut self) -> Result<Vec<String>>;

    fn upsert_vehicle(&mut self, vehicle: &Vehicle) -> Result<()>;

    /// Append rows for `vin`, returning how many were stored.
    fn insert_pings(&mut self, vin: &str, rows: &[RawRecord]) -> Result<usize>;

    /// Rows for `vin` in insertion order, starting at `offset`.
    fn fetch_page(&mut self, vin: &str, offset: usize, limit: usize) -> Result<PingPage>;

    /// Every row for `vin`, fetched page by page.
    fn fetch_all(&mut self, vin: &str, page_size: usize) -> Result<Vec<RawRecord>> {
        if page_size == 0 {
            return Err(anyhow!("page size must be greater than zero"));
        }
        let mut rows = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.fetch_page(vin, offset, page_size)?;
            rows.extend(page.rows);
            match page.next_offset {
                Some(next) if next > offset => offset = next,
                _ => break,
            }
        }
        Ok(rows)
    }
}

fn next_offset(offset: usize, fetched: usize, limit: usize) -> Option<usize> {
    (fetched == limit && fetched > 0).then_some(offset + fetched)
}

// -------------------- SQLite --------------------

pub struct SqlitePingStore {
    conn: Connection,
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

impl SqlitePingStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)
            .map_err(|e| anyhow!("failed to open ping store {}: {}", db_path, e))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS vehicles (
              vin TEXT PRIMARY KEY,
              configured_winner_serial TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS pings (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              vin TEXT NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pings_vin ON pings(vin, id);
            "#,
        )?;
        Ok(())
    }
}

impl PingStore for SqlitePingStore {
    fn vehicle(&mut self, vin: &str) -> Result<Option<Vehicle>> {
        let vin = normalize_vin(vin)?;
        let configured: Option<String> = self
            .conn
            .query_row(
                "SELECT configured_winner_serial FROM vehicles WHERE vin = ?1",
                params![vin],
                |row| row.get(0),
            )
            .optional()?;
        configured
            .map(|serial| Vehicle::new(&vin, &serial))
            .transpose()
    }

    fn list_vins(&mut self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT vin FROM vehicles UNION SELECT DISTINCT vin FROM pings ORDER BY 1",
        )?;
        let mut rows = stmt.query([])?;
        let mut vins = Vec::new();
        while let Some(row) = rows.next()? {
            vins.push(row.get(0)?);
        }
        Ok(vins)
    }

    fn upsert_vehicle(&mut self, vehicle: &Vehicle) -> Result<()> {
        let vin = normalize_vin(&vehicle.vin)?;
        self.conn.execute(
            r#"
            INSERT INTO vehicles(vin, configured_winner_serial) VALUES (?1, ?2)
            ON CONFLICT(vin) DO UPDATE SET configured_winner_serial = excluded.configured_winner_serial
            "#,
            params![vin, vehicle.configured_winner_serial],
        )?;
        Ok(())
    }

    fn insert_pings(&mut self, vin: &str, rows: &[RawRecord]) -> Result<usize> {
        let vin = normalize_vin(vin)?;
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT INTO pings(vin, payload_json) VALUES (?1, ?2)")?;
            for row in rows {
                stmt.execute(params![vin, serde_json::to_string(row)?])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    fn fetch_page(&mut self, vin: &str, offset: usize, limit: usize) -> Result<PingPage> {
        let vin = normalize_vin(vin)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, payload_json FROM pings WHERE vin = ?1 ORDER BY id ASC LIMIT ?2 OFFSET ?3",
        )?;
        let mut rows = stmt.query(params![vin, limit as i64, offset as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let payload: String = row.get(1)?;
            // A corrupt payload still occupies its slot; the normalizer turns
            // it into an all-unknown record.
            let value = serde_json::from_str(&payload).unwrap_or_else(|e| {
                log::warn!("ping {} for {} has unparsable payload: {}", id, vin, e);
                Value::Null
            });
            out.push(value);
        }
        let fetched = out.len();
        Ok(PingPage {
            rows: out,
            next_offset: next_offset(offset, fetched, limit),
        })
    }
}

// -------------------- In memory --------------------

#[derive(Clone, Debug, Default)]
pub struct InMemoryPingStore {
    vehicles: BTreeMap<String, Vehicle>,
    pings: BTreeMap<String, Vec<RawRecord>>,
}

impl InMemoryPingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PingStore for InMemoryPingStore {
    fn vehicle(&mut self, vin: &str) -> Result<Option<Vehicle>> {
        let vin = normalize_vin(vin)?;
        Ok(self.vehicles.get(&vin).cloned())
    }

    fn list_vins(&mut self) -> Result<Vec<String>> {
        let mut vins: Vec<String> = self
            .vehicles
            .keys()
            .chain(self.pings.keys())
            .cloned()
            .collect();
        vins.sort();
        vins.dedup();
        Ok(vins)
    }

    fn upsert_vehicle(&mut self, vehicle: &Vehicle) -> Result<()> {
        let vehicle = Vehicle::new(&vehicle.vin, &vehicle.configured_winner_serial)?;
        self.vehicles.insert(vehicle.vin.clone(), vehicle);
        Ok(())
    }

    fn insert_pings(&mut self, vin: &str, rows: &[RawRecord]) -> Result<usize> {
        let vin = normalize_vin(vin)?;
        self.pings.entry(vin).or_default().extend_from_slice(rows);
        Ok(rows.len())
    }

    fn fetch_page(&mut self, vin: &str, offset: usize, limit: usize) -> Result<PingPage> {
        let vin = normalize_vin(vin)?;
        let rows: Vec<RawRecord> = self
            .pings
            .get(&vin)
            .map(|rows| rows.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default();
        let fetched = rows.len();
        Ok(PingPage {
            rows,
            next_offset: next_offset(offset, fetched, limit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(n: usize) -> Vec<RawRecord> {
        (0..n)
            .map(|i| json!({ "id": i, "serial": "012345", "time": i * 1000 }))
            .collect()
    }

    #[test]
    fn in_memory_pages_until_short_page() -> Result<()> {
        let mut store = InMemoryPingStore::new();
        store.insert_pings("unit-1", &rows(7))?;

        let page = store.fetch_page("UNIT-1", 0, 3)?;
        assert_eq!(page.rows.len(), 3);
        assert_eq!(page.next_offset, Some(3));

        let page = store.fetch_page("unit-1", 6, 3)?;
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.next_offset, None);

        let all = store.fetch_all("unit-1", 3)?;
        assert_eq!(all, rows(7));
        Ok(())
    }

    #[test]
    fn exact_multiple_of_page_size_terminates() -> Result<()> {
        let mut store = InMemoryPingStore::new();
        store.insert_pings("unit-1", &rows(6))?;
        assert_eq!(store.fetch_all("unit-1", 3)?.len(), 6);
        assert!(store.fetch_all("unit-1", 0).is_err());
        Ok(())
    }

    #[test]
    fn unknown_vehicle_has_no_rows() -> Result<()> {
        let mut store = InMemoryPingStore::new();
        assert!(store.vehicle("unit-9")?.is_none());
        assert!(store.fetch_all("unit-9", 10)?.is_empty());
        Ok(())
    }

    #[test]
    fn sqlite_round_trips_vehicles_and_pings() -> Result<()> {
        let mut store = SqlitePingStore::open(":memory:")?;
        store.upsert_vehicle(&Vehicle::new("unit-1", "012345")?)?;
        store.upsert_vehicle(&Vehicle::new("unit-1", "812345")?)?;
        store.insert_pings("unit-2", &rows(5))?;

        let vehicle = store.vehicle("unit-1")?.expect("vehicle");
        assert_eq!(vehicle.configured_winner_serial, "812345");
        assert_eq!(store.list_vins()?, vec!["UNIT-1", "UNIT-2"]);
        assert_eq!(store.fetch_all("unit-2", 2)?, rows(5));
        Ok(())
    }

    #[test]
    fn corrupt_payload_keeps_its_slot() -> Result<()> {
        let mut store = SqlitePingStore::open(":memory:")?;
        store.insert_pings("unit-1", &rows(1))?;
        store.conn.execute(
            "INSERT INTO pings(vin, payload_json) VALUES ('UNIT-1', '{not json')",
            [],
        )?;
        let all = store.fetch_all("unit-1", 10)?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[1], Value::Null);
        Ok(())
    }
}
