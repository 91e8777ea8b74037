//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params};
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::{debug, info};

use openair_types::Reading;

use crate::error::{Error, Result};
use crate::models::{MaintenanceReport, StoredReading, UpsertOutcome};
use crate::schema::{self, BUCKET_EXPR};

const COLUMNS: &str = "rowid, timestamp, city, aqi, pm25, pm10, o3, no2, so2, co, \
                       temperature, pressure, humidity, wind";
const RANKED_COLUMNS: &str = "id, timestamp, city, aqi, pm25, pm10, o3, no2, so2, co, \
                              temperature, pressure, humidity, wind";

/// SQLite-based store holding at most one reading per local hour.
///
/// Timestamps are written as fixed-width local times
/// (`YYYY-MM-DDTHH:MM:SS.ffffff`) in the store's UTC offset, so text order
/// is time order and SQLite's `strftime` sees local hours.
pub struct Store {
    conn: Connection,
    offset: UtcOffset,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self {
            conn,
            offset: local_offset(),
        })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn,
            offset: local_offset(),
        })
    }

    /// Use `offset` as the store's local time.
    ///
    /// Hour buckets are calendar hours in this offset. The offset is fixed
    /// for the life of the store and is not re-read when daylight saving
    /// time starts or ends, so a process that runs across a DST change keeps
    /// bucketing by the old offset until it is restarted.
    ///
    /// Stored timestamps carry no offset. Reopening a database with a
    /// different offset (for example after a DST change) reads every
    /// existing row back shifted by the difference.
    pub fn with_offset(mut self, offset: UtcOffset) -> Self {
        self.offset = offset;
        self
    }

    /// The store's local UTC offset.
    pub fn offset(&self) -> UtcOffset {
        self.offset
    }
}

// Writes
impl Store {
    /// Store `reading` as the row for its hour.
    ///
    /// If the hour already has a row, every field of that row (the timestamp
    /// included) is overwritten with the new values. When an hour holds
    /// several rows, the one with the lowest rowid is the one updated, which
    /// is also the one [`dedupe_hourly`](Self::dedupe_hourly) keeps.
    ///
    /// Runs in one transaction; on error nothing is written and
    /// [`Error::WriteFailed`] is returned.
    pub fn upsert(&self, reading: &Reading) -> Result<UpsertOutcome> {
        const OPERATION: &str = "upsert reading";

        let timestamp = encode_timestamp(reading.timestamp, self.offset)?;
        let bucket = reading.hour_bucket(self.offset);
        let row = StoredReading::from_reading(reading);

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(Error::write(OPERATION))?;
        let outcome = upsert_in(&tx, &timestamp, &bucket, &row).map_err(Error::write(OPERATION))?;
        tx.commit().map_err(Error::write(OPERATION))?;

        debug!(
            "{} hour {} for {} (AQI {})",
            match outcome {
                UpsertOutcome::Inserted => "Inserted",
                UpsertOutcome::Replaced => "Replaced",
            },
            bucket,
            row.city,
            row.aqi
        );
        Ok(outcome)
    }

    /// Delete every row older than `older_than` before now.
    pub fn prune(&self, older_than: Duration) -> Result<usize> {
        self.prune_at(OffsetDateTime::now_utc(), older_than)
    }

    /// Delete every row whose timestamp is strictly before `now - older_than`.
    ///
    /// Returns the number of rows deleted.
    pub fn prune_at(&self, now: OffsetDateTime, older_than: Duration) -> Result<usize> {
        let cutoff = self.cutoff(now, older_than)?;
        let deleted = prune_in(&self.conn, &cutoff).map_err(Error::write("prune readings"))?;
        debug!("Pruned {} row(s) older than {}", deleted, cutoff);
        Ok(deleted)
    }

    /// Collapse hours holding more than one row down to a single row.
    ///
    /// The survivor is the row with the lowest rowid (the first one
    /// physically inserted), not the one with the latest timestamp.
    /// [`upsert`](Self::upsert) writes into that same row, so in practice the
    /// survivor also carries the newest values.
    ///
    /// Returns the number of rows deleted.
    pub fn dedupe_hourly(&self) -> Result<usize> {
        let deleted = dedupe_in(&self.conn).map_err(Error::write("deduplicate hours"))?;
        if deleted > 0 {
            info!("Removed {} duplicate hourly row(s)", deleted);
        }
        Ok(deleted)
    }

    /// Run one maintenance pass: prune, then dedupe.
    pub fn maintain(&self, retention: Duration) -> Result<MaintenanceReport> {
        self.maintain_at(OffsetDateTime::now_utc(), retention)
    }

    /// [`maintain`](Self::maintain) as seen from `now`.
    ///
    /// Both steps share one transaction.
    pub fn maintain_at(&self, now: OffsetDateTime, retention: Duration) -> Result<MaintenanceReport> {
        const OPERATION: &str = "run maintenance";

        let cutoff = self.cutoff(now, retention)?;
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(Error::write(OPERATION))?;
        let pruned = prune_in(&tx, &cutoff).map_err(Error::write(OPERATION))?;
        let deduplicated = dedupe_in(&tx).map_err(Error::write(OPERATION))?;
        tx.commit().map_err(Error::write(OPERATION))?;

        let report = MaintenanceReport {
            pruned,
            deduplicated,
        };
        if report.total() > 0 {
            info!(
                "Maintenance removed {} expired and {} duplicate row(s)",
                report.pruned, report.deduplicated
            );
        } else {
            debug!("Maintenance pass found nothing to remove");
        }
        Ok(report)
    }

    fn cutoff(&self, now: OffsetDateTime, window: Duration) -> Result<String> {
        let cutoff = now.checked_sub(window).ok_or_else(|| {
            Error::InvalidTimestamp(format!("{} minus {} is out of range", now, window))
        })?;
        encode_timestamp(cutoff, self.offset)
    }
}

// Reads
impl Store {
    /// Readings from the last `window`, oldest first, one per hour.
    pub fn query_recent(&self, window: Duration) -> Result<Vec<Reading>> {
        self.query_recent_at(OffsetDateTime::now_utc(), window)
    }

    /// Readings with a timestamp strictly after `now - window`, oldest first.
    ///
    /// A row exactly at the cutoff is not returned, though [`prune_at`]
    /// keeps it until it is strictly older.
    ///
    /// [`prune_at`]: Self::prune_at
    ///
    /// Each hour contributes only its most recent row, even if duplicates
    /// have not been cleaned up yet.
    pub fn query_recent_at(&self, now: OffsetDateTime, window: Duration) -> Result<Vec<Reading>> {
        let cutoff = self.cutoff(now, window)?;
        let sql = format!(
            "SELECT {RANKED_COLUMNS} FROM (
                 SELECT rowid AS id, *, ROW_NUMBER() OVER (
                     PARTITION BY {BUCKET_EXPR}
                     ORDER BY timestamp DESC, rowid DESC
                 ) AS rank_in_hour
                 FROM aqi_data
                 WHERE timestamp > ?1
             )
             WHERE rank_in_hour = 1
             ORDER BY timestamp ASC"
        );

        debug!("Querying readings since {}", cutoff);

        let offset = self.offset;
        let mut stmt = self.conn.prepare(&sql)?;
        let readings = stmt
            .query_map([&cutoff], |row| row_to_stored(row, offset))?
            .map(|row| row.map(Reading::from))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    /// Most recent row in the store.
    pub fn latest(&self) -> Result<Option<StoredReading>> {
        let offset = self.offset;
        let reading = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM aqi_data ORDER BY timestamp DESC LIMIT 1"),
                [],
                |row| row_to_stored(row, offset),
            )
            .optional()?;
        Ok(reading)
    }

    /// Every row, oldest first, duplicates included.
    pub fn all(&self) -> Result<Vec<StoredReading>> {
        let offset = self.offset;
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COLUMNS} FROM aqi_data ORDER BY timestamp ASC"))?;
        let rows = stmt
            .query_map([], |row| row_to_stored(row, offset))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Number of stored rows.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM aqi_data", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn upsert_in(
    conn: &Connection,
    timestamp: &str,
    bucket: &str,
    row: &StoredReading,
) -> rusqlite::Result<UpsertOutcome> {
    let existing: Option<i64> = conn.query_row(
        &format!("SELECT MIN(rowid) FROM aqi_data WHERE {BUCKET_EXPR} = ?1"),
        [bucket],
        |r| r.get(0),
    )?;

    match existing {
        Some(id) => {
            // A leftover duplicate may already hold this exact timestamp.
            conn.execute(
                "DELETE FROM aqi_data WHERE timestamp = ?1 AND rowid <> ?2",
                params![timestamp, id],
            )?;
            conn.execute(
                "UPDATE aqi_data SET timestamp = ?1, city = ?2, aqi = ?3, pm25 = ?4,
                 pm10 = ?5, o3 = ?6, no2 = ?7, so2 = ?8, co = ?9, temperature = ?10,
                 pressure = ?11, humidity = ?12, wind = ?13
                 WHERE rowid = ?14",
                params![
                    timestamp,
                    row.city,
                    row.aqi,
                    row.pm25,
                    row.pm10,
                    row.o3,
                    row.no2,
                    row.so2,
                    row.co,
                    row.temperature,
                    row.pressure,
                    row.humidity,
                    row.wind,
                    id,
                ],
            )?;
            Ok(UpsertOutcome::Replaced)
        }
        None => {
            conn.execute(
                "INSERT INTO aqi_data (timestamp, city, aqi, pm25, pm10, o3, no2, so2, co,
                 temperature, pressure, humidity, wind)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    timestamp,
                    row.city,
                    row.aqi,
                    row.pm25,
                    row.pm10,
                    row.o3,
                    row.no2,
                    row.so2,
                    row.co,
                    row.temperature,
                    row.pressure,
                    row.humidity,
                    row.wind,
                ],
            )?;
            Ok(UpsertOutcome::Inserted)
        }
    }
}

fn prune_in(conn: &Connection, cutoff: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM aqi_data WHERE timestamp < ?1", [cutoff])
}

fn dedupe_in(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "DELETE FROM aqi_data WHERE rowid NOT IN (
                 SELECT MIN(rowid) FROM aqi_data GROUP BY {BUCKET_EXPR}
             )"
        ),
        [],
    )
}

fn row_to_stored(row: &Row<'_>, offset: UtcOffset) -> rusqlite::Result<StoredReading> {
    let text: String = row.get(1)?;
    let timestamp = decode_timestamp(&text, offset).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(StoredReading {
        id: row.get(0)?,
        timestamp,
        city: row.get(2)?,
        aqi: row.get(3)?,
        pm25: row.get(4)?,
        pm10: row.get(5)?,
        o3: row.get(6)?,
        no2: row.get(7)?,
        so2: row.get(8)?,
        co: row.get(9)?,
        temperature: row.get(10)?,
        pressure: row.get(11)?,
        humidity: row.get(12)?,
        wind: row.get(13)?,
    })
}

/// Local offset of this machine, or UTC if it cannot be determined.
///
/// On Unix the offset is only available while the process is
/// single-threaded; callers that need local hours inside a multi-threaded
/// runtime should capture it early and pass it to [`Store::with_offset`].
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

fn encode_timestamp(timestamp: OffsetDateTime, offset: UtcOffset) -> Result<String> {
    let format = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]"
    );
    timestamp
        .to_offset(offset)
        .format(&format)
        .map_err(|e| Error::InvalidTimestamp(e.to_string()))
}

/// Parse a stored timestamp. Rows without fractional seconds are accepted.
fn decode_timestamp(
    text: &str,
    offset: UtcOffset,
) -> std::result::Result<OffsetDateTime, time::error::Parse> {
    let precise = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"
    );
    let whole = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

    PrimitiveDateTime::parse(text, &precise)
        .or_else(|_| PrimitiveDateTime::parse(text, &whole))
        .map(|local| local.assume_offset(offset))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use openair_types::RETENTION_WINDOW;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use time::macros::datetime;

    fn store() -> Store {
        Store::open_in_memory()
            .unwrap()
            .with_offset(UtcOffset::UTC)
    }

    proptest! {
        /// Any run of upserts inside one hour leaves exactly one row holding
        /// the values of the last call.
        #[test]
        fn same_hour_upserts_leave_one_row(
            writes in prop::collection::vec((0i64..3600, 0i64..500), 1..20)
        ) {
            let store = store();
            let hour = datetime!(2024-03-01 10:00 UTC);
            for (secs, aqi) in &writes {
                let reading = Reading::new(hour + Duration::seconds(*secs), "City", *aqi);
                store.upsert(&reading).unwrap();
            }

            prop_assert_eq!(store.count().unwrap(), 1);
            let (last_secs, last_aqi) = writes[writes.len() - 1];
            let row = store.latest().unwrap().unwrap();
            prop_assert_eq!(row.aqi, last_aqi);
            prop_assert_eq!(row.timestamp, hour + Duration::seconds(last_secs));
        }

        /// Even with raw duplicates present, a query never returns two rows
        /// from the same hour.
        #[test]
        fn query_never_repeats_an_hour(
            offsets in prop::collection::hash_set(0i64..(48 * 3600), 0..40)
        ) {
            let store = store();
            let base = datetime!(2024-03-01 00:00 UTC);
            for (i, secs) in offsets.iter().enumerate() {
                let ts = encode_timestamp(base + Duration::seconds(*secs), UtcOffset::UTC).unwrap();
                store
                    .conn
                    .execute(
                        "INSERT INTO aqi_data (timestamp, city, aqi) VALUES (?1, 'X', ?2)",
                        params![ts, i as i64],
                    )
                    .unwrap();
            }

            let now = base + Duration::hours(48);
            let recent = store.query_recent_at(now, RETENTION_WINDOW).unwrap();
            let buckets: HashSet<String> =
                recent.iter().map(|r| r.hour_bucket(UtcOffset::UTC)).collect();
            prop_assert_eq!(buckets.len(), recent.len());

            // And the rows come back oldest first.
            prop_assert!(recent.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

            // After a dedupe pass the table itself has one row per hour.
            store.dedupe_hourly().unwrap();
            let all = store.all().unwrap();
            let buckets: HashSet<String> = all
                .iter()
                .map(|r| openair_types::hour_bucket(r.timestamp, UtcOffset::UTC))
                .collect();
            prop_assert_eq!(buckets.len(), all.len());
        }

        /// Prune removes exactly the rows before the cutoff and is idempotent.
        #[test]
        fn prune_removes_all_and_only_expired_rows(
            hours in prop::collection::hash_set(0i64..72, 0..30)
        ) {
            let store = store();
            let now = datetime!(2024-03-04 00:00 UTC);
            for h in &hours {
                store
                    .upsert(&Reading::new(now - Duration::hours(*h) - Duration::minutes(1), "City", *h))
                    .unwrap();
            }

            let expected = hours.iter().filter(|h| **h >= 24).count();
            prop_assert_eq!(store.prune_at(now, RETENTION_WINDOW).unwrap(), expected);
            prop_assert_eq!(store.count().unwrap() as usize, hours.len() - expected);
            prop_assert_eq!(store.prune_at(now, RETENTION_WINDOW).unwrap(), 0);
        }
    }
}
