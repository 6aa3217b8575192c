//! Append-only violation event store.
//!
//! Append is the only mutation. Rows are never rewritten or reordered, and
//! reads return rows in append order. A single writer is assumed; readers
//! tolerate observing a prefix of a log that is still being written.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags};

use crate::config::{StoreBackend, StoreSettings};
use crate::error::StoreError;
use crate::event::{parse_timestamp, ViolationEvent};

/// CSV header, written once when the file is created.
pub const CSV_HEADER: &str = "timestamp,violation";

pub trait EventStore: Send {
    /// Durably append one event.
    fn append(&mut self, ev: &ViolationEvent) -> Result<(), StoreError>;

    /// Read every event in append order. A store that does not exist yet
    /// reads as empty.
    fn read_all(&mut self) -> Result<StoredEvents, StoreError>;

    /// Human-readable location, for logs and error messages.
    fn describe(&self) -> String;
}

/// Rows read back from a store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoredEvents {
    pub events: Vec<ViolationEvent>,
    /// Rows that could not be parsed and were left out of `events`.
    pub skipped_rows: usize,
}

/// Open the store selected by configuration. Nothing is created on disk
/// until the first append.
pub fn open_store(settings: &StoreSettings) -> Box<dyn EventStore> {
    match settings.backend {
        StoreBackend::Csv => Box::new(CsvEventStore::new(&settings.path).with_sync(settings.sync)),
        StoreBackend::Sqlite => Box::new(SqliteEventStore::new(&settings.path)),
    }
}

// ----------------------------------------------------------------------------
// CSV file store
// ----------------------------------------------------------------------------

/// Two-column CSV log (`timestamp,violation`), appendable without rewriting.
pub struct CsvEventStore {
    path: PathBuf,
    file: Option<File>,
    sync: bool,
}

impl CsvEventStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            sync: false,
        }
    }

    /// fsync after every append.
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut File, StoreError> {
        if self.file.is_none() {
            self.file = Some(open_for_append(&self.path)?);
        }
        self.file
            .as_mut()
            .ok_or_else(|| StoreError::io(&self.path, std::io::ErrorKind::NotFound.into()))
    }
}

fn open_for_append(path: &Path) -> Result<File, StoreError> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    let len = file.metadata().map_err(|e| StoreError::io(path, e))?.len();

    if len == 0 {
        writeln!(file, "{CSV_HEADER}").map_err(|e| StoreError::io(path, e))?;
        log::info!("created violation log {}", path.display());
        return Ok(file);
    }

    // A crash mid-row leaves no trailing newline; terminate it so the next
    // row starts on its own line.
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|e| StoreError::io(path, e))?;
    if last[0] != b'\n' {
        log::warn!("violation log {} ends mid-row; terminating it", path.display());
        file.write_all(b"\n").map_err(|e| StoreError::io(path, e))?;
    }
    Ok(file)
}

impl EventStore for CsvEventStore {
    fn append(&mut self, ev: &ViolationEvent) -> Result<(), StoreError> {
        let row = format!("{},{}\n", ev.formatted_timestamp(), quote_field(&ev.label));
        let sync = self.sync;
        let path = self.path.clone();
        let result = self.writer().and_then(|file| {
            file.write_all(row.as_bytes())
                .and_then(|_| if sync { file.sync_data() } else { Ok(()) })
                .map_err(|e| StoreError::io(&path, e))
        });
        if result.is_err() {
            // Reopen on the next append in case the file was moved or the
            // disk recovered.
            self.file = None;
        }
        result
    }

    fn read_all(&mut self) -> Result<StoredEvents, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoredEvents::default())
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let mut out = StoredEvents::default();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| StoreError::io(&self.path, e))?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || (index == 0 && line == CSV_HEADER) {
                continue;
            }
            match parse_row(line) {
                Ok(ev) => out.events.push(ev),
                Err(reason) => {
                    let err = StoreError::Malformed {
                        path: self.path.clone(),
                        line: index + 1,
                        reason,
                    };
                    log::warn!("skipping row: {}", err);
                    out.skipped_rows += 1;
                }
            }
        }
        Ok(out)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn quote_field(value: &str) -> String {
    if value.contains([',', '"']) || value.starts_with(' ') || value.ends_with(' ') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn unquote_field(raw: &str) -> Result<String, String> {
    let Some(inner) = raw.strip_prefix('"') else {
        return Ok(raw.to_string());
    };
    let inner = inner
        .strip_suffix('"')
        .ok_or_else(|| "unterminated quoted label".to_string())?;
    if inner.replace("\"\"", "").contains('"') {
        return Err("stray quote in label".to_string());
    }
    Ok(inner.replace("\"\"", "\""))
}

fn parse_row(line: &str) -> Result<ViolationEvent, String> {
    let (raw_ts, raw_label) = line
        .split_once(',')
        .ok_or_else(|| "expected two columns".to_string())?;
    let timestamp = parse_timestamp(raw_ts).map_err(|e| format!("bad timestamp: {e}"))?;
    let label = unquote_field(raw_label)?;
    if label.trim().is_empty() {
        return Err("empty label".to_string());
    }
    Ok(ViolationEvent { timestamp, label })
}

// ----------------------------------------------------------------------------
// SQLite store
// ----------------------------------------------------------------------------

/// Same two columns in a SQLite table; the rowid keeps append order.
pub struct SqliteEventStore {
    db_path: String,
    conn: Option<Connection>,
}

impl SqliteEventStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_string_lossy().to_string(),
            conn: None,
        }
    }

    fn writer(&mut self) -> Result<&Connection, StoreError> {
        if self.conn.is_none() {
            let conn = Connection::open(&self.db_path)?;
            ensure_schema(&conn)?;
            self.conn = Some(conn);
        }
        self.conn
            .as_ref()
            .ok_or_else(|| StoreError::io(&self.db_path, std::io::ErrorKind::NotFound.into()))
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;

        CREATE TABLE IF NOT EXISTS violations (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          timestamp TEXT NOT NULL,
          violation TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn read_rows(conn: &Connection, path: &str) -> Result<StoredEvents, StoreError> {
    let mut stmt = conn.prepare("SELECT id, timestamp, violation FROM violations ORDER BY id ASC")?;
    let mut rows = stmt.query([])?;
    let mut out = StoredEvents::default();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let raw_ts: String = row.get(1)?;
        let label: String = row.get(2)?;
        match parse_timestamp(&raw_ts) {
            Ok(timestamp) => out.events.push(ViolationEvent { timestamp, label }),
            Err(e) => {
                log::warn!("skipping row {} in {}: bad timestamp: {}", id, path, e);
                out.skipped_rows += 1;
            }
        }
    }
    Ok(out)
}

impl EventStore for SqliteEventStore {
    fn append(&mut self, ev: &ViolationEvent) -> Result<(), StoreError> {
        let timestamp = ev.formatted_timestamp();
        let result = self.writer().and_then(|conn| {
            conn.execute(
                "INSERT INTO violations(timestamp, violation) VALUES (?1, ?2)",
                params![timestamp, ev.label],
            )?;
            Ok(())
        });
        if result.is_err() {
            self.conn = None;
        }
        result
    }

    fn read_all(&mut self) -> Result<StoredEvents, StoreError> {
        if let Some(conn) = &self.conn {
            return read_rows(conn, &self.db_path);
        }
        if !Path::new(&self.db_path).exists() {
            return Ok(StoredEvents::default());
        }
        let conn = Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let has_table: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'violations')",
            [],
            |row| row.get(0),
        )?;
        if !has_table {
            return Ok(StoredEvents::default());
        }
        read_rows(&conn, &self.db_path)
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.db_path)
    }
}

// ----------------------------------------------------------------------------
// In-memory store
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct InMemoryEventStore {
    events: Vec<ViolationEvent>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ViolationEvent] {
        &self.events
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&mut self, ev: &ViolationEvent) -> Result<(), StoreError> {
        self.events.push(ev.clone());
        Ok(())
    }

    fn read_all(&mut self) -> Result<StoredEvents, StoreError> {
        Ok(StoredEvents {
            events: self.events.clone(),
            skipped_rows: 0,
        })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
