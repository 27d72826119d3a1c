use {
    std::{collections::HashMap, fs, path::Path, sync::{Arc, Mutex}},
    thiserror::Error,
    rusqlite::Connection,
};

pub const DEFAULT_KEY_COLUMN: &str = "pk";
pub const DEFAULT_COUNT_COLUMN: &str = "visitCount";

pub trait CounterStorage {
    /// Atomically create-if-absent and add one to the record under `key`.
    /// The post-increment value is returned by the same operation; callers
    /// must never read it back with a separate query.
    fn increment(&self, key: &str) -> Result<u64, StorageError>;

    /// Read the current value without mutating the record.
    fn current(&self, key: &str) -> Result<Option<u64>, StorageError>;
}

#[derive(Error, Debug)]
pub enum StorageError {
    /// Storage operation failed because of internal error in storage implementation.
    #[error("internal storage error: {description}")]
    InternalError {
        description: String,
    },

    /// The record under this key does not hold a non-negative integer count.
    #[error("malformed counter record: {description}")]
    MalformedRecord {
        description: String,
    },
}

/// Table and column names used by the sqlite backend. These come from
/// deployment configuration and are spliced into sql as identifiers, so they
/// are validated on construction.
#[derive(Debug, Clone)]
pub struct SqliteSchema {
    pub table: String,
    pub key_column: String,
    pub count_column: String,
}

impl SqliteSchema {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key_column: DEFAULT_KEY_COLUMN.to_owned(),
            count_column: DEFAULT_COUNT_COLUMN.to_owned(),
        }
    }

    pub fn with_key_column(mut self, key_column: impl Into<String>) -> Self {
        self.key_column = key_column.into();
        self
    }

    pub fn with_count_column(mut self, count_column: impl Into<String>) -> Self {
        self.count_column = count_column.into();
        self
    }
}

pub(crate) fn valid_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && !identifier.starts_with(|c: char| c.is_ascii_digit())
        && identifier.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Clone, Debug)]
pub struct SqliteStorage {
    connection: Arc<Mutex<Connection>>,
    sql_increment: String,
    sql_current: String,
}

#[derive(Error, Debug)]
pub enum SqliteStorageConnectionError {
    #[error("failed to create directory for sqlite database: {0:?}")]
    FailedToCreateDirectory(std::io::Error),

    #[error("failed to open connection: {0:?}")]
    ConnectionOpenError(rusqlite::Error),

    #[error("failed to init database: {0:?}")]
    DatabaseInitError(rusqlite::Error),

    #[error("invalid sql identifier: {identifier:?}")]
    InvalidIdentifier {
        identifier: String,
    },
}

impl SqliteStorage {
    pub fn new(path: impl AsRef<Path>, schema: SqliteSchema) -> Result<Self, SqliteStorageConnectionError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(SqliteStorageConnectionError::FailedToCreateDirectory)?;
            }
        }
        Self::from_connection(
            Connection::open(path)
                .map_err(SqliteStorageConnectionError::ConnectionOpenError)?,
            schema
        )
    }

    pub fn in_memory(schema: SqliteSchema) -> Result<Self, SqliteStorageConnectionError> {
        Self::from_connection(
            Connection::open_in_memory()
                .map_err(SqliteStorageConnectionError::ConnectionOpenError)?,
            schema
        )
    }

    fn from_connection(connection: Connection, schema: SqliteSchema) -> Result<Self, SqliteStorageConnectionError> {
        for identifier in [&schema.table, &schema.key_column, &schema.count_column] {
            if !valid_identifier(identifier) {
                return Err(SqliteStorageConnectionError::InvalidIdentifier { identifier: identifier.clone() });
            }
        }

        connection.execute(
            &format!(
                "create table if not exists \"{}\" (\"{}\" text primary key, \"{}\" integer not null)",
                schema.table, schema.key_column, schema.count_column
            ),
            ()
        ).map_err(SqliteStorageConnectionError::DatabaseInitError)?;

        // single upsert statement: two concurrent invocations can never both
        // observe the same pre-increment value.
        let sql_increment = format!(
            "insert into \"{table}\" (\"{key}\", \"{count}\") values (?1, 1) on conflict (\"{key}\") do update set \"{count}\" = \"{count}\" + 1 returning \"{count}\"",
            table = schema.table, key = schema.key_column, count = schema.count_column
        );
        let sql_current = format!(
            "select \"{}\" from \"{}\" where \"{}\" = ?1",
            schema.count_column, schema.table, schema.key_column
        );

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            sql_increment,
            sql_current,
        })
    }

    fn decode_count(value: i64) -> Result<u64, StorageError> {
        u64::try_from(value)
            .map_err(|_| StorageError::MalformedRecord { description: format!("expected non-negative count, got: {value}") })
    }
}

impl CounterStorage for SqliteStorage {
    fn increment(&self, key: &str) -> Result<u64, StorageError> {
        let connection = self.connection.lock()
            .map_err(|err| StorageError::InternalError { description: format!("failed to acquire sqlite connection: {err:?}") })?;
        let mut stmt = connection.prepare(&self.sql_increment)
            .map_err(|err| StorageError::InternalError { description: format!("failed to prepare sqlite query: {err:?}") })?;
        let mut rows = stmt.query([key])
            .map_err(|err| StorageError::InternalError { description: format!("failed to execute sqlite query: {err:?}") })?;

        let row = rows.next()
            .map_err(|err| StorageError::InternalError { description: format!("failed to read row from sqlite result: {err:?}") })?;
        match row {
            Some(row) => Self::decode_count(
                row.get(0)
                    .map_err(|err| StorageError::MalformedRecord { description: format!("failed to decode count: {err:?}") })?
            ),
            None => Err(StorageError::InternalError { description: "upsert returned no row".to_owned() }),
        }
    }

    fn current(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let connection = self.connection.lock()
            .map_err(|err| StorageError::InternalError { description: format!("failed to acquire sqlite connection: {err:?}") })?;
        let mut stmt = connection.prepare(&self.sql_current)
            .map_err(|err| StorageError::InternalError { description: format!("failed to prepare sqlite query: {err:?}") })?;
        let mut rows = stmt.query([key])
            .map_err(|err| StorageError::InternalError { description: format!("failed to execute sqlite query: {err:?}") })?;

        let row = rows.next()
            .map_err(|err| StorageError::InternalError { description: format!("failed to read row from sqlite result: {err:?}") })?;
        match row {
            Some(row) => Self::decode_count(
                row.get(0)
                    .map_err(|err| StorageError::MalformedRecord { description: format!("failed to decode count: {err:?}") })?
            ).map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    records: Arc<Mutex<HashMap<String, u64>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStorage for MemoryStorage {
    fn increment(&self, key: &str) -> Result<u64, StorageError> {
        let mut records = self.records.lock()
            .map_err(|err| StorageError::InternalError { description: format!("failed to lock records: {err:?}") })?;
        let value = records.entry(key.to_owned()).and_modify(|v| *v += 1).or_insert(1);
        Ok(*value)
    }

    fn current(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let records = self.records.lock()
            .map_err(|err| StorageError::InternalError { description: format!("failed to lock records: {err:?}") })?;
        Ok(records.get(key).copied())
    }
}

#[derive(Clone)]
pub struct BoxedStorage {
    inner: Arc<Box<dyn CounterStorage + Send + Sync>>,
}

impl BoxedStorage {
    pub fn new<T: CounterStorage + Send + Sync + 'static>(inner: T) -> Self {
        Self {
            inner: Arc::new(Box::new(inner)),
        }
    }
}

impl CounterStorage for BoxedStorage {
    fn increment(&self, key: &str) -> Result<u64, StorageError> {
        self.inner.increment(key)
    }

    fn current(&self, key: &str) -> Result<Option<u64>, StorageError> {
        self.inner.current(key)
    }
}
