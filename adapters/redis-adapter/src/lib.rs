//! redis-adapter: Redis implementation of the LinkRepository port.
//!
//! Each link is a JSON string under `links:<key>`, written with a `PX` TTL so
//! Redis drops expired entries on its own. The connection is opened lazily
//! and reset after any command error so the next call reconnects.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use domain::{Clock, CoreError, LinkKey, LinkRecord, LinkRepository, SystemClock};
use redis::Commands;
use tracing::{debug, warn};

mod wire;

pub const KEY_PREFIX: &str = "links:";
const SCAN_COUNT: usize = 200;

pub struct RedisRepo {
    client: redis::Client,
    connection: Mutex<Option<redis::Connection>>,
    clock: Box<dyn Clock>,
}

fn map_rerr(e: redis::RedisError) -> CoreError {
    CoreError::Repository(format!("redis error: {e}"))
}

fn storage_key(key: &LinkKey) -> String {
    format!("{KEY_PREFIX}{}", key.as_str())
}

impl RedisRepo {
    /// Create a repository for `url` and check the server answers `PING`.
    pub fn connect(url: &str) -> Result<Self, CoreError> {
        let repo = Self::with_clock(url, SystemClock)?;
        let pong: String = repo.run(|conn| redis::cmd("PING").query(conn))?;
        debug!(response = %pong, "redis connection test successful");
        Ok(repo)
    }

    /// Create a repository without touching the network.
    pub fn with_clock<C: Clock + 'static>(url: &str, clock: C) -> Result<Self, CoreError> {
        let client = redis::Client::open(url).map_err(map_rerr)?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            clock: Box::new(clock),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<redis::Connection>>, CoreError> {
        self.connection
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))
    }

    /// Run `f` on the cached connection, establishing it first if needed.
    fn run<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    {
        let mut guard = self.lock()?;
        if guard.is_none() {
            *guard = Some(self.client.get_connection().map_err(map_rerr)?);
            debug!("redis connection established");
        }
        let Some(conn) = guard.as_mut() else {
            return Err(CoreError::Repository("redis connection unavailable".into()));
        };
        let result = f(conn);
        if let Err(e) = &result {
            warn!(err = %e, "redis command failed; connection reset");
            *guard = None;
        }
        result.map_err(map_rerr)
    }

    fn scan_keys(&self) -> Result<Vec<String>, CoreError> {
        let pattern = format!("{KEY_PREFIX}*");
        self.run(|conn| {
            let mut cursor: u64 = 0;
            let mut keys = Vec::new();
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query(conn)?;
                keys.extend(batch);
                if next == 0 {
                    return Ok(keys);
                }
                cursor = next;
            }
        })
    }

    fn is_live(&self, record: &LinkRecord) -> bool {
        !record.is_expired(self.clock.now())
    }
}

/// Milliseconds until `expire_date`, at least 1 so `SET PX` stays valid.
fn ttl_millis(expire_date: SystemTime, now: SystemTime) -> u64 {
    let ms = expire_date
        .duration_since(now)
        .unwrap_or(Duration::ZERO)
        .as_millis();
    u64::try_from(ms).unwrap_or(u64::MAX).max(1)
}

impl LinkRepository for RedisRepo {
    fn get(&self, key: &LinkKey) -> Result<Option<LinkRecord>, CoreError> {
        let data: Option<String> = self.run(|conn| conn.get(storage_key(key)))?;
        let Some(data) = data else {
            return Ok(None);
        };
        match wire::decode(key.clone(), &data) {
            Ok(record) => Ok(Some(record).filter(|r| self.is_live(r))),
            Err(e) => {
                warn!(key = %key, err = %e, "skipping unreadable link");
                Ok(None)
            }
        }
    }

    fn get_all(&self, keys: Option<&[LinkKey]>) -> Result<Vec<LinkRecord>, CoreError> {
        let keys: Vec<LinkKey> = match keys {
            Some(keys) => keys.to_vec(),
            None => self
                .scan_keys()?
                .iter()
                .filter_map(|k| k.strip_prefix(KEY_PREFIX))
                .filter_map(|k| LinkKey::new(k).ok())
                .collect(),
        };
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let storage_keys: Vec<String> = keys.iter().map(storage_key).collect();
        let values: Vec<Option<String>> =
            self.run(|conn| redis::cmd("MGET").arg(&storage_keys).query(conn))?;

        let mut out = Vec::with_capacity(keys.len());
        for (key, value) in keys.into_iter().zip(values) {
            let Some(data) = value else { continue };
            match wire::decode(key.clone(), &data) {
                Ok(record) if self.is_live(&record) => out.push(record),
                Ok(_) => {}
                Err(e) => warn!(key = %key, err = %e, "skipping unreadable link"),
            }
        }
        Ok(out)
    }

    fn set(&self, record: LinkRecord) -> Result<(), CoreError> {
        let ttl = ttl_millis(record.expire_date, self.clock.now());
        let data = wire::encode(&record)?;
        let key = storage_key(&record.key);
        self.run(|conn| {
            redis::cmd("SET")
                .arg(&key)
                .arg(&data)
                .arg("PX")
                .arg(ttl)
                .query::<()>(conn)
        })
    }

    fn delete(&self, keys: &[LinkKey]) -> Result<usize, CoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let storage_keys: Vec<String> = keys.iter().map(storage_key).collect();
        self.run(|conn| conn.del(storage_keys))
    }
}
