//! sqlite-adapter: SQLite implementation of the LinkRepository port.
//!
//! Purpose
//! - Provide a lightweight, file-based repository to run the link bridge
//!   locally without a Redis server.
//! - Implements the `LinkRepository` trait from the `domain` crate.
//!
//! Notes
//! - Uses `rusqlite` with the `bundled` feature for portability.
//! - Stores timestamps as milliseconds since UNIX_EPOCH (i64).
//! - Expired rows are filtered on read and purged on every write.

use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use domain::{
    AppCall, BridgeType, Clock, CoreError, LinkContent, LinkKey, LinkRecord, LinkRepository,
    SystemClock, UserEmail,
};
use rusqlite::{params, Connection};

const COLUMNS: &str = "key, web_url, ios_url, aos_url, bridge_type, bridge_template, app_call, \
                       expire_date, register_date, register_name, register_email";

/// SQLite-backed link repository.
pub struct SqliteRepo {
    conn: Mutex<Connection>,
    clock: Box<dyn Clock>,
}

impl SqliteRepo {
    /// Open (or create) a SQLite database at the given path and ensure schema.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        Self::with_clock(path, SystemClock)
    }

    /// Like [`SqliteRepo::new`] with an explicit time source for expiry.
    pub fn with_clock<P: AsRef<Path>, C: Clock + 'static>(path: P, clock: C) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(map_sqerr)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock: Box::new(clock),
        })
    }

    /// Open the database at `path`, creating its parent directory if needed.
    pub fn open_creating_dirs(path: &str) -> Result<Self, CoreError> {
        if let Some(dir) = Path::new(path).parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    CoreError::Repository(format!("cannot create {}: {e}", dir.display()))
                })?;
            }
        }
        Self::new(path)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CoreError> {
        self.conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))
    }

    fn now_millis(&self) -> Result<i64, CoreError> {
        system_time_to_millis(self.clock.now())
    }
}

fn init_schema(conn: &Connection) -> Result<(), CoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS links (
            key TEXT PRIMARY KEY,
            web_url TEXT NOT NULL,
            ios_url TEXT,
            aos_url TEXT,
            bridge_type TEXT NOT NULL DEFAULT 'normal',
            bridge_template TEXT,
            app_call TEXT NOT NULL DEFAULT 'always',
            expire_date INTEGER NOT NULL,
            register_date INTEGER NOT NULL,
            register_name TEXT NOT NULL,
            register_email TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_links_expire_date ON links(expire_date);
        "#,
    )
    .map_err(map_sqerr)
}

fn map_sqerr<E: std::fmt::Display>(e: E) -> CoreError {
    CoreError::Repository(format!("sqlite error: {e}"))
}

fn system_time_to_millis(t: SystemTime) -> Result<i64, CoreError> {
    let ms = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_millis();
    i64::try_from(ms).map_err(|_| CoreError::Repository(format!("timestamp out of range: {ms} ms")))
}

fn millis_to_system_time(ms: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

fn row_to_record(row: &rusqlite::Row) -> Result<LinkRecord, CoreError> {
    let key: String = row.get(0).map_err(map_sqerr)?;
    let web_url: String = row.get(1).map_err(map_sqerr)?;
    let ios_url: Option<String> = row.get(2).map_err(map_sqerr)?;
    let aos_url: Option<String> = row.get(3).map_err(map_sqerr)?;
    let bridge_type: String = row.get(4).map_err(map_sqerr)?;
    let bridge_template: Option<String> = row.get(5).map_err(map_sqerr)?;
    let app_call: String = row.get(6).map_err(map_sqerr)?;
    let expire_date: i64 = row.get(7).map_err(map_sqerr)?;
    let register_date: i64 = row.get(8).map_err(map_sqerr)?;
    let register_name: String = row.get(9).map_err(map_sqerr)?;
    let register_email: String = row.get(10).map_err(map_sqerr)?;

    let key = LinkKey::new(key).map_err(|e| CoreError::Repository(format!("bad key in db: {e}")))?;
    let register_email = UserEmail::new(register_email)
        .map_err(|_| CoreError::Repository("bad register_email".into()))?;
    Ok(LinkRecord {
        key,
        content: LinkContent {
            web_url,
            ios_url,
            aos_url,
            bridge_type: BridgeType::parse(&bridge_type).unwrap_or_default(),
            bridge_template,
            app_call: AppCall::parse(&app_call).unwrap_or_default(),
        },
        expire_date: millis_to_system_time(expire_date),
        register_date: millis_to_system_time(register_date),
        register_name,
        register_email,
    })
}

impl LinkRepository for SqliteRepo {
    fn get(&self, key: &LinkKey) -> Result<Option<LinkRecord>, CoreError> {
        let now = self.now_millis()?;
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM links WHERE key = ?1 AND expire_date > ?2"
            ))
            .map_err(map_sqerr)?;
        let mut rows = stmt.query(params![key.as_str(), now]).map_err(map_sqerr)?;
        if let Some(row) = rows.next().map_err(map_sqerr)? {
            Ok(Some(row_to_record(row)?))
        } else {
            Ok(None)
        }
    }

    fn get_all(&self, keys: Option<&[LinkKey]>) -> Result<Vec<LinkRecord>, CoreError> {
        let now = self.now_millis()?;
        let conn = self.lock()?;
        let mut out = Vec::new();
        match keys {
            Some(keys) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {COLUMNS} FROM links WHERE key = ?1 AND expire_date > ?2"
                    ))
                    .map_err(map_sqerr)?;
                for key in keys {
                    let mut rows = stmt.query(params![key.as_str(), now]).map_err(map_sqerr)?;
                    if let Some(row) = rows.next().map_err(map_sqerr)? {
                        out.push(row_to_record(row)?);
                    }
                }
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {COLUMNS} FROM links WHERE expire_date > ?1 ORDER BY register_date DESC, key"
                    ))
                    .map_err(map_sqerr)?;
                let mut rows = stmt.query(params![now]).map_err(map_sqerr)?;
                while let Some(row) = rows.next().map_err(map_sqerr)? {
                    out.push(row_to_record(row)?);
                }
            }
        }
        Ok(out)
    }

    fn set(&self, record: LinkRecord) -> Result<(), CoreError> {
        let now = self.now_millis()?;
        let expire_ms = system_time_to_millis(record.expire_date)?;
        let register_ms = system_time_to_millis(record.register_date)?;
        let conn = self.lock()?;
        let purged = conn
            .execute("DELETE FROM links WHERE expire_date <= ?1", params![now])
            .map_err(map_sqerr)?;
        if purged > 0 {
            tracing::debug!(purged, "purged expired links");
        }
        let c = &record.content;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO links ({COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                record.key.as_str(),
                c.web_url,
                c.ios_url,
                c.aos_url,
                c.bridge_type.as_str(),
                c.bridge_template,
                c.app_call.as_str(),
                expire_ms,
                register_ms,
                record.register_name,
                record.register_email.as_str(),
            ],
        )
        .map_err(map_sqerr)?;
        Ok(())
    }

    fn delete(&self, keys: &[LinkKey]) -> Result<usize, CoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(map_sqerr)?;
        let mut affected = 0;
        for key in keys {
            affected += tx
                .execute("DELETE FROM links WHERE key = ?1", params![key.as_str()])
                .map_err(map_sqerr)?;
        }
        tx.commit().map_err(map_sqerr)?;
        Ok(affected)
    }
}

impl SqliteRepo {
    /// Number of rows physically stored, expired ones included.
    pub fn stored_count(&self) -> Result<usize, CoreError> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))
            .map_err(map_sqerr)?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct ManualClock(Arc<AtomicU64>);
    impl Clock for ManualClock {
        fn now(&self) -> SystemTime {
            UNIX_EPOCH + Duration::from_millis(self.0.load(Ordering::SeqCst))
        }
    }

    fn tmp_db(clock: ManualClock) -> (SqliteRepo, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let repo = SqliteRepo::with_clock(path, clock).unwrap();
        (repo, dir)
    }

    fn record(key: &str, expire_ms: u64) -> LinkRecord {
        LinkRecord {
            key: LinkKey::new(key).unwrap(),
            content: LinkContent::web_only(format!("https://acme.com/{key}")),
            expire_date: UNIX_EPOCH + Duration::from_millis(expire_ms),
            register_date: UNIX_EPOCH,
            register_name: "Tester".into(),
            register_email: UserEmail::new("u@acme.com").unwrap(),
        }
    }

    #[test]
    fn set_get_roundtrip_keeps_every_field() {
        let (repo, _dir) = tmp_db(ManualClock::default());
        let mut link = record("abcdefgh", 5_000);
        link.content = LinkContent {
            web_url: "https://acme.com/item/$1?id=$id".into(),
            ios_url: Some("acme://item/$1".into()),
            aos_url: None,
            bridge_type: BridgeType::AppOnly,
            bridge_template: Some("<p>Get the app</p>".into()),
            app_call: AppCall::SafeOnly,
        };
        link.register_date = UNIX_EPOCH + Duration::from_millis(1_234);
        repo.set(link.clone()).unwrap();
        assert_eq!(repo.get(&link.key).unwrap(), Some(link));
    }

    #[test]
    fn far_future_expiry_is_an_error_not_a_silent_expiry() {
        let (repo, _dir) = tmp_db(ManualClock::default());
        let mut link = record("abcdefgh", 5_000);
        link.expire_date = UNIX_EPOCH + Duration::from_millis(i64::MAX as u64 + 10);
        assert!(matches!(repo.set(link.clone()), Err(CoreError::Repository(_))));
        assert_eq!(repo.get(&link.key).unwrap(), None);
        assert_eq!(repo.stored_count().unwrap(), 0);

        link.expire_date = UNIX_EPOCH + Duration::from_millis(i64::MAX as u64);
        repo.set(link.clone()).unwrap();
        assert_eq!(repo.get(&link.key).unwrap(), Some(link));
    }

    #[test]
    fn set_overwrites_existing_key() {
        let (repo, _dir) = tmp_db(ManualClock::default());
        let mut link = record("k1", 5_000);
        repo.set(link.clone()).unwrap();
        link.content.web_url = "https://acme.com/changed".into();
        repo.set(link.clone()).unwrap();
        let got = repo.get(&link.key).unwrap().unwrap();
        assert_eq!(got.content.web_url, "https://acme.com/changed");
        assert_eq!(repo.get_all(None).unwrap().len(), 1);
    }

    #[test]
    fn expired_rows_are_hidden_and_purged_on_write() {
        let clock = ManualClock::default();
        let (repo, _dir) = tmp_db(clock.clone());
        repo.set(record("old", 100)).unwrap();
        repo.set(record("new", 10_000)).unwrap();

        clock.0.store(100, Ordering::SeqCst);
        assert_eq!(repo.get(&LinkKey::new("old").unwrap()).unwrap(), None);
        assert_eq!(repo.get_all(None).unwrap().len(), 1);
        assert_eq!(repo.stored_count().unwrap(), 2);

        repo.set(record("other", 10_000)).unwrap();
        assert_eq!(repo.stored_count().unwrap(), 2);
    }

    #[test]
    fn get_all_by_keys_and_delete() {
        let (repo, _dir) = tmp_db(ManualClock::default());
        for k in ["a", "b", "c"] {
            repo.set(record(k, 10_000)).unwrap();
        }
        let keys = [LinkKey::new("a").unwrap(), LinkKey::new("missing").unwrap()];
        let got = repo.get_all(Some(&keys)).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].key.as_str(), "a");

        assert_eq!(repo.delete(&keys).unwrap(), 1);
        assert_eq!(repo.get_all(None).unwrap().len(), 2);
    }
}
