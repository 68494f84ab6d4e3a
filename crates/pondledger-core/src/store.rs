// SQLite-backed document store addressed by slash-separated paths, with a
// broadcast channel that pushes every mutation to live subscribers.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::paths::DocPath;
use crate::protocol::{ChangeOp, StoreChange};

/// How many unread changes a subscriber may fall behind before it starts
/// skipping.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// JSON documents keyed by path. Last writer wins; there is no versioning.
pub struct DocumentStore {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<StoreChange>,
}

impl DocumentStore {
    /// Open (or create) a store at `path`. Pass `":memory:"` for an
    /// ephemeral store.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open document store at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                path       TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .context("failed to create document schema")?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    /// Acquire the connection. Panics only if a previous holder panicked.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("document store mutex poisoned")
    }

    /// Broadcast a committed change. Callers hold the connection guard so
    /// subscribers see changes in commit order.
    fn publish(&self, change: StoreChange) {
        debug!(path = %change.path, op = ?change.op, "store change");
        // No receivers is the normal state when nobody is listening.
        let _ = self.changes.send(change);
    }

    /// Run `f` inside one SQLite transaction. Reads through the [`Batch`] see
    /// its earlier writes; the writes commit together or not at all, and are
    /// published only after the commit.
    pub fn transact<T, E>(&self, f: impl FnOnce(&mut Batch<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<anyhow::Error>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        let mut batch = Batch {
            conn: &*tx,
            changes: Vec::new(),
        };
        let out = f(&mut batch)?;
        let changes = batch.changes;
        tx.commit().context("failed to commit transaction")?;
        for change in changes {
            self.publish(change);
        }
        Ok(out)
    }

    /// Replace the document at `path`.
    pub fn set(&self, path: &DocPath, value: &Value) -> Result<()> {
        self.transact(|batch| batch.set(path, value))
    }

    /// Shallow-merge `fields` into the document at `path`, creating it when
    /// absent. A non-object document is replaced by the fields. Returns the
    /// merged document.
    pub fn update(&self, path: &DocPath, fields: &Map<String, Value>) -> Result<Value> {
        self.transact(|batch| batch.update(path, fields))
    }

    /// Store `value` under a freshly generated key in `collection` and
    /// return the new document's path.
    pub fn push(&self, collection: &DocPath, value: &Value) -> Result<DocPath> {
        let path = collection
            .child(&generate_key())
            .context("generated key is not a valid path segment")?;
        self.set(&path, value)?;
        Ok(path)
    }

    pub fn get(&self, path: &DocPath) -> Result<Option<Value>> {
        let conn = self.conn();
        read_document(&conn, path)
    }

    /// Direct children of `collection` as `(key, value)` in creation order.
    pub fn children(&self, collection: &DocPath) -> Result<Vec<(String, Value)>> {
        let prefix = collection.descendant_prefix();
        Ok(self
            .descendants(collection)?
            .into_iter()
            .filter_map(|(path, value)| {
                let rest = &path.as_str()[prefix.len()..];
                (!rest.contains('/')).then(|| (rest.to_string(), value))
            })
            .collect())
    }

    /// Every document strictly beneath `prefix`, in creation order.
    pub fn descendants(&self, prefix: &DocPath) -> Result<Vec<(DocPath, Value)>> {
        let conn = self.conn();
        let like = prefix.descendant_prefix();
        let mut stmt = conn
            .prepare(
                "SELECT path, value FROM documents
                 WHERE substr(path, 1, ?2) = ?1
                 ORDER BY rowid",
            )
            .context("failed to prepare descendants query")?;

        let rows = stmt
            .query_map(params![like, like.chars().count() as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("failed to query descendants")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map descendant rows")?;

        let mut docs = Vec::with_capacity(rows.len());
        for (raw_path, raw_value) in rows {
            let path = match DocPath::parse(&raw_path) {
                Ok(p) => p,
                Err(e) => {
                    warn!("skipping stored document with bad path {raw_path}: {e}");
                    continue;
                }
            };
            match serde_json::from_str(&raw_value) {
                Ok(value) => docs.push((path, value)),
                Err(e) => warn!("skipping unreadable document at {raw_path}: {e}"),
            }
        }
        Ok(docs)
    }

    /// Remove the document at `path` and everything beneath it. Returns the
    /// number of documents deleted.
    pub fn remove(&self, path: &DocPath) -> Result<usize> {
        let conn = self.conn();
        let like = path.descendant_prefix();
        let removed = conn
            .execute(
                "DELETE FROM documents WHERE path = ?1 OR substr(path, 1, ?3) = ?2",
                params![path.as_str(), like, like.chars().count() as i64],
            )
            .with_context(|| format!("failed to remove {path}"))?;
        if removed > 0 {
            self.publish(StoreChange {
                path: path.clone(),
                op: ChangeOp::Remove,
                value: None,
            });
        }
        Ok(removed)
    }

    /// Listen for changes affecting `prefix`.
    pub fn subscribe(&self, prefix: DocPath) -> Subscription {
        Subscription {
            prefix,
            rx: self.changes.subscribe(),
        }
    }

    /// Listen for every change, unfiltered.
    pub fn subscribe_all(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// Reads and writes staged inside [`DocumentStore::transact`].
pub struct Batch<'a> {
    conn: &'a Connection,
    changes: Vec<StoreChange>,
}

impl Batch<'_> {
    pub fn get(&self, path: &DocPath) -> Result<Option<Value>> {
        read_document(self.conn, path)
    }

    pub fn set(&mut self, path: &DocPath, value: &Value) -> Result<()> {
        write_document(self.conn, path, value)?;
        self.changes.push(StoreChange {
            path: path.clone(),
            op: ChangeOp::Set,
            value: Some(value.clone()),
        });
        Ok(())
    }

    /// Same merge rule as [`DocumentStore::update`].
    pub fn update(&mut self, path: &DocPath, fields: &Map<String, Value>) -> Result<Value> {
        let mut doc = match read_document(self.conn, path)? {
            Some(Value::Object(existing)) => existing,
            _ => Map::new(),
        };
        for (k, v) in fields {
            doc.insert(k.clone(), v.clone());
        }
        let merged = Value::Object(doc);
        write_document(self.conn, path, &merged)?;
        self.changes.push(StoreChange {
            path: path.clone(),
            op: ChangeOp::Update,
            value: Some(merged.clone()),
        });
        Ok(merged)
    }
}

/// A live listener on one path prefix.
pub struct Subscription {
    prefix: DocPath,
    rx: broadcast::Receiver<StoreChange>,
}

impl Subscription {
    pub fn prefix(&self) -> &DocPath {
        &self.prefix
    }

    /// Wait for the next change under the prefix. Returns `None` once the
    /// store is dropped. A subscriber that lags skips the missed changes.
    pub async fn next(&mut self) -> Option<StoreChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.affects(&self.prefix) => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(prefix = %self.prefix, skipped, "subscriber lagged, changes dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Millisecond stamp of the last key handed out in this process.
static LAST_KEY_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Time-ordered unique key: `YYYYMMDDHHMMSSmmm` plus a random suffix.
///
/// The stamp never repeats within a process (a burst borrows the next free
/// millisecond), so keys from one process sort in creation order. Across
/// processes the order is only as good as the wall clock.
pub fn generate_key() -> String {
    let now = Utc::now().timestamp_millis();
    let millis = match LAST_KEY_MILLIS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        Some(now.max(last + 1))
    }) {
        Ok(last) | Err(last) => now.max(last + 1),
    };
    let stamp = DateTime::from_timestamp_millis(millis)
        .unwrap_or_else(Utc::now)
        .format("%Y%m%d%H%M%S%3f");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{stamp}{}", &suffix[..8])
}

fn read_document(conn: &Connection, path: &DocPath) -> Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM documents WHERE path = ?1",
            params![path.as_str()],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to read {path}"))?;

    match raw {
        Some(json_str) => {
            let value = serde_json::from_str(&json_str)
                .with_context(|| format!("document at {path} is not valid JSON"))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn write_document(conn: &Connection, path: &DocPath, value: &Value) -> Result<()> {
    let json_str = serde_json::to_string(value).context("failed to serialize document")?;
    conn.execute(
        "INSERT INTO documents (path, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(path) DO UPDATE SET
            value      = excluded.value,
            updated_at = excluded.updated_at",
        params![path.as_str(), json_str, Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("failed to write {path}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_store() -> DocumentStore {
        DocumentStore::open(":memory:").expect("in-memory store should open")
    }

    fn path(s: &str) -> DocPath {
        DocPath::parse(s).unwrap()
    }

    #[test]
    fn set_then_get_round_trip() {
        let store = test_store();
        let p = path("projects/p1");
        store.set(&p, &json!({"name": "North farm"})).unwrap();
        assert_eq!(store.get(&p).unwrap(), Some(json!({"name": "North farm"})));
        assert_eq!(store.get(&path("projects/missing")).unwrap(), None);
    }

    #[test]
    fn set_overwrites_last_writer_wins() {
        let store = test_store();
        let p = path("budgets/b1");
        store.set(&p, &json!({"amount": 1})).unwrap();
        store.set(&p, &json!({"amount": 2})).unwrap();
        assert_eq!(store.get(&p).unwrap(), Some(json!({"amount": 2})));
    }

    #[test]
    fn update_merges_top_level_fields() {
        let store = test_store();
        let p = path("transactions/t1");
        store
            .set(&p, &json!({"amount": 10, "vendor": "Feedco", "nested": {"a": 1}}))
            .unwrap();

        let mut fields = Map::new();
        fields.insert("amount".into(), json!(25));
        fields.insert("nested".into(), json!({"b": 2}));
        let merged = store.update(&p, &fields).unwrap();

        assert_eq!(merged, json!({"amount": 25, "vendor": "Feedco", "nested": {"b": 2}}));
        assert_eq!(store.get(&p).unwrap(), Some(merged));
    }

    #[test]
    fn update_creates_missing_document() {
        let store = test_store();
        let mut fields = Map::new();
        fields.insert("name".into(), json!("Ravi"));
        let merged = store.update(&path("employees/e1"), &fields).unwrap();
        assert_eq!(merged, json!({"name": "Ravi"}));
    }

    #[test]
    fn push_generates_distinct_keys_in_creation_order() {
        let store = test_store();
        let col = path("transactions");
        let a = store.push(&col, &json!({"n": 1})).unwrap();
        let b = store.push(&col, &json!({"n": 2})).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.parent().unwrap(), col);

        let kids = store.children(&col).unwrap();
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].1["n"], 1);
        assert_eq!(kids[1].1["n"], 2);
    }

    #[test]
    fn children_excludes_grandchildren_and_lookalike_prefixes() {
        let store = test_store();
        store.set(&path("attendance/2026-01-05/e1"), &json!({})).unwrap();
        store.set(&path("attendance/2026-01-05/e2"), &json!({})).unwrap();
        store.set(&path("attendance/2026-01-06/e1"), &json!({})).unwrap();
        store.set(&path("attendancex/y"), &json!({})).unwrap();

        let day = store.children(&path("attendance/2026-01-05")).unwrap();
        let keys: Vec<_> = day.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["e1", "e2"]);

        assert!(store.children(&path("attendance")).unwrap().is_empty());
        assert_eq!(store.descendants(&path("attendance")).unwrap().len(), 3);
    }

    #[test]
    fn remove_deletes_descendants() {
        let store = test_store();
        store.set(&path("shrimp/north/ponds/p1"), &json!({})).unwrap();
        store.set(&path("shrimp/north/ponds/p2"), &json!({})).unwrap();
        store.set(&path("shrimp/south/ponds/p1"), &json!({})).unwrap();

        let removed = store.remove(&path("shrimp/north")).unwrap();
        assert_eq!(removed, 2);
        assert!(store.descendants(&path("shrimp/north")).unwrap().is_empty());
        assert_eq!(store.descendants(&path("shrimp/south")).unwrap().len(), 1);
        assert_eq!(store.remove(&path("shrimp/north")).unwrap(), 0);
    }

    #[test]
    fn generated_keys_are_valid_segments() {
        let key = generate_key();
        assert_eq!(key.len(), 25);
        assert!(DocPath::parse("x").unwrap().child(&key).is_ok());
    }

    #[test]
    fn keys_sort_in_generation_order() {
        let keys: Vec<String> = (0..2000).map(|_| generate_key()).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn failed_transaction_writes_and_publishes_nothing() {
        let store = test_store();
        let mut rx = store.subscribe_all();
        store.set(&path("inventory/feed"), &json!({"quantity": 10})).unwrap();
        rx.try_recv().unwrap();

        let result = store.transact(|batch| -> Result<()> {
            batch.set(&path("activities/a1"), &json!({"quantity": 4}))?;
            assert!(batch.get(&path("activities/a1"))?.is_some());
            anyhow::bail!("inventory update refused")
        });
        assert!(result.is_err());
        assert_eq!(store.get(&path("activities/a1")).unwrap(), None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn transaction_publishes_each_write_in_order() {
        let store = test_store();
        let mut rx = store.subscribe_all();
        store
            .transact(|batch| -> Result<()> {
                batch.set(&path("activities/a1"), &json!({"quantity": 4}))?;
                let mut fields = Map::new();
                fields.insert("quantity".into(), json!(6));
                batch.update(&path("inventory/feed"), &fields)?;
                Ok(())
            })
            .unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!((first.path, first.op), (path("activities/a1"), ChangeOp::Set));
        let second = rx.try_recv().unwrap();
        assert_eq!((second.path, second.op), (path("inventory/feed"), ChangeOp::Update));
    }

    #[test]
    fn broadcast_order_matches_commit_order() {
        let store = test_store();
        let p = path("budgets/b1");
        for _ in 0..20 {
            let mut rx = store.subscribe_all();
            std::thread::scope(|s| {
                for n in 0..8 {
                    let (store, p) = (&store, &p);
                    s.spawn(move || store.set(p, &json!({"writer": n})).unwrap());
                }
            });
            let mut last = None;
            while let Ok(change) = rx.try_recv() {
                last = change.value;
            }
            assert_eq!(last, store.get(&p).unwrap());
        }
    }

    #[tokio::test]
    async fn subscription_filters_by_prefix() {
        let store = test_store();
        let mut sub = store.subscribe(path("transactions"));

        store.set(&path("budgets/b1"), &json!({"amount": 5})).unwrap();
        store.set(&path("transactions/t1"), &json!({"amount": 9})).unwrap();

        let change = sub.next().await.unwrap();
        assert_eq!(change.path, path("transactions/t1"));
        assert_eq!(change.op, ChangeOp::Set);
        assert_eq!(change.value, Some(json!({"amount": 9})));
    }

    #[tokio::test]
    async fn removal_of_ancestor_reaches_descendant_listener() {
        let store = test_store();
        store.set(&path("shrimp/north/ponds/p1"), &json!({})).unwrap();
        let mut sub = store.subscribe(path("shrimp/north/ponds"));

        store.remove(&path("shrimp/north")).unwrap();
        let change = sub.next().await.unwrap();
        assert_eq!(change.op, ChangeOp::Remove);
        assert_eq!(change.value, None);
    }

    #[tokio::test]
    async fn removing_nothing_publishes_nothing() {
        let store = test_store();
        let mut rx = store.subscribe_all();
        store.remove(&path("projects/ghost")).unwrap();
        assert!(rx.try_recv().is_err());
    }
}
