use crate::{
    db,
    error::{AutomationError, Result},
    types::{BatchState, RunSettings, WorkItem},
};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Durable batch state shared by the control surface and the runner.
///
/// Cloning is cheap; clones share one connection.
#[derive(Clone)]
pub struct BatchStore {
    db: Arc<Mutex<Connection>>,
}

impl BatchStore {
    /// Open (or create) the store. `None` keeps everything in memory.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let conn = db::open_database(path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| AutomationError::Other(e.to_string()))
    }

    /// Read the persisted batch. Missing keys read as an empty, unpaused batch.
    pub fn load(&self) -> Result<BatchState> {
        let conn = self.conn()?;
        read_state(&conn)
    }

    /// Replace any existing batch with a fresh, unpaused one.
    pub fn replace(&self, items: Vec<WorkItem>, settings: RunSettings) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let state = BatchState {
            total_count: items.len(),
            queue: items,
            settings: Some(settings),
            paused: false,
        };
        write_state(&tx, &state)?;
        tx.commit()?;
        Ok(())
    }

    /// Remove the queue head if it is still `expected` and the batch is live.
    ///
    /// Returns the remaining length, or `None` when the batch was stopped or
    /// replaced while the item was being processed.
    pub fn pop_head(&self, expected: &WorkItem) -> Result<Option<usize>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut state = read_state(&tx)?;

        if state.paused || state.queue.first() != Some(expected) {
            return Ok(None);
        }

        state.queue.remove(0);
        db::put_value(&tx, db::KEY_ACTIVE_QUEUE, &serde_json::to_value(&state.queue)?)?;
        tx.commit()?;
        Ok(Some(state.queue.len()))
    }

    /// Operator stop: discard remaining work and pause.
    pub fn stop(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        db::put_value(&tx, db::KEY_ACTIVE_QUEUE, &json!([]))?;
        db::put_value(&tx, db::KEY_IS_PAUSED, &json!(true))?;
        tx.commit()?;
        Ok(())
    }

    /// Forget the batch entirely (after completion).
    pub fn clear(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for key in [
            db::KEY_ACTIVE_QUEUE,
            db::KEY_BATCH_SETTINGS,
            db::KEY_TOTAL_IN_BATCH,
            db::KEY_IS_PAUSED,
        ] {
            db::delete_value(&tx, key)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Persist one control-surface field under `saved_<field>`.
    pub fn save_preference(&self, field: &str, value: &Value) -> Result<()> {
        let conn = self.conn()?;
        db::put_value(&conn, &preference_key(field), value)?;
        Ok(())
    }

    pub fn load_preference(&self, field: &str) -> Result<Option<Value>> {
        let conn = self.conn()?;
        Ok(db::get_value(&conn, &preference_key(field))?)
    }

    /// All saved preferences, keyed by field name (prefix stripped).
    pub fn load_preferences(&self) -> Result<BTreeMap<String, Value>> {
        let conn = self.conn()?;
        let entries = db::list_prefixed(&conn, db::PREFERENCE_PREFIX)?;
        Ok(entries
            .into_iter()
            .map(|(key, value)| (key[db::PREFERENCE_PREFIX.len()..].to_string(), value))
            .collect())
    }
}

fn preference_key(field: &str) -> String {
    format!("{}{}", db::PREFERENCE_PREFIX, field)
}

fn read_state(conn: &Connection) -> Result<BatchState> {
    let queue = match db::get_value(conn, db::KEY_ACTIVE_QUEUE)? {
        Some(v) => serde_json::from_value(v)?,
        None => Vec::new(),
    };
    let settings = match db::get_value(conn, db::KEY_BATCH_SETTINGS)? {
        Some(Value::Null) | None => None,
        Some(v) => Some(serde_json::from_value(v)?),
    };
    let total_count = db::get_value(conn, db::KEY_TOTAL_IN_BATCH)?
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    let paused = db::get_value(conn, db::KEY_IS_PAUSED)?
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    Ok(BatchState {
        queue,
        settings,
        total_count,
        paused,
    })
}

fn write_state(conn: &Connection, state: &BatchState) -> Result<()> {
    db::put_value(conn, db::KEY_ACTIVE_QUEUE, &serde_json::to_value(&state.queue)?)?;
    db::put_value(
        conn,
        db::KEY_BATCH_SETTINGS,
        &serde_json::to_value(&state.settings)?,
    )?;
    db::put_value(conn, db::KEY_TOTAL_IN_BATCH, &json!(state.total_count))?;
    db::put_value(conn, db::KEY_IS_PAUSED, &json!(state.paused))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(ids: &[&str]) -> Vec<WorkItem> {
        ids.iter().map(|id| WorkItem::new(*id)).collect()
    }

    #[test]
    fn test_empty_store_loads_default_state() {
        let store = BatchStore::open(None).unwrap();
        assert_eq!(store.load().unwrap(), BatchState::default());
    }

    #[test]
    fn test_replace_sets_total_and_unpauses() {
        let store = BatchStore::open(None).unwrap();
        store.stop().unwrap();
        store
            .replace(items(&["A", "B", "C"]), RunSettings::default())
            .unwrap();

        let state = store.load().unwrap();
        assert_eq!(state.queue.len(), 3);
        assert_eq!(state.total_count, 3);
        assert!(!state.paused);
        assert!(state.settings.is_some());
    }

    #[test]
    fn test_pop_head_in_order() {
        let store = BatchStore::open(None).unwrap();
        store.replace(items(&["A", "B"]), RunSettings::default()).unwrap();

        assert_eq!(store.pop_head(&WorkItem::new("A")).unwrap(), Some(1));
        assert_eq!(store.load().unwrap().queue, items(&["B"]));
        assert_eq!(store.pop_head(&WorkItem::new("B")).unwrap(), Some(0));
    }

    #[test]
    fn test_pop_head_ignores_stale_item() {
        let store = BatchStore::open(None).unwrap();
        store.replace(items(&["A", "B"]), RunSettings::default()).unwrap();

        assert_eq!(store.pop_head(&WorkItem::new("B")).unwrap(), None);
        assert_eq!(store.load().unwrap().queue.len(), 2);
    }

    #[test]
    fn test_pop_head_after_stop_is_noop() {
        let store = BatchStore::open(None).unwrap();
        store.replace(items(&["A"]), RunSettings::default()).unwrap();
        store.stop().unwrap();

        assert_eq!(store.pop_head(&WorkItem::new("A")).unwrap(), None);
        let state = store.load().unwrap();
        assert!(state.queue.is_empty());
        assert!(state.paused);
    }

    #[test]
    fn test_clear_forgets_batch() {
        let store = BatchStore::open(None).unwrap();
        store.replace(items(&["A"]), RunSettings::default()).unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), BatchState::default());
    }

    #[test]
    fn test_preferences_round_trip_under_prefix() {
        let store = BatchStore::open(None).unwrap();
        store.save_preference("subject", &json!("Science")).unwrap();
        store.save_preference("nuggetAutomation", &json!(true)).unwrap();

        assert_eq!(
            store.load_preference("subject").unwrap(),
            Some(json!("Science"))
        );
        let all = store.load_preferences().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["nuggetAutomation"], json!(true));
        // Preferences are not part of the batch.
        assert_eq!(store.load().unwrap(), BatchState::default());
    }
}
