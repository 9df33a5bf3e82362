//! In-memory store of named reference lines.
//!
//! A reference line is a previously captured trace plus the sub-range where
//! hardware-side autolock should engage. The catalog owns its entries;
//! anything comparing against a line during a centering attempt works on a
//! cloned snapshot, so concurrent edits cannot corrupt an attempt in
//! flight. On-disk persistence is the host's job — the catalog only offers
//! JSON round-trip helpers for it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::Trace;
use crate::error::LockError;

/// A named reference trace with its designated lock region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceLine {
    pub key: String,
    pub trace: Trace,
    /// Start of the lock region, in volts on the trace's own grid.
    pub lock_start: f64,
    /// End of the lock region; always greater than `lock_start`.
    pub lock_end: f64,
    pub modified_at: DateTime<Utc>,
}

impl ReferenceLine {
    /// Validate and build a reference line.
    ///
    /// Invariants: a non-trivial strictly increasing trace, and
    /// `lock_start < lock_end` with both inside the trace's x-range.
    pub fn new(
        key: impl Into<String>,
        trace: Trace,
        lock_start: f64,
        lock_end: f64,
    ) -> Result<Self, LockError> {
        if trace.len() < 2 {
            return Err(LockError::MalformedReference(
                "trace needs at least two samples".into(),
            ));
        }
        if !trace.is_monotonic() {
            return Err(LockError::MalformedReference(
                "trace grid is not strictly increasing".into(),
            ));
        }
        if lock_start >= lock_end {
            return Err(LockError::MalformedReference(format!(
                "lock region start {lock_start} is not below end {lock_end}"
            )));
        }
        if lock_start < trace.start() || lock_end > trace.end() {
            return Err(LockError::MalformedReference(format!(
                "lock region [{lock_start}, {lock_end}] outside trace range [{}, {}]",
                trace.start(),
                trace.end()
            )));
        }
        Ok(Self {
            key: key.into(),
            trace,
            lock_start,
            lock_end,
            modified_at: Utc::now(),
        })
    }

    /// Total x extent of the reference trace; the "linewidth" used by the
    /// locator and centering margins.
    pub fn linewidth(&self) -> f64 {
        self.trace.span()
    }
}

/// Keyed store of reference lines, listed in insertion order.
#[derive(Debug, Default)]
pub struct ReferenceLineCatalog {
    lines: HashMap<String, ReferenceLine>,
    order: Vec<String>,
}

impl ReferenceLineCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lines.contains_key(key)
    }

    /// Insert a line, replacing any entry with the same key (the replaced
    /// entry keeps its listing position).
    pub fn insert(&mut self, mut line: ReferenceLine) {
        line.modified_at = Utc::now();
        if !self.lines.contains_key(&line.key) {
            self.order.push(line.key.clone());
        } else {
            log::warn!("reference line {:?} already exists, overwriting", line.key);
        }
        self.lines.insert(line.key.clone(), line);
    }

    pub fn remove(&mut self, key: &str) -> Option<ReferenceLine> {
        self.order.retain(|k| k != key);
        self.lines.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&ReferenceLine> {
        self.lines.get(key)
    }

    /// Cloned copy of one entry, decoupled from later catalog edits. This is
    /// what a centering attempt holds for its whole duration.
    pub fn snapshot(&self, key: &str) -> Result<ReferenceLine, LockError> {
        self.lines
            .get(key)
            .cloned()
            .ok_or_else(|| LockError::CatalogMiss(key.to_string()))
    }

    /// All entries in insertion order.
    pub fn list(&self) -> Vec<&ReferenceLine> {
        self.order
            .iter()
            .filter_map(|k| self.lines.get(k))
            .collect()
    }

    /// Cloned copies of all entries, for a scan over the whole catalog.
    pub fn snapshot_all(&self) -> Vec<ReferenceLine> {
        self.order
            .iter()
            .filter_map(|k| self.lines.get(k).cloned())
            .collect()
    }

    /// Rename an entry, keeping its listing position. A pre-existing entry
    /// under the new key is replaced.
    pub fn rename(&mut self, key: &str, new_key: impl Into<String>) -> Result<(), LockError> {
        let new_key = new_key.into();
        if !self.lines.contains_key(key) {
            return Err(LockError::CatalogMiss(key.to_string()));
        }
        if new_key != key {
            self.remove(&new_key);
        }
        let Some(mut line) = self.lines.remove(key) else {
            return Err(LockError::CatalogMiss(key.to_string()));
        };
        line.key = new_key.clone();
        line.modified_at = Utc::now();
        if let Some(slot) = self.order.iter_mut().find(|k| k.as_str() == key) {
            *slot = new_key.clone();
        }
        self.lines.insert(new_key, line);
        Ok(())
    }

    /// Copy an entry under a freshly generated key (`<key>-copy`,
    /// `<key>-copy2`, …) with a refreshed modification time. Returns the new
    /// key.
    pub fn duplicate(&mut self, key: &str) -> Result<String, LockError> {
        let source = self.snapshot(key)?;
        let mut candidate = format!("{key}-copy");
        let mut n = 2;
        while self.lines.contains_key(&candidate) {
            candidate = format!("{key}-copy{n}");
            n += 1;
        }
        let mut copy = source;
        copy.key = candidate.clone();
        copy.modified_at = Utc::now();
        self.order.push(candidate.clone());
        self.lines.insert(candidate.clone(), copy);
        Ok(candidate)
    }

    /// Serialize one entry to JSON for an external store.
    pub fn export_json(&self, key: &str) -> Result<String, LockError> {
        let line = self.snapshot(key)?;
        serde_json::to_string(&line)
            .map_err(|e| LockError::MalformedReference(format!("serialization failed: {e}")))
    }

    /// Import an entry from JSON produced by [`export_json`](Self::export_json),
    /// re-validating its invariants before insertion.
    pub fn import_json(&mut self, json: &str) -> Result<String, LockError> {
        let line: ReferenceLine = serde_json::from_str(json)
            .map_err(|e| LockError::MalformedReference(format!("invalid JSON: {e}")))?;
        let line = ReferenceLine::new(line.key, line.trace, line.lock_start, line.lock_end)?;
        let key = line.key.clone();
        self.insert(line);
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(key: &str) -> ReferenceLine {
        let x: Vec<f64> = (0..100).map(|i| i as f64 * 0.01).collect();
        let y: Vec<f64> = x.iter().map(|&xi| (20.0 * xi).sin()).collect();
        ReferenceLine::new(key, Trace::new(x, y), 0.2, 0.6).unwrap()
    }

    #[test]
    fn rejects_malformed_lines() {
        let x: Vec<f64> = (0..100).map(|i| i as f64 * 0.01).collect();
        let y = vec![0.0; 100];
        let t = Trace::new(x, y);
        // inverted lock region
        assert!(ReferenceLine::new("a", t.clone(), 0.6, 0.2).is_err());
        // lock region outside the trace
        assert!(ReferenceLine::new("a", t.clone(), 0.2, 5.0).is_err());
        // non-monotonic grid
        let bad = Trace::new(vec![0.0, 0.2, 0.1], vec![0.0; 3]);
        assert!(ReferenceLine::new("a", bad, 0.0, 0.1).is_err());
        // well-formed
        assert!(ReferenceLine::new("a", t, 0.2, 0.6).is_ok());
    }

    #[test]
    fn insert_list_remove() {
        let mut cat = ReferenceLineCatalog::new();
        cat.insert(line("b"));
        cat.insert(line("a"));
        let keys: Vec<&str> = cat.list().iter().map(|l| l.key.as_str()).collect();
        assert_eq!(keys, ["b", "a"], "listing keeps insertion order");

        cat.insert(line("b")); // replace keeps position
        let keys: Vec<&str> = cat.list().iter().map(|l| l.key.as_str()).collect();
        assert_eq!(keys, ["b", "a"]);

        assert!(cat.remove("b").is_some());
        assert!(!cat.contains("b"));
        assert_eq!(cat.len(), 1);
    }

    #[test]
    fn snapshot_is_decoupled_from_edits() {
        let mut cat = ReferenceLineCatalog::new();
        cat.insert(line("a"));
        let snap = cat.snapshot("a").unwrap();
        cat.remove("a");
        assert_eq!(snap.key, "a");
        assert!(cat.snapshot("a").is_err());
    }

    #[test]
    fn duplicate_generates_distinct_keys() {
        let mut cat = ReferenceLineCatalog::new();
        cat.insert(line("a"));
        let before = cat.get("a").unwrap().modified_at;
        let k1 = cat.duplicate("a").unwrap();
        let k2 = cat.duplicate("a").unwrap();
        assert_eq!(k1, "a-copy");
        assert_eq!(k2, "a-copy2");
        assert_eq!(cat.len(), 3);
        assert!(cat.get(&k1).unwrap().modified_at >= before);
        assert!(matches!(
            cat.duplicate("missing"),
            Err(LockError::CatalogMiss(_))
        ));
    }

    #[test]
    fn rename_keeps_position() {
        let mut cat = ReferenceLineCatalog::new();
        cat.insert(line("a"));
        cat.insert(line("b"));
        cat.rename("a", "z").unwrap();
        let keys: Vec<&str> = cat.list().iter().map(|l| l.key.as_str()).collect();
        assert_eq!(keys, ["z", "b"]);
        assert_eq!(cat.get("z").unwrap().key, "z");
    }

    #[test]
    fn json_round_trip_revalidates() {
        let mut cat = ReferenceLineCatalog::new();
        cat.insert(line("a"));
        let json = cat.export_json("a").unwrap();

        let mut other = ReferenceLineCatalog::new();
        let key = other.import_json(&json).unwrap();
        assert_eq!(key, "a");
        assert_eq!(other.get("a").unwrap().trace.len(), 100);

        // Tampered lock region fails validation on import.
        let bad = json.replace("\"lock_start\":0.2", "\"lock_start\":9.0");
        assert!(other.import_json(&bad).is_err());
    }
}
