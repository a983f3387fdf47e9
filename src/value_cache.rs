use crate::cryocon::attribute::{LogicalAttribute, Reading};

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub reading: Reading,
    pub timestamp: Instant,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Lookup {
    Fresh { reading: Reading, timestamp: Instant },
    Stale,
}

/// Latest reading per attribute.
///
/// Entries are only ever replaced whole, either by a completed batch or by a
/// write's read-back. Readers share the lock; a writer holds it just long
/// enough to swap entries in.
#[derive(Clone, Debug, Default)]
pub struct ValueCache {
    entries: Arc<RwLock<HashMap<LogicalAttribute, CacheEntry>>>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, attribute: LogicalAttribute, now: Instant, validity: Duration) -> Lookup {
        match self.read().get(&attribute) {
            Some(entry) if now.saturating_duration_since(entry.timestamp) < validity => {
                Lookup::Fresh {
                    reading: entry.reading.clone(),
                    timestamp: entry.timestamp,
                }
            }
            _ => Lookup::Stale,
        }
    }

    pub fn put(&self, attribute: LogicalAttribute, reading: Reading, timestamp: Instant) {
        self.write()
            .insert(attribute, CacheEntry { reading, timestamp });
    }

    /// Publish a whole batch under one lock so readers never see half of it.
    pub fn put_all<I>(&self, readings: I, timestamp: Instant)
    where
        I: IntoIterator<Item = (LogicalAttribute, Reading)>,
    {
        let mut entries = self.write();
        for (attribute, reading) in readings {
            entries.insert(attribute, CacheEntry { reading, timestamp });
        }
    }

    pub fn invalidate(&self, attribute: LogicalAttribute) {
        self.write().remove(&attribute);
    }

    /// Raw entry regardless of age.
    pub fn entry(&self, attribute: LogicalAttribute) -> Option<CacheEntry> {
        self.read().get(&attribute).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // a panic while holding the lock cannot leave a half-written entry behind
    fn read(&self) -> RwLockReadGuard<'_, HashMap<LogicalAttribute, CacheEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<LogicalAttribute, CacheEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}
