use crate::prelude::*;
use crate::error::Error;
use crate::value_cache::Lookup;

use std::collections::HashMap;
use std::time::Instant;

/// Answers a set of attribute reads, querying the instrument only for those
/// whose cache entry is older than the validity period.
pub struct PollAttributes {
    coordinator: Coordinator,
    attributes: Vec<LogicalAttribute>,
    now: Instant,
}

impl PollAttributes {
    pub fn new(coordinator: Coordinator, attributes: Vec<LogicalAttribute>, now: Instant) -> Self {
        Self {
            coordinator,
            attributes,
            now,
        }
    }

    pub async fn run(&self) -> Result<HashMap<LogicalAttribute, Reading>, Error> {
        let wanted = self.wanted()?;
        let cache = self.coordinator.cache();
        let validity = self.coordinator.validity();

        let mut readings = HashMap::with_capacity(wanted.len());
        let stale = self.collect_fresh(&wanted, &mut readings);
        if stale.is_empty() {
            return Ok(readings);
        }

        let mut batch = self.coordinator.dispatcher().begin_batch().await?;

        // whoever held the connection before us may have just refreshed these
        for attribute in stale {
            match cache.get(attribute, self.now, validity) {
                Lookup::Fresh { reading, .. } => {
                    self.coordinator.with_stats(|stats| stats.cache_hits += 1);
                    readings.insert(attribute, reading);
                }
                Lookup::Stale => {
                    batch.enqueue(attribute);
                }
            }
        }

        let queries = batch.len() as u64;
        if queries == 0 {
            return Ok(readings);
        }

        match batch.commit(self.now).await {
            Ok(results) => {
                let invalid = results.iter().filter(|(_, r)| !r.is_valid()).count() as u64;
                self.coordinator.with_stats(|stats| {
                    stats.batches += 1;
                    stats.queries_sent += queries;
                    stats.invalid_readings += invalid;
                });
                readings.extend(results);
                Ok(readings)
            }
            Err(e) => {
                self.coordinator.with_stats(|stats| {
                    stats.batches += 1;
                    stats.failed_batches += 1;
                });
                error!("poll of {} attributes failed: {}", queries, e);
                Err(e)
            }
        }
    }

    // the request is a set: repeated names are answered once
    fn wanted(&self) -> Result<Vec<LogicalAttribute>, Error> {
        let mut wanted: Vec<LogicalAttribute> = Vec::with_capacity(self.attributes.len());
        for attribute in &self.attributes {
            self.coordinator.attributes().check(*attribute)?;
            if !wanted.contains(attribute) {
                wanted.push(*attribute);
            }
        }
        Ok(wanted)
    }

    fn collect_fresh(
        &self,
        wanted: &[LogicalAttribute],
        readings: &mut HashMap<LogicalAttribute, Reading>,
    ) -> Vec<LogicalAttribute> {
        let cache = self.coordinator.cache();
        let validity = self.coordinator.validity();
        let mut stale = Vec::new();

        for attribute in wanted {
            match cache.get(*attribute, self.now, validity) {
                Lookup::Fresh { reading, .. } => {
                    self.coordinator.with_stats(|stats| stats.cache_hits += 1);
                    readings.insert(*attribute, reading);
                }
                Lookup::Stale => stale.push(*attribute),
            }
        }

        stale
    }
}
