use crate::prelude::*;
use crate::error::Error;

use std::time::Instant;

pub struct WriteAttribute {
    coordinator: Coordinator,
    attribute: LogicalAttribute,
    value: Value,
}

impl WriteAttribute {
    pub fn new(coordinator: Coordinator, attribute: LogicalAttribute, value: Value) -> Self {
        Self {
            coordinator,
            attribute,
            value,
        }
    }

    /// Returns the value the instrument reports after applying the write.
    pub async fn run(&self) -> Result<Reading, Error> {
        if !self.attribute.is_writable() {
            return Err(Error::ReadOnly(self.attribute.to_string()));
        }
        self.coordinator.attributes().check(self.attribute)?;

        set_and_refresh(&self.coordinator, self.attribute, &self.value).await
    }
}

/// One immediate set-then-query exchange outside any batch. Only the written
/// attribute's cache entry is touched: refreshed with the read-back on
/// success, dropped when the outcome is unknown.
pub(crate) async fn set_and_refresh(
    coordinator: &Coordinator,
    attribute: LogicalAttribute,
    value: &Value,
) -> Result<Reading, Error> {
    let dispatcher = coordinator.dispatcher();
    let (entity, field) = attribute.target();
    let command = dispatcher.codec().render_set(entity, field, value)?;

    info!("setting {} to {}", attribute, value);

    let result = match dispatcher.exchange(&command).await {
        Ok(reply) => dispatcher.codec().parse_ack(&command, field, &reply),
        Err(e) => Err(e),
    };

    match result {
        Ok(reading) => {
            coordinator.cache().put(attribute, reading.clone(), Instant::now());
            coordinator.with_stats(|stats| stats.writes += 1);
            Ok(reading)
        }
        Err(e) => {
            coordinator.cache().invalidate(attribute);
            coordinator.with_stats(|stats| {
                stats.writes += 1;
                stats.failed_writes += 1;
            });
            error!("failed to set {} to {}: {}", attribute, value, e);
            Err(e)
        }
    }
}
