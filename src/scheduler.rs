use crate::prelude::*;
use crate::coordinator::PollCycle;

use std::time::Instant;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone)]
pub enum ChannelData {
    Poll(PollCycle),
    Shutdown,
}

/// Polls the configured attributes every `poll_interval` and publishes each
/// cycle on `channels.from_scheduler`.
#[derive(Clone)]
pub struct Scheduler {
    config: Config,
    coordinator: Coordinator,
    channels: Channels,
}

impl Scheduler {
    pub fn new(config: Config, coordinator: Coordinator, channels: Channels) -> Self {
        Self {
            config,
            coordinator,
            channels,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let attributes = self.config.polled_attributes();
        let mut shutdown = self.channels.to_scheduler.subscribe();
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "scheduler polling {} attributes every {:?}",
            attributes.len(),
            self.config.poll_interval()
        );

        loop {
            // a pending shutdown wins over an overdue tick
            tokio::select! {
                biased;
                msg = shutdown.recv() => {
                    match msg {
                        Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
                        _ => continue,
                    }
                }
                _ = interval.tick() => {
                    self.tick(&attributes).await;
                }
            }
        }

        info!("scheduler exiting");
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.to_scheduler.send(ChannelData::Shutdown);
    }

    /// One poll cycle. Failures end up in the published state, never here.
    pub async fn tick(&self, attributes: &[LogicalAttribute]) -> PollCycle {
        if self.coordinator.dispatcher().is_desynchronized().await {
            match self.coordinator.reconnect().await {
                Ok(()) => info!("reconnected to instrument"),
                Err(e) => warn!("reconnect failed: {}", e),
            }
        }

        let cycle = self.coordinator.poll_cycle(attributes, Instant::now()).await;
        match cycle.state {
            DeviceState::Faulted => warn!("state {}: {}", cycle.state, cycle.status),
            _ => debug!("state {}: {}", cycle.state, cycle.status),
        }

        // nobody listening is fine
        let _ = self
            .channels
            .from_scheduler
            .send(ChannelData::Poll(cycle.clone()));

        cycle
    }
}
