use crate::prelude::*;

pub mod commands;
pub mod dispatcher;

use crate::cryocon::codec::{CommandCodec, CryoconCodec};
use crate::cryocon::transport::Transport;
use crate::error::Error;
use dispatcher::Dispatcher;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// DeviceState {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Running,
    Stopped,
    Faulted,
}

impl DeviceState {
    /// Derive the state from the last control-flag read. A transport error
    /// or an unreadable flag is a fault, never "off".
    pub fn derive(control: &Result<Reading, Error>) -> Self {
        match control {
            Ok(Reading::Valid(Value::Flag(true))) => DeviceState::Running,
            Ok(Reading::Valid(Value::Flag(false))) => DeviceState::Stopped,
            Ok(_) | Err(_) => DeviceState::Faulted,
        }
    }

    pub fn status(control: &Result<Reading, Error>) -> String {
        match control {
            Ok(Reading::Valid(Value::Flag(on))) => {
                format!("Connected. Control is {}", if *on { "On" } else { "Off" })
            }
            Ok(Reading::Valid(other)) => format!("Error: unexpected control value {:?}", other),
            Ok(Reading::Invalid { raw }) => format!("Error: invalid control reply {:?}", raw),
            Err(err) => format!("Error: {}", err),
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Running => write!(f, "RUNNING"),
            DeviceState::Stopped => write!(f, "STOPPED"),
            DeviceState::Faulted => write!(f, "FAULT"),
        }
    }
} // }}}

/// Result of one poll cycle as seen by the outside world. Never an error: a
/// failed batch shows up as a faulted state with no readings.
#[derive(Clone, Debug, Serialize)]
pub struct PollCycle {
    pub time: chrono::DateTime<chrono::Utc>,
    pub state: DeviceState,
    pub status: String,
    pub readings: HashMap<LogicalAttribute, Reading>,
    pub error: Option<String>,
}

#[derive(Default, Debug)]
pub struct PollStats {
    pub batches: u64,
    pub failed_batches: u64,
    pub queries_sent: u64,
    pub cache_hits: u64,
    pub invalid_readings: u64,
    pub writes: u64,
    pub failed_writes: u64,
    pub reconnects: u64,
}

impl PollStats {
    pub fn print_summary(&self) {
        info!("Poll Statistics:");
        info!("  Batches: {} ({} failed)", self.batches, self.failed_batches);
        info!("  Queries sent: {}", self.queries_sent);
        info!("  Cache hits: {}", self.cache_hits);
        info!("  Invalid readings: {}", self.invalid_readings);
        info!("  Writes: {} ({} failed)", self.writes, self.failed_writes);
        info!("  Reconnects: {}", self.reconnects);
    }
}

#[derive(Clone)]
pub struct Coordinator {
    attributes: AttributeMap,
    dispatcher: Dispatcher,
    validity: Duration,
    auto_lock_front_panel: bool,
    pub stats: Arc<Mutex<PollStats>>,
}

impl Coordinator {
    pub fn new(
        attributes: AttributeMap,
        dispatcher: Dispatcher,
        validity: Duration,
        auto_lock_front_panel: bool,
    ) -> Self {
        Self {
            attributes,
            dispatcher,
            validity,
            auto_lock_front_panel,
            stats: Arc::new(Mutex::new(PollStats::default())),
        }
    }

    /// Wire up the Cryo-con codec and a fresh cache around `transport`.
    pub fn from_config(config: &Config, transport: Box<dyn Transport>) -> Self {
        let codec: Arc<dyn CommandCodec> = Arc::new(CryoconCodec::new());
        let dispatcher = Dispatcher::new(transport, codec, ValueCache::new(), config.timeout());

        Self::new(
            config.attribute_map(),
            dispatcher,
            config.read_validity_period(),
            config.auto_lock_front_panel(),
        )
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn cache(&self) -> &ValueCache {
        self.dispatcher.cache()
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    pub fn resolve(&self, name: &str) -> Result<LogicalAttribute, Error> {
        self.attributes.resolve(name)
    }

    /// Per-connection set-up, run after every (re)connect.
    pub async fn init(&self) -> Result<(), Error> {
        if self.auto_lock_front_panel {
            commands::control::LockFrontPanel::new(self.dispatcher.clone(), true)
                .run()
                .await?;
        }
        Ok(())
    }

    pub async fn reconnect(&self) -> Result<(), Error> {
        self.dispatcher.reconnect().await?;
        self.with_stats(|stats| stats.reconnects += 1);
        self.init().await
    }

    pub async fn stop(&self) {
        if let Err(e) = self.dispatcher.close().await {
            warn!("error closing connection: {}", e);
        }
        if let Ok(stats) = self.stats.lock() {
            stats.print_summary();
        }
    }

    pub async fn poll_attributes(
        &self,
        attributes: &[LogicalAttribute],
        now: Instant,
    ) -> Result<HashMap<LogicalAttribute, Reading>, Error> {
        commands::poll_attributes::PollAttributes::new(self.clone(), attributes.to_vec(), now)
            .run()
            .await
    }

    /// Poll `attributes` together with the control flag and fold any
    /// transport failure into a faulted state.
    pub async fn poll_cycle(&self, attributes: &[LogicalAttribute], now: Instant) -> PollCycle {
        let mut wanted = attributes.to_vec();
        wanted.push(LogicalAttribute::Control);

        let time = chrono::Utc::now();
        match self.poll_attributes(&wanted, now).await {
            Ok(readings) => {
                let control = readings
                    .get(&LogicalAttribute::Control)
                    .cloned()
                    .ok_or_else(|| Error::Connection("control flag missing from batch".to_string()));
                PollCycle {
                    time,
                    state: DeviceState::derive(&control),
                    status: DeviceState::status(&control),
                    readings,
                    error: None,
                }
            }
            Err(e) => {
                let control: Result<Reading, Error> = Err(e.clone());
                PollCycle {
                    time,
                    state: DeviceState::derive(&control),
                    status: DeviceState::status(&control),
                    readings: HashMap::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn read_control(&self, now: Instant) -> Result<Reading, Error> {
        let mut readings = self
            .poll_attributes(&[LogicalAttribute::Control], now)
            .await?;
        readings
            .remove(&LogicalAttribute::Control)
            .ok_or_else(|| Error::Connection("control flag missing from batch".to_string()))
    }

    pub async fn device_state(&self, now: Instant) -> DeviceState {
        DeviceState::derive(&self.read_control(now).await)
    }

    pub async fn status(&self, now: Instant) -> String {
        DeviceState::status(&self.read_control(now).await)
    }

    pub async fn write_attribute(
        &self,
        attribute: LogicalAttribute,
        value: Value,
    ) -> Result<Reading, Error> {
        commands::write_attribute::WriteAttribute::new(self.clone(), attribute, value)
            .run()
            .await
    }

    pub async fn on(&self) -> Result<(), Error> {
        commands::control::SetControl::new(self.clone(), true).run().await
    }

    pub async fn off(&self) -> Result<(), Error> {
        commands::control::SetControl::new(self.clone(), false).run().await
    }

    /// Raw query passthrough, serialised with everything else.
    pub async fn run(&self, command: &str) -> Result<String, Error> {
        commands::raw_query::RawQuery::new(self.dispatcher.clone(), command)
            .run()
            .await
    }

    pub(crate) fn with_stats<F>(&self, f: F)
    where
        F: FnOnce(&mut PollStats),
    {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        } else {
            warn!("failed to lock stats mutex");
        }
    }
}
