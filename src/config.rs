use crate::prelude::*;
use crate::cryocon::attribute::{ChannelId, LoopId};
use crate::cryocon::transport::Address;

use serde::{Deserialize, Deserializer};
use serde_with::{formats::Flexible, serde_as, DurationSecondsWithFrac};
use std::time::Duration;

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// `tcp://host[:port]`
    pub address: String,

    #[serde_as(as = "Option<DurationSecondsWithFrac<f64, Flexible>>")]
    pub connection_timeout: Option<Duration>,
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64, Flexible>>")]
    pub timeout: Option<Duration>,

    #[serde(
        default = "Config::default_used_channels",
        deserialize_with = "de_channels"
    )]
    pub used_channels: Vec<ChannelId>,
    #[serde(default = "Config::default_used_loops", deserialize_with = "de_loops")]
    pub used_loops: Vec<LoopId>,

    #[serde_as(as = "Option<DurationSecondsWithFrac<f64, Flexible>>")]
    pub read_validity_period: Option<Duration>,

    #[serde(default)]
    pub auto_lock_front_panel: bool,

    #[serde_as(as = "Option<DurationSecondsWithFrac<f64, Flexible>>")]
    pub poll_interval: Option<Duration>,

    /// Attributes polled every cycle; empty means everything configured.
    #[serde(default = "Vec::new")]
    pub attributes: Vec<LogicalAttribute>,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        let config = Self::from_yaml(&content)?;

        info!("Configuration loaded successfully:");
        info!("  Address: {}", config.address);
        info!("  Connection Timeout: {:?}", config.connection_timeout());
        info!("  Timeout: {:?}", config.timeout());
        info!(
            "  Used Channels: {}",
            config.used_channels.iter().map(|c| c.letter()).collect::<String>()
        );
        info!(
            "  Used Loops: {:?}",
            config.used_loops.iter().map(|l| l.number()).collect::<Vec<_>>()
        );
        info!("  Read Validity Period: {:?}", config.read_validity_period());
        info!("  Auto Lock Front Panel: {}", config.auto_lock_front_panel);
        info!("  Poll Interval: {:?}", config.poll_interval());
        info!("  Polled Attributes: {}", config.polled_attributes().len());
        info!("  Log Level: {}", config.loglevel);

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.address()?;

        if self.connection_timeout().is_zero() {
            bail!("connection_timeout must be greater than zero");
        }
        if self.timeout().is_zero() {
            bail!("timeout must be greater than zero");
        }
        if self.poll_interval().is_zero() {
            bail!("poll_interval must be greater than zero");
        }

        let map = self.attribute_map();
        for attribute in &self.attributes {
            if let Err(e) = map.check(*attribute) {
                bail!("attributes: {}", e);
            }
        }

        Ok(())
    }

    pub fn address(&self) -> Result<Address> {
        self.address.parse()
    }

    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
            .unwrap_or(Duration::from_millis(200))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(Duration::from_millis(200))
    }

    pub fn read_validity_period(&self) -> Duration {
        self.read_validity_period
            .unwrap_or(Duration::from_millis(100))
    }

    pub fn auto_lock_front_panel(&self) -> bool {
        self.auto_lock_front_panel
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval.unwrap_or(Duration::from_secs(1))
    }

    pub fn loglevel(&self) -> &str {
        &self.loglevel
    }

    pub fn attribute_map(&self) -> AttributeMap {
        AttributeMap::new(&self.used_channels, &self.used_loops)
    }

    pub fn polled_attributes(&self) -> Vec<LogicalAttribute> {
        if self.attributes.is_empty() {
            self.attribute_map().all()
        } else {
            self.attributes.clone()
        }
    }

    fn default_used_channels() -> Vec<ChannelId> {
        ChannelId::ALL.to_vec()
    }

    fn default_used_loops() -> Vec<LoopId> {
        LoopId::ALL.to_vec()
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

// "ABCD", "A, C" and [A, C] are all accepted
fn de_channels<'de, D>(deserializer: D) -> Result<Vec<ChannelId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Channels {
        Joined(String),
        List(Vec<String>),
    }

    let letters: String = match Channels::deserialize(deserializer)? {
        Channels::Joined(s) => s,
        Channels::List(list) => list.concat(),
    };

    letters
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .map(|c| {
            ChannelId::try_from(c)
                .map_err(|_| serde::de::Error::custom(format!("unknown channel {:?}", c)))
        })
        .collect()
}

fn de_loops<'de, D>(deserializer: D) -> Result<Vec<LoopId>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<u8>::deserialize(deserializer)?
        .into_iter()
        .map(|n| {
            LoopId::try_from(n).map_err(|_| serde::de::Error::custom(format!("unknown loop {}", n)))
        })
        .collect()
}
