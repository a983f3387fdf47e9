pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};

pub use tokio::sync::broadcast;

pub use crate::channels::Channels;
pub use crate::config::{self, Config};
pub use crate::coordinator::{self, Coordinator, DeviceState};
pub use crate::cryocon::{
    self,
    attribute::{AttributeMap, LogicalAttribute, Reading, Value},
};
pub use crate::options::Options;
pub use crate::value_cache::{self, ValueCache};
