use crate::prelude::*;
use crate::scheduler;

#[derive(Debug, Clone)]
pub struct Channels {
    pub from_scheduler: broadcast::Sender<scheduler::ChannelData>,
    pub to_scheduler: broadcast::Sender<scheduler::ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            from_scheduler: Self::channel(),
            to_scheduler: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(256).0
    }
}
