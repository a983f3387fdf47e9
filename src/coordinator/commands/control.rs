use crate::prelude::*;
use crate::coordinator::dispatcher::Dispatcher;
use crate::error::Error;

use super::write_attribute::set_and_refresh;

/// Switch all control loops on or off.
pub struct SetControl {
    coordinator: Coordinator,
    enable: bool,
}

impl SetControl {
    pub fn new(coordinator: Coordinator, enable: bool) -> Self {
        Self {
            coordinator,
            enable,
        }
    }

    pub async fn run(&self) -> Result<(), Error> {
        let wanted = Value::Flag(self.enable);
        let reading =
            set_and_refresh(&self.coordinator, LogicalAttribute::Control, &wanted).await?;

        // the controller refuses to engage with e.g. an open sensor on a loop input
        if reading != Reading::Valid(wanted.clone()) {
            let (entity, field) = LogicalAttribute::Control.target();
            let command = self
                .coordinator
                .dispatcher()
                .codec()
                .render_set(entity, field, &wanted)?;
            return Err(Error::ProtocolFault {
                command,
                reply: format!("{:?}", reading),
            });
        }

        info!("control is {}", wanted);
        Ok(())
    }
}

pub struct LockFrontPanel {
    dispatcher: Dispatcher,
    locked: bool,
}

impl LockFrontPanel {
    pub fn new(dispatcher: Dispatcher, locked: bool) -> Self {
        Self { dispatcher, locked }
    }

    pub async fn run(&self) -> Result<(), Error> {
        let command = self.dispatcher.codec().render_front_panel_lock(self.locked);
        let reply = self.dispatcher.exchange(&command).await?;

        if self.dispatcher.codec().is_fault(&reply) {
            return Err(Error::ProtocolFault { command, reply });
        }

        info!(
            "front panel {}",
            if self.locked { "locked" } else { "unlocked" }
        );
        Ok(())
    }
}
