use crate::prelude::*;
use crate::coordinator::dispatcher::Dispatcher;
use crate::error::Error;

/// Send an arbitrary query and hand back the reply line untouched.
pub struct RawQuery {
    dispatcher: Dispatcher,
    command: String,
}

impl RawQuery {
    pub fn new(dispatcher: Dispatcher, command: &str) -> Self {
        Self {
            dispatcher,
            command: command.trim().to_string(),
        }
    }

    pub async fn run(&self) -> Result<String, Error> {
        // a bare command gets no reply and would leave us waiting for one
        if !self.command.contains('?') {
            return Err(Error::InvalidValue {
                attribute: "run".to_string(),
                reason: format!("{:?} is not a query", self.command),
            });
        }

        debug!("raw query {:?}", self.command);
        self.dispatcher.exchange(&self.command).await
    }
}
