#![allow(dead_code)]

use cryocon_bridge::coordinator::dispatcher::Dispatcher;
use cryocon_bridge::cryocon::attribute::{ChannelId, LoopId};
use cryocon_bridge::cryocon::codec::CryoconCodec;
use cryocon_bridge::cryocon::transport::Transport;
use cryocon_bridge::error::Error;
use cryocon_bridge::prelude::*;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_millis(50);
pub const VALIDITY: Duration = Duration::from_millis(100);

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Sent(String),
    Received(String),
    Reconnected,
    Closed,
}

#[derive(Default)]
struct State {
    replies: HashMap<String, String>,
    silent: HashSet<String>,
    pending: VecDeque<String>,
    events: Vec<Event>,
    delivered: usize,
    disconnect_after: Option<usize>,
    overlapping_sends: usize,
}

/// Scripted instrument. Every line sent is answered from a query -> reply
/// table, unknown lines get "NAK" and silenced lines get nothing.
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

/// Test-side view of a [`MockTransport`] that has been moved into a
/// dispatcher.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<State>>,
}

pub fn mock() -> (MockTransport, MockHandle) {
    let state = Arc::new(Mutex::new(State::default()));
    (
        MockTransport {
            state: state.clone(),
        },
        MockHandle { state },
    )
}

impl MockHandle {
    pub fn reply(&self, query: &str, reply: &str) -> &Self {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert(query.to_string(), reply.to_string());
        self
    }

    /// Accept `query` but never answer it.
    pub fn silence(&self, query: &str) -> &Self {
        self.state.lock().unwrap().silent.insert(query.to_string());
        self
    }

    /// Drop the connection once `count` more reply lines have been read.
    pub fn disconnect_after(&self, count: usize) -> &Self {
        let mut state = self.state.lock().unwrap();
        state.disconnect_after = Some(state.delivered + count);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Sent(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    pub fn clear_events(&self) {
        self.state.lock().unwrap().events.clear();
    }

    /// Lines written while replies to an earlier write were still unread.
    pub fn overlapping_sends(&self) -> usize {
        self.state.lock().unwrap().overlapping_sends
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
        {
            let mut state = self.state.lock().unwrap();
            if !state.pending.is_empty() {
                state.overlapping_sends += 1;
            }

            let text = String::from_utf8_lossy(bytes).to_string();
            for line in text.split('\n').filter(|l| !l.is_empty()) {
                state.events.push(Event::Sent(line.to_string()));
                if state.silent.contains(line) {
                    continue;
                }
                let reply = state
                    .replies
                    .get(line)
                    .cloned()
                    .unwrap_or_else(|| "NAK".to_string());
                state.pending.push_back(reply);
            }
        }

        tokio::task::yield_now().await;
        Ok(())
    }

    async fn receive_line(&mut self, timeout: Duration) -> Result<String, Error> {
        tokio::task::yield_now().await;

        let next = {
            let mut state = self.state.lock().unwrap();
            if state.disconnect_after.map_or(false, |n| state.delivered >= n) {
                return Err(Error::Connection("connection reset by peer".to_string()));
            }
            let next = state.pending.pop_front();
            if let Some(line) = &next {
                state.delivered += 1;
                state.events.push(Event::Received(line.clone()));
            }
            next
        };

        match next {
            Some(line) => Ok(line),
            None => {
                tokio::time::sleep(timeout).await;
                Err(Error::Timeout(timeout))
            }
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.state.lock().unwrap().events.push(Event::Closed);
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.pending.clear();
        state.disconnect_after = None;
        state.events.push(Event::Reconnected);
        Ok(())
    }
}

pub fn dispatcher(transport: MockTransport) -> Dispatcher {
    Dispatcher::new(
        Box::new(transport),
        Arc::new(CryoconCodec::new()),
        ValueCache::new(),
        TIMEOUT,
    )
}

/// Coordinator over a mock with every channel and loop configured.
pub fn coordinator() -> (Coordinator, MockHandle) {
    let (transport, handle) = mock();
    let coordinator = Coordinator::new(
        AttributeMap::new(&ChannelId::ALL, &LoopId::ALL),
        dispatcher(transport),
        VALIDITY,
        false,
    );
    (coordinator, handle)
}

pub fn attr(name: &str) -> LogicalAttribute {
    name.parse().unwrap()
}

pub fn float(v: f64) -> Reading {
    Reading::Valid(Value::Float(v))
}
