use crate::prelude::*;
use crate::cryocon::codec::CommandCodec;
use crate::cryocon::transport::Transport;
use crate::error::Error;

use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
    Batching,
    Sending,
    AwaitingReplies,
    Completed,
    Failed,
}

/// Position of an enqueued read in the committed result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingSlot(pub usize);

struct Channel {
    transport: Box<dyn Transport>,
    desynchronized: bool,
}

/// Owns the instrument connection and serialises every exchange on it.
///
/// The protocol carries no request ids, so replies are matched purely by
/// position. At most one batch or write holds the connection at a time and
/// after any transport failure the connection is refused until
/// [`Dispatcher::reconnect`] has reset it.
#[derive(Clone)]
pub struct Dispatcher {
    channel: Arc<Mutex<Channel>>,
    codec: Arc<dyn CommandCodec>,
    cache: ValueCache,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        transport: Box<dyn Transport>,
        codec: Arc<dyn CommandCodec>,
        cache: ValueCache,
        timeout: Duration,
    ) -> Self {
        Self {
            channel: Arc::new(Mutex::new(Channel {
                transport,
                desynchronized: false,
            })),
            codec,
            cache,
            timeout,
        }
    }

    pub fn codec(&self) -> &dyn CommandCodec {
        self.codec.as_ref()
    }

    pub fn cache(&self) -> &ValueCache {
        &self.cache
    }

    /// Waits for exclusive use of the connection.
    pub async fn begin_batch(&self) -> Result<Batch<'_>, Error> {
        let channel = self.acquire().await?;
        debug!("batch started");

        Ok(Batch {
            dispatcher: self,
            channel,
            queries: Vec::new(),
            state: BatchState::Batching,
        })
    }

    /// One immediate request/response pair, outside any batch.
    pub async fn exchange(&self, command: &str) -> Result<String, Error> {
        let mut channel = self.acquire().await?;

        trace!("TX {:?}", command);
        let mut frame = BytesMut::with_capacity(command.len() + 1);
        frame.put_slice(command.as_bytes());
        frame.put_u8(b'\n');

        // stays set if this future is dropped with the reply still in flight
        channel.desynchronized = true;

        let result = match channel.transport.send(&frame).await {
            Ok(()) => channel.transport.receive_line(self.timeout).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(reply) => {
                trace!("RX {:?}", reply);
                channel.desynchronized = false;
                Ok(reply)
            }
            Err(e) => {
                Self::desynchronize(&mut channel, &e);
                Err(e)
            }
        }
    }

    pub async fn reconnect(&self) -> Result<(), Error> {
        let mut channel = self.channel.lock().await;
        channel.transport.reconnect().await?;
        channel.desynchronized = false;
        info!("connection reset, accepting requests again");
        Ok(())
    }

    pub async fn close(&self) -> Result<(), Error> {
        self.channel.lock().await.transport.close().await
    }

    pub async fn is_desynchronized(&self) -> bool {
        self.channel.lock().await.desynchronized
    }

    async fn acquire(&self) -> Result<MutexGuard<'_, Channel>, Error> {
        let channel = self.channel.lock().await;
        if channel.desynchronized {
            return Err(Error::Desynchronized);
        }
        Ok(channel)
    }

    fn desynchronize(channel: &mut Channel, cause: &Error) {
        warn!("{}, connection needs to be reset", cause);
        channel.desynchronized = true;
    }
}

/// An open batch. Holds the connection until committed or dropped; dropping
/// without committing sends nothing. Cancelling a commit once sending has
/// started marks the connection desynchronized.
pub struct Batch<'a> {
    dispatcher: &'a Dispatcher,
    channel: MutexGuard<'a, Channel>,
    queries: Vec<(LogicalAttribute, String)>,
    state: BatchState,
}

impl<'a> Batch<'a> {
    /// Queue a read. Duplicates are sent and answered individually.
    pub fn enqueue(&mut self, attribute: LogicalAttribute) -> PendingSlot {
        let (entity, field) = attribute.target();
        let query = self.dispatcher.codec.render_query(entity, field);
        self.queries.push((attribute, query));
        PendingSlot(self.queries.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Send every query as one burst and read one reply per query.
    ///
    /// Replies come back in enqueue order. On success the whole batch is
    /// published to the cache stamped with `now`; on failure nothing is.
    pub async fn commit(mut self, now: Instant) -> Result<Vec<(LogicalAttribute, Reading)>, Error> {
        if self.queries.is_empty() {
            self.transition(BatchState::Completed);
            return Ok(Vec::new());
        }

        match self.transmit().await {
            Ok(replies) => {
                let results = self.bind(replies);
                self.dispatcher.cache.put_all(results.iter().cloned(), now);
                self.transition(BatchState::Completed);
                Ok(results)
            }
            Err(e) => {
                self.transition(BatchState::Failed);
                Dispatcher::desynchronize(&mut self.channel, &e);
                Err(e)
            }
        }
    }

    async fn transmit(&mut self) -> Result<Vec<String>, Error> {
        self.transition(BatchState::Sending);

        let size = self.queries.iter().map(|(_, q)| q.len() + 1).sum();
        let mut burst = BytesMut::with_capacity(size);
        for (_, query) in &self.queries {
            trace!("TX {:?}", query);
            burst.put_slice(query.as_bytes());
            burst.put_u8(b'\n');
        }
        self.channel.transport.send(&burst).await?;

        self.transition(BatchState::AwaitingReplies);

        let timeout = self.dispatcher.timeout;
        let deadline = Instant::now() + timeout;
        let mut replies = Vec::with_capacity(self.queries.len());
        while replies.len() < self.queries.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let reply = match self.channel.transport.receive_line(remaining).await {
                // report the configured round trip rather than what was left of it
                Err(Error::Timeout(_)) => return Err(Error::Timeout(timeout)),
                other => other?,
            };
            trace!("RX {:?}", reply);
            replies.push(reply);
        }

        Ok(replies)
    }

    fn bind(&self, replies: Vec<String>) -> Vec<(LogicalAttribute, Reading)> {
        self.queries
            .iter()
            .zip(replies)
            .map(|((attribute, query), raw)| {
                let reading = self.dispatcher.codec.parse_reply(attribute.field(), &raw);
                if !reading.is_valid() {
                    warn!("{} ({}) returned invalid reading {:?}", attribute, query, raw);
                }
                (*attribute, reading)
            })
            .collect()
    }

    fn transition(&mut self, state: BatchState) {
        debug!(
            "batch of {} {:?} -> {:?}",
            self.queries.len(),
            self.state,
            state
        );
        self.state = state;
    }
}

impl Drop for Batch<'_> {
    // a commit abandoned after the burst went out leaves replies unread
    fn drop(&mut self) {
        if matches!(self.state, BatchState::Sending | BatchState::AwaitingReplies) {
            warn!(
                "batch of {} dropped while {:?}, connection needs to be reset",
                self.queries.len(),
                self.state
            );
            self.channel.desynchronized = true;
        }
    }
}
