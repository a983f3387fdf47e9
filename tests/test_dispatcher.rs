mod common;
use common::*;
use cryocon_bridge::coordinator::dispatcher::{BatchState, PendingSlot};
use cryocon_bridge::error::Error;
use cryocon_bridge::prelude::*;

use std::time::Instant;

#[tokio::test]
async fn batch_is_sent_as_one_burst_and_bound_in_order() -> Result<()> {
    common_setup();

    let (transport, handle) = mock();
    handle
        .reply("INPUT A:TEMP?", "4.200K")
        .reply("INPUT B:TEMP?", "4.200K")
        .reply("INPUT C:TEMP?", "77.350K");
    let dispatcher = dispatcher(transport);

    let mut batch = dispatcher.begin_batch().await?;
    assert_eq!(batch.state(), BatchState::Batching);
    assert_eq!(batch.enqueue(attr("channelc")), PendingSlot(0));
    assert_eq!(batch.enqueue(attr("channela")), PendingSlot(1));
    assert_eq!(batch.enqueue(attr("channelb")), PendingSlot(2));

    let now = Instant::now();
    let results = batch.commit(now).await?;

    // identical reply text must not confuse the binding
    assert_eq!(
        results,
        vec![
            (attr("channelc"), float(77.35)),
            (attr("channela"), float(4.2)),
            (attr("channelb"), float(4.2)),
        ]
    );
    assert_eq!(
        handle.sent(),
        vec!["INPUT C:TEMP?", "INPUT A:TEMP?", "INPUT B:TEMP?"]
    );

    let entry = dispatcher.cache().entry(attr("channelc")).unwrap();
    assert_eq!(entry.reading, float(77.35));
    assert_eq!(entry.timestamp, now);

    Ok(())
}

#[tokio::test]
async fn duplicates_in_a_batch_are_answered_individually() -> Result<()> {
    common_setup();

    let (transport, handle) = mock();
    handle.reply("LOOP 2:SETPT?", "10.000K");
    let dispatcher = dispatcher(transport);

    let mut batch = dispatcher.begin_batch().await?;
    batch.enqueue(attr("loop2setpoint"));
    batch.enqueue(attr("loop2setpoint"));
    let results = batch.commit(Instant::now()).await?;

    assert_eq!(results.len(), 2);
    assert_eq!(handle.sent().len(), 2);

    Ok(())
}

#[tokio::test]
async fn empty_batch_sends_nothing() -> Result<()> {
    common_setup();

    let (transport, handle) = mock();
    let dispatcher = dispatcher(transport);

    let batch = dispatcher.begin_batch().await?;
    assert!(batch.is_empty());
    assert!(batch.commit(Instant::now()).await?.is_empty());
    assert!(handle.events().is_empty());

    Ok(())
}

#[tokio::test]
async fn dropped_batch_sends_nothing_and_releases_the_channel() -> Result<()> {
    common_setup();

    let (transport, handle) = mock();
    handle.reply("CONTROL?", "OFF");
    let dispatcher = dispatcher(transport);

    {
        let mut batch = dispatcher.begin_batch().await?;
        batch.enqueue(attr("control"));
    }
    assert!(handle.events().is_empty());

    assert_eq!(dispatcher.exchange("CONTROL?").await?, "OFF");

    Ok(())
}

#[tokio::test]
async fn timeout_desynchronizes_until_reconnect() -> Result<()> {
    common_setup();

    let (transport, handle) = mock();
    handle
        .reply("INPUT A:TEMP?", "4.2K")
        .silence("INPUT B:TEMP?");
    let dispatcher = dispatcher(transport);

    let mut batch = dispatcher.begin_batch().await?;
    batch.enqueue(attr("channela"));
    batch.enqueue(attr("channelb"));
    assert_eq!(
        batch.commit(Instant::now()).await,
        Err(Error::Timeout(TIMEOUT))
    );

    // nothing from the failed batch is published
    assert!(dispatcher.cache().is_empty());
    assert!(dispatcher.is_desynchronized().await);

    assert!(matches!(
        dispatcher.begin_batch().await.map(|_| ()),
        Err(Error::Desynchronized)
    ));
    assert_eq!(
        dispatcher.exchange("INPUT A:TEMP?").await,
        Err(Error::Desynchronized)
    );

    dispatcher.reconnect().await?;
    assert!(!dispatcher.is_desynchronized().await);
    assert_eq!(dispatcher.exchange("INPUT A:TEMP?").await?, "4.2K");
    assert!(handle.events().contains(&Event::Reconnected));

    Ok(())
}

#[tokio::test]
async fn failed_exchange_desynchronizes() -> Result<()> {
    common_setup();

    let (transport, handle) = mock();
    handle.silence("*IDN?");
    let dispatcher = dispatcher(transport);

    assert_eq!(
        dispatcher.exchange("*IDN?").await,
        Err(Error::Timeout(TIMEOUT))
    );
    assert!(dispatcher.is_desynchronized().await);

    Ok(())
}

#[tokio::test]
async fn close_reaches_the_transport() -> Result<()> {
    common_setup();

    let (transport, handle) = mock();
    let dispatcher = dispatcher(transport);

    dispatcher.close().await?;
    assert_eq!(handle.events(), vec![Event::Closed]);

    Ok(())
}

#[tokio::test]
async fn cancelled_commit_desynchronizes() -> Result<()> {
    common_setup();

    let (transport, handle) = mock();
    handle
        .reply("INPUT A:TEMP?", "4.2K")
        .reply("INPUT B:TEMP?", "77.3K");
    let dispatcher = dispatcher(transport);

    {
        let mut commit = Box::pin(async {
            let mut batch = dispatcher.begin_batch().await?;
            batch.enqueue(attr("channela"));
            batch.enqueue(attr("channelb"));
            batch.commit(Instant::now()).await
        });
        assert!(futures::poll!(commit.as_mut()).is_pending());
    }

    // the burst went out but nobody read the replies
    assert_eq!(handle.sent().len(), 2);
    assert!(dispatcher.is_desynchronized().await);
    assert!(matches!(
        dispatcher.begin_batch().await.map(|_| ()),
        Err(Error::Desynchronized)
    ));

    dispatcher.reconnect().await?;
    let mut batch = dispatcher.begin_batch().await?;
    batch.enqueue(attr("channelb"));
    assert_eq!(
        batch.commit(Instant::now()).await?,
        vec![(attr("channelb"), float(77.3))]
    );

    Ok(())
}

#[tokio::test]
async fn cancelled_exchange_desynchronizes() -> Result<()> {
    common_setup();

    let (transport, handle) = mock();
    handle.reply("*IDN?", "Cryo-con,24C,204467,1.09G");
    let dispatcher = dispatcher(transport);

    {
        let mut exchange = Box::pin(dispatcher.exchange("*IDN?"));
        assert!(futures::poll!(exchange.as_mut()).is_pending());
    }

    assert_eq!(handle.sent(), vec!["*IDN?"]);
    assert!(dispatcher.is_desynchronized().await);
    assert_eq!(
        dispatcher.exchange("*IDN?").await,
        Err(Error::Desynchronized)
    );

    Ok(())
}

#[tokio::test]
async fn dropping_an_unsent_batch_keeps_the_channel_usable() -> Result<()> {
    common_setup();

    let (transport, _handle) = mock();
    let dispatcher = dispatcher(transport);

    let mut batch = dispatcher.begin_batch().await?;
    batch.enqueue(attr("channela"));
    drop(batch);

    assert!(!dispatcher.is_desynchronized().await);

    Ok(())
}
