use correlator::library::communication::broker::{Channel, ConfirmEvent, Message};
use correlator::library::communication::confirm::{
    ConfirmError, ConfirmState, ConfirmedPublisher, ForwardNacks, PublishStrategy,
};
use correlator::library::communication::implementation::memory::{
    ConfirmMode, MemoryBroker, MemoryChannel,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const QUEUE: &str = "confirmed";

fn messages(count: usize) -> impl Iterator<Item = Message> {
    (0..count).map(|i| Message::new(i.to_string()))
}

async fn channel(
    broker: &MemoryBroker,
    mode: ConfirmMode,
    max_length: Option<usize>,
) -> Arc<MemoryChannel> {
    let channel = broker.channel().with_confirm_mode(mode);
    channel.declare_queue(QUEUE, max_length).await.unwrap();
    Arc::new(channel)
}

/// Injects the given events once the broker has seen `count` publishes
fn confirm_after(channel: Arc<MemoryChannel>, count: usize, events: Vec<ConfirmEvent>) {
    tokio::spawn(async move {
        while channel.broker().published() < count {
            sleep(Duration::from_millis(5)).await;
        }

        for event in events {
            assert!(channel.inject_confirm(event));
        }
    });
}

#[tokio::test]
async fn wait_after_every_individual_publish() {
    let broker = MemoryBroker::new();
    let channel = channel(&broker, ConfirmMode::Immediate, None).await;
    let publisher = ConfirmedPublisher::new(channel, QUEUE).await.unwrap();

    let report = publisher
        .publish_all(PublishStrategy::Individual, messages(20))
        .await
        .unwrap();

    assert_eq!((report.published, report.acked, report.waits), (20, 20, 20));
    assert_eq!(broker.queue_len(QUEUE), Some(20));
    assert!(publisher.tracker().is_empty());
}

#[tokio::test]
async fn publish_everything_before_any_confirm_arrives() {
    let broker = MemoryBroker::new();
    let channel = channel(&broker, ConfirmMode::Manual, None).await;
    let publisher = ConfirmedPublisher::new(channel.clone(), QUEUE)
        .await
        .unwrap();

    confirm_after(channel, 50, vec![ConfirmEvent::ack(50, true)]);

    let report = publisher
        .publish_all(PublishStrategy::FullyAsync, messages(50))
        .await
        .unwrap();

    assert_eq!((report.published, report.acked, report.waits), (50, 50, 1));
    assert!(publisher.tracker().is_empty());
}

#[tokio::test]
async fn keep_a_nack_when_a_cumulative_ack_follows() {
    let broker = MemoryBroker::new();
    let channel = channel(&broker, ConfirmMode::Manual, None).await;
    let (nacks, mut rejected) = ForwardNacks::new();
    let publisher = ConfirmedPublisher::with_nack_handler(channel.clone(), QUEUE, nacks)
        .await
        .unwrap();

    confirm_after(
        channel,
        5,
        vec![ConfirmEvent::nack(2, false), ConfirmEvent::ack(5, true)],
    );

    let report = publisher
        .publish_all(PublishStrategy::FullyAsync, messages(5))
        .await
        .unwrap();

    assert_eq!((report.acked, report.nacked), (4, 1));

    let entry = rejected.recv().await.unwrap();
    assert_eq!(entry.sequence, 2);
    assert_eq!(entry.state, ConfirmState::Nacked);
    assert_eq!(entry.message_ref.position, 1);
    assert_eq!(entry.message_ref.preview, "1");
}

#[tokio::test]
async fn stop_batched_publishing_at_the_first_rejection() {
    let broker = MemoryBroker::new();
    let channel = channel(&broker, ConfirmMode::Immediate, Some(5)).await;
    let publisher = ConfirmedPublisher::new(channel, QUEUE).await.unwrap();

    let result = publisher
        .publish_all(PublishStrategy::Batched(4), messages(12))
        .await;

    assert!(matches!(
        result,
        Err(ConfirmError::BrokerRejected { sequence: 6 })
    ));
    assert_eq!(broker.published(), 8);
    assert_eq!(broker.queue_len(QUEUE), Some(5));
}

#[tokio::test]
async fn report_what_is_still_unconfirmed_after_draining() {
    let broker = MemoryBroker::new();
    let channel = channel(&broker, ConfirmMode::Manual, None).await;
    let publisher = ConfirmedPublisher::new(channel.clone(), QUEUE)
        .await
        .unwrap()
        .with_drain_timeout(Duration::from_millis(150));

    confirm_after(channel, 4, vec![ConfirmEvent::ack(2, true)]);

    let result = publisher
        .publish_all(PublishStrategy::FullyAsync, messages(4))
        .await;

    assert!(matches!(result, Err(ConfirmError::Timeout { outstanding: 2 })));

    let positions: Vec<usize> = publisher
        .tracker()
        .outstanding()
        .into_iter()
        .map(|entry| entry.message_ref.position)
        .collect();
    assert_eq!(positions, vec![2, 3]);
}

#[tokio::test]
async fn fail_outstanding_publishes_when_the_broker_goes_away() {
    let broker = MemoryBroker::new();
    let channel = channel(&broker, ConfirmMode::Manual, None).await;
    let publisher = ConfirmedPublisher::new(channel, QUEUE).await.unwrap();

    let closer = broker.clone();
    tokio::spawn(async move {
        while closer.published() < 10 {
            sleep(Duration::from_millis(5)).await;
        }
        closer.close();
    });

    let result = publisher
        .publish_all(PublishStrategy::FullyAsync, messages(10))
        .await;

    assert!(matches!(result, Err(ConfirmError::TransportClosed)));
    assert!(publisher.tracker().is_empty());
}
