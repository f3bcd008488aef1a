use async_trait::async_trait;
use correlator::domain::{FibonacciHandler, DEFAULT_CALL_TIMEOUT, RPC_QUEUE};
use correlator::library::communication::broker::Channel;
use correlator::library::communication::implementation::memory::{MemoryBroker, MemoryChannel};
use correlator::library::communication::request::{
    FailurePolicy, RequestHandler, RpcClient, RpcError, RpcServer,
};
use correlator::library::BoxedError;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Echoes the payload, taking as many milliseconds as the payload says
struct Sleepy;

#[async_trait]
impl RequestHandler for Sleepy {
    async fn handle(&self, payload: Vec<u8>) -> Result<Vec<u8>, BoxedError> {
        let millis: u64 = String::from_utf8(payload.clone())?.parse()?;
        sleep(Duration::from_millis(millis)).await;
        Ok(payload)
    }
}

async fn serve<H>(broker: &MemoryBroker, handler: H, prefetch: usize)
where
    H: RequestHandler + Send + Sync + 'static,
{
    let channel = Arc::new(broker.channel());
    channel.declare_queue(RPC_QUEUE, None).await.unwrap();

    let server = RpcServer::new(channel, RPC_QUEUE, handler)
        .with_prefetch(prefetch)
        .with_failure_policy(FailurePolicy::Reply);
    tokio::spawn(async move { server.serve().await });
}

async fn client(broker: &MemoryBroker) -> RpcClient<MemoryChannel> {
    RpcClient::new(Arc::new(broker.channel()), RPC_QUEUE)
        .await
        .unwrap()
}

#[tokio::test]
async fn compute_fibonacci_numbers_remotely() {
    let broker = MemoryBroker::new();
    serve(&broker, FibonacciHandler, 1).await;
    let client = client(&broker).await;

    let reply = client.call("5", DEFAULT_CALL_TIMEOUT).await.unwrap();

    assert_eq!(reply, b"5".to_vec());
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn time_out_without_server_and_leave_nothing_behind() {
    let broker = MemoryBroker::new();
    let client = client(&broker).await;
    let started = Instant::now();

    let result = client.call("5", Duration::from_millis(100)).await;

    assert!(matches!(result, Err(RpcError::Timeout)));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn discard_replies_arriving_after_the_deadline() {
    let broker = MemoryBroker::new();
    serve(&broker, Sleepy, 2).await;
    let client = client(&broker).await;

    let late = client.call("150", Duration::from_millis(30)).await;
    assert!(matches!(late, Err(RpcError::Timeout)));

    // The late reply to the first call arrives while this one is pending
    let reply = client.call("300", DEFAULT_CALL_TIMEOUT).await.unwrap();

    assert_eq!(reply, b"300".to_vec());
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn forget_calls_whose_future_is_dropped() {
    let broker = MemoryBroker::new();
    serve(&broker, Sleepy, 2).await;
    let client = client(&broker).await;

    let abandoned = client.call("100", Duration::from_millis(150));
    assert!(tokio::time::timeout(Duration::from_millis(20), abandoned)
        .await
        .is_err());
    assert!(client.pending().is_empty());

    // Outlives both the reply to the abandoned call and its own deadline
    sleep(Duration::from_millis(300)).await;

    assert!(client.pending().is_empty());
    assert_eq!(client.call("5", DEFAULT_CALL_TIMEOUT).await.unwrap(), b"5".to_vec());
}

#[tokio::test]
async fn route_concurrent_replies_to_their_callers() {
    let broker = MemoryBroker::new();
    serve(&broker, FibonacciHandler, 4).await;
    let client = client(&broker).await;

    let calls = (0..40u64).map(|n| {
        let client = &client;
        async move {
            let reply = client.call(n.to_string(), DEFAULT_CALL_TIMEOUT).await;
            (n, reply.unwrap())
        }
    });

    for (n, reply) in join_all(calls).await {
        let expected = correlator::domain::fibonacci(n).unwrap().to_string();
        assert_eq!(String::from_utf8(reply).unwrap(), expected);
    }

    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn distinguish_handler_failures_from_results() {
    let broker = MemoryBroker::new();
    serve(&broker, FibonacciHandler, 1).await;
    let client = client(&broker).await;

    let result = client.call("twelve", DEFAULT_CALL_TIMEOUT).await;

    match result {
        Err(RpcError::HandlerFailure(error)) => {
            assert!(error.reason().unwrap().contains("twelve"));
        }
        other => panic!("expected a handler failure, got {:?}", other),
    }
}

#[tokio::test]
async fn withdraw_a_call_and_keep_serving_others() {
    let broker = MemoryBroker::new();
    serve(&broker, Sleepy, 1).await;
    let client = client(&broker).await;
    let cancellation = CancellationToken::new();

    let withdrawn = client.call_with_cancellation("100", DEFAULT_CALL_TIMEOUT, &cancellation);
    let cancel = async {
        sleep(Duration::from_millis(20)).await;
        cancellation.cancel();
    };
    let (withdrawn, _) = tokio::join!(withdrawn, cancel);

    assert!(matches!(withdrawn, Err(RpcError::Cancelled)));
    assert_eq!(client.call("1", DEFAULT_CALL_TIMEOUT).await.unwrap(), b"1".to_vec());
}

#[tokio::test]
async fn fail_every_pending_call_when_the_broker_goes_away() {
    let broker = MemoryBroker::new();
    serve(&broker, Sleepy, 8).await;
    let client = client(&broker).await;

    let calls = join_all((0..5).map(|_| client.call("10000", DEFAULT_CALL_TIMEOUT)));
    let close = async {
        sleep(Duration::from_millis(50)).await;
        broker.close();
    };
    let (results, _) = tokio::join!(calls, close);

    assert!(results
        .iter()
        .all(|result| matches!(result, Err(RpcError::TransportClosed))));
    assert!(client.pending().is_empty());
    assert!(client.is_closed());
}
