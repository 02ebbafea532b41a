//! Session tests against the in-memory broker.

mod support;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use streamwire_client::protocol::{keys, Request};
use streamwire_client::{
    ByteCapacity, ClientConfig, CloseReason, ConfirmationStatus, Connection, ConnectionState,
    ConsumerOptions, FailureReason, FnHandler, Message, MessageContext, MessageHandler,
    OffsetSpecification, Producer, ProducerOptions, ResponseCode, StreamError, StreamOptions,
};
use support::{chunk, metadata_update, publish_error, published_ids, Behavior};
use tokio::sync::mpsc;

fn messages(bodies: &[&'static str]) -> Vec<Message> {
    bodies.iter().map(|b| Message::new(*b)).collect()
}

/// Handler forwarding every delivered offset and body to a channel.
fn collecting() -> (impl MessageHandler, mpsc::UnboundedReceiver<(u64, String)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = FnHandler::new(move |ctx: MessageContext, message: Message| {
        let body = String::from_utf8_lossy(message.body()).into_owned();
        let _ = tx.send((ctx.offset(), body));
        futures_util::future::ready(Ok(()))
    });
    (handler, rx)
}

async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Option<T> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .ok()
        .flatten()
}

// ============================================================================
// Producer
// ============================================================================

#[tokio::test]
async fn test_publish_three_messages_all_confirmed() {
    let (connection, _broker) = support::start(Behavior::default()).await;
    let producer = Producer::create(&connection, "orders", ProducerOptions::default())
        .await
        .unwrap();
    let mut confirmations = producer.confirmations().unwrap();

    let accepted = producer
        .batch_publish(messages(&["a", "b", "c"]))
        .await
        .unwrap();
    assert_eq!(accepted, 3);

    let mut seen = Vec::new();
    while seen.len() < 3 {
        let group = tokio::time::timeout(Duration::from_secs(2), confirmations.next())
            .await
            .unwrap()
            .unwrap();
        seen.extend(group);
    }

    let ids: Vec<u64> = seen.iter().map(|c| c.publishing_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(seen.iter().all(|c| c.status == ConfirmationStatus::Confirmed));
    assert_eq!(&seen[1].message.body()[..], b"b");
    assert_eq!(producer.unconfirmed(), 0);
}

#[tokio::test]
async fn test_publishing_ids_increase_across_calls() {
    let (connection, mut broker) = support::start(Behavior::default()).await;
    let producer = Producer::create(&connection, "orders", ProducerOptions::default())
        .await
        .unwrap();

    producer.batch_publish(messages(&["a", "b"])).await.unwrap();
    let single = producer.send(Message::new("c")).await.unwrap();
    producer
        .batch_publish(messages(&["d", "e", "f"]))
        .await
        .unwrap();

    assert_eq!(single, 3);
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.extend(published_ids(&broker.expect(keys::PUBLISH).await));
    }
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn test_named_producer_resumes_sequence() {
    let behavior = Behavior {
        publisher_sequence: 41,
        ..Behavior::default()
    };
    let (connection, mut broker) = support::start(behavior).await;
    let producer = Producer::create(
        &connection,
        "orders",
        ProducerOptions::new().name("order-writer"),
    )
    .await
    .unwrap();

    let query = broker.expect(keys::QUERY_PUBLISHER_SEQUENCE).await;
    let mut r = query.reader();
    r.read_u32().unwrap();
    assert_eq!(r.read_string().unwrap(), "order-writer");

    assert_eq!(producer.send(Message::new("x")).await.unwrap(), 42);
}

#[tokio::test]
async fn test_failed_sequence_query_deletes_publisher() {
    let behavior = Behavior {
        codes: HashMap::from([(keys::QUERY_PUBLISHER_SEQUENCE, 0x02)]),
        ..Behavior::default()
    };
    let (connection, mut broker) = support::start(behavior).await;

    let result = Producer::create(
        &connection,
        "orders",
        ProducerOptions::new().name("order-writer"),
    )
    .await;
    assert!(matches!(result, Err(StreamError::StreamNotFound(s)) if s == "orders"));

    let declared = broker.expect(keys::DECLARE_PUBLISHER).await;
    let deleted = broker.expect(keys::DELETE_PUBLISHER).await;
    let mut r = declared.reader();
    r.read_u32().unwrap();
    let publisher_id = r.read_u8().unwrap();
    let mut r = deleted.reader();
    r.read_u32().unwrap();
    assert_eq!(r.read_u8().unwrap(), publisher_id);
}

#[tokio::test]
async fn test_sequence_response_without_body_is_rejected() {
    let behavior = Behavior {
        bodies: HashMap::from([(keys::QUERY_PUBLISHER_SEQUENCE, Bytes::new())]),
        ..Behavior::default()
    };
    let (connection, mut broker) = support::start(behavior).await;

    let result = Producer::create(
        &connection,
        "orders",
        ProducerOptions::new().name("order-writer"),
    )
    .await;
    assert!(matches!(result, Err(StreamError::MalformedFrame(_))));
    broker.expect(keys::DELETE_PUBLISHER).await;
}

#[tokio::test]
async fn test_concurrent_batch_publish_ids_unique_and_increasing() {
    let (connection, mut broker) = support::start(Behavior::default()).await;
    let options = ProducerOptions::new().batch_size(3).max_unconfirmed(1000);
    let producer = Producer::create(&connection, "orders", options)
        .await
        .unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|t| {
            let producer = producer.clone();
            tokio::spawn(async move {
                for round in 0..5 {
                    let batch = (0..7)
                        .map(|i| Message::new(format!("{}-{}-{}", t, round, i)))
                        .collect();
                    producer.batch_publish(batch).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let mut ids = Vec::new();
    while ids.len() < 8 * 5 * 7 {
        ids.extend(published_ids(&broker.expect(keys::PUBLISH).await));
    }
    let expected: Vec<u64> = (1..=(8 * 5 * 7) as u64).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_batch_split_by_batch_size() {
    let (connection, mut broker) = support::start(Behavior::default()).await;
    let options = ProducerOptions::new().batch_size(2).max_unconfirmed(10);
    let producer = Producer::create(&connection, "orders", options)
        .await
        .unwrap();

    producer
        .batch_publish(messages(&["1", "2", "3", "4", "5"]))
        .await
        .unwrap();

    let sizes: Vec<usize> = [
        broker.expect(keys::PUBLISH).await,
        broker.expect(keys::PUBLISH).await,
        broker.expect(keys::PUBLISH).await,
    ]
    .iter()
    .map(|f| published_ids(f).len())
    .collect();
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[tokio::test]
async fn test_publish_error_fails_only_that_id() {
    let behavior = Behavior {
        auto_confirm: false,
        ..Behavior::default()
    };
    let (connection, broker) = support::start(behavior).await;
    let producer = Producer::create(&connection, "orders", ProducerOptions::default())
        .await
        .unwrap();
    let mut confirmations = producer.confirmations().unwrap();

    producer.batch_publish(messages(&["a", "b"])).await.unwrap();
    broker.push(publish_error(producer.publisher_id(), &[(1, 0x06)]));
    broker.push(support::publish_confirm(producer.publisher_id(), &[2]));

    let failed = confirmations.next().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].publishing_id, 1);
    assert_eq!(
        failed[0].status,
        ConfirmationStatus::Failed(FailureReason::Broker(ResponseCode::StreamNotAvailable))
    );

    let confirmed = confirmations.next().await.unwrap();
    assert_eq!(confirmed[0].publishing_id, 2);
    assert!(confirmed[0].status.is_confirmed());
}

#[tokio::test]
async fn test_producer_close_fails_pending_and_is_idempotent() {
    let behavior = Behavior {
        auto_confirm: false,
        ..Behavior::default()
    };
    let (connection, mut broker) = support::start(behavior).await;
    let producer = Producer::create(&connection, "orders", ProducerOptions::default())
        .await
        .unwrap();
    let mut confirmations = producer.confirmations().unwrap();

    producer.batch_publish(messages(&["a", "b"])).await.unwrap();
    broker.expect(keys::PUBLISH).await;

    producer.close().await.unwrap();
    producer.close().await.unwrap();

    let group = confirmations.next().await.unwrap();
    assert_eq!(group.len(), 2);
    assert!(group
        .iter()
        .all(|c| c.status == ConfirmationStatus::Failed(FailureReason::ProducerClosed)));
    assert!(confirmations.next().await.is_none());

    assert!(matches!(
        producer.batch_publish(messages(&["c"])).await,
        Err(StreamError::ProducerClosed)
    ));
    assert_eq!(broker.drain(keys::DELETE_PUBLISHER).len(), 1);
    assert!(connection.is_open());
}

#[tokio::test]
async fn test_backlog_full_times_out() {
    let behavior = Behavior {
        auto_confirm: false,
        ..Behavior::default()
    };
    let (connection, _broker) = support::start(behavior).await;
    let options = ProducerOptions::new()
        .batch_size(2)
        .max_unconfirmed(2)
        .backlog_timeout(Duration::from_millis(50));
    let producer = Producer::create(&connection, "orders", options)
        .await
        .unwrap();

    assert_eq!(producer.batch_publish(messages(&["a", "b"])).await.unwrap(), 2);
    assert!(matches!(
        producer.send(Message::new("c")).await,
        Err(StreamError::BackpressureTimeout)
    ));
    assert_eq!(producer.unconfirmed(), 2);
}

#[tokio::test]
async fn test_message_larger_than_frame_rejected() {
    let behavior = Behavior {
        frame_max: 1024,
        ..Behavior::default()
    };
    let (connection, _broker) = support::start(behavior).await;
    assert_eq!(connection.frame_max(), 1024);
    let producer = Producer::create(&connection, "orders", ProducerOptions::default())
        .await
        .unwrap();

    let result = producer.send(Message::new(vec![0u8; 2000])).await;
    assert!(matches!(result, Err(StreamError::MessageTooLarge { .. })));
    assert_eq!(producer.unconfirmed(), 0);
}

#[tokio::test]
async fn test_confirmation_stream_taken_once() {
    let (connection, _broker) = support::start(Behavior::default()).await;
    let producer = Producer::create(&connection, "orders", ProducerOptions::default())
        .await
        .unwrap();

    let _stream = producer.confirmations().unwrap();
    assert!(matches!(
        producer.confirmations(),
        Err(StreamError::EventStreamTaken)
    ));
}

// ============================================================================
// Consumer
// ============================================================================

#[tokio::test]
async fn test_consume_from_offset_zero_in_order() {
    let behavior = Behavior {
        deliveries: vec![chunk(0, &messages(&["m0", "m1", "m2", "m3", "m4"]))],
        ..Behavior::default()
    };
    let (environment, mut broker) = support::environment(behavior).await;
    let (handler, mut rx) = collecting();

    let _consumer = environment
        .subscribe(
            "orders",
            OffsetSpecification::Offset(0),
            ConsumerOptions::default(),
            handler,
        )
        .await
        .unwrap();

    for expected in 0..5u64 {
        let (offset, body) = recv_within(&mut rx).await.unwrap();
        assert_eq!(offset, expected);
        assert_eq!(body, format!("m{}", expected));
    }
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err()
    );

    let credit = broker.expect(keys::CREDIT).await;
    let mut r = credit.reader();
    r.read_u8().unwrap();
    assert_eq!(r.read_u16().unwrap(), 1);
}

#[tokio::test]
async fn test_offset_skips_earlier_records_in_chunk() {
    let behavior = Behavior {
        deliveries: vec![
            chunk(10, &messages(&["a", "b", "c"])),
            chunk(13, &messages(&["d", "e"])),
        ],
        ..Behavior::default()
    };
    let (environment, _broker) = support::environment(behavior).await;
    let (handler, mut rx) = collecting();

    let _consumer = environment
        .subscribe(
            "orders",
            OffsetSpecification::Offset(12),
            ConsumerOptions::default(),
            handler,
        )
        .await
        .unwrap();

    let offsets: Vec<u64> = [
        recv_within(&mut rx).await.unwrap().0,
        recv_within(&mut rx).await.unwrap().0,
        recv_within(&mut rx).await.unwrap().0,
    ]
    .to_vec();
    assert_eq!(offsets, vec![12, 13, 14]);
}

#[tokio::test]
async fn test_consumer_close_sends_one_unsubscribe() {
    let (environment, mut broker) = support::environment(Behavior::default()).await;
    let (handler, _rx) = collecting();
    let consumer = environment
        .subscribe(
            "orders",
            OffsetSpecification::First,
            ConsumerOptions::default(),
            handler,
        )
        .await
        .unwrap();

    consumer.close().await.unwrap();
    consumer.close().await.unwrap();

    let event = consumer.notify_close().unwrap().recv().await.unwrap();
    assert_eq!(event.reason, CloseReason::Unsubscribed);
    assert_eq!(event.stream, "orders");

    broker.expect(keys::UNSUBSCRIBE).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(broker.drain(keys::UNSUBSCRIBE).is_empty());
}

#[tokio::test]
async fn test_no_delivery_after_consumer_close() {
    let behavior = Behavior {
        deliveries: (0..5u64)
            .map(|i| chunk(i, &[Message::new(format!("m{}", i))]))
            .collect(),
        ..Behavior::default()
    };
    let (environment, _broker) = support::environment(behavior).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = {
        let calls = calls.clone();
        FnHandler::new(move |ctx: MessageContext, _message: Message| {
            calls.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(ctx.offset());
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            }
        })
    };
    let consumer = environment
        .subscribe(
            "orders",
            OffsetSpecification::First,
            ConsumerOptions::default(),
            handler,
        )
        .await
        .unwrap();

    assert_eq!(recv_within(&mut rx).await, Some(0));
    consumer.close().await.unwrap();
    let at_close = calls.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(calls.load(Ordering::SeqCst), at_close);
    assert!(at_close < 5);
}

#[tokio::test]
async fn test_metadata_update_closes_consumer() {
    let (environment, mut broker) = support::environment(Behavior::default()).await;
    let (handler, _rx) = collecting();
    let consumer = environment
        .subscribe(
            "orders",
            OffsetSpecification::Next,
            ConsumerOptions::new().name("billing"),
            handler,
        )
        .await
        .unwrap();
    let mut closed = consumer.notify_close().unwrap();

    broker.push(metadata_update(0x06, "orders"));

    let event = tokio::time::timeout(Duration::from_secs(2), closed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.consumer_name, "billing");
    assert_eq!(
        event.reason,
        CloseReason::StreamUnavailable(ResponseCode::StreamNotAvailable)
    );
    assert!(consumer.is_closed());

    // Route is already gone: no unsubscribe goes out.
    consumer.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(broker.drain(keys::UNSUBSCRIBE).is_empty());
}

#[tokio::test]
async fn test_subscribe_to_missing_stream() {
    let behavior = Behavior {
        codes: HashMap::from([(keys::SUBSCRIBE, 0x02)]),
        ..Behavior::default()
    };
    let (environment, _broker) = support::environment(behavior).await;
    let (handler, _rx) = collecting();

    let result = environment
        .subscribe(
            "missing",
            OffsetSpecification::First,
            ConsumerOptions::default(),
            handler,
        )
        .await;
    assert!(matches!(result, Err(StreamError::StreamNotFound(s)) if s == "missing"));
}

#[tokio::test]
async fn test_store_offset_requires_name() {
    let (environment, mut broker) = support::environment(Behavior::default()).await;

    let (handler, _rx) = collecting();
    let anonymous = environment
        .subscribe(
            "orders",
            OffsetSpecification::First,
            ConsumerOptions::default(),
            handler,
        )
        .await
        .unwrap();
    assert!(matches!(
        anonymous.store_offset(5).await,
        Err(StreamError::MissingConsumerName)
    ));

    let (handler, _rx) = collecting();
    let named = environment
        .subscribe(
            "orders",
            OffsetSpecification::First,
            ConsumerOptions::new().name("billing"),
            handler,
        )
        .await
        .unwrap();
    named.store_offset(5).await.unwrap();

    let frame = broker.expect(keys::STORE_OFFSET).await;
    let mut r = frame.reader();
    assert_eq!(r.read_string().unwrap(), "billing");
    assert_eq!(r.read_string().unwrap(), "orders");
    assert_eq!(r.read_u64().unwrap(), 5);
}

// ============================================================================
// Connection
// ============================================================================

#[tokio::test]
async fn test_transport_loss_fails_waiting_request() {
    let behavior = Behavior {
        silent: vec![keys::DELETE_STREAM],
        ..Behavior::default()
    };
    let (connection, broker) = support::start(behavior).await;

    let waiting = {
        let connection = connection.clone();
        tokio::spawn(async move {
            connection
                .send_and_await(
                    Request::DeleteStream {
                        stream: "orders".into(),
                    },
                    Duration::from_secs(30),
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    broker.kill();

    let result = tokio::time::timeout(Duration::from_secs(2), waiting)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(StreamError::ConnectionClosed)));
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_failed_authentication() {
    let behavior = Behavior {
        auth_code: 0x08,
        ..Behavior::default()
    };
    let (_broker, client) = support::spawn(behavior);

    let result = Connection::with_transport(client, support::config()).await;
    assert!(matches!(result, Err(StreamError::HandshakeFailed(_))));
}

#[tokio::test]
async fn test_plain_not_offered() {
    let behavior = Behavior {
        mechanisms: vec!["AMQPLAIN".to_string()],
        ..Behavior::default()
    };
    let (_broker, client) = support::spawn(behavior);

    let result = Connection::with_transport(client, support::config()).await;
    assert!(matches!(result, Err(StreamError::HandshakeFailed(m)) if m.contains("PLAIN")));
}

#[tokio::test]
async fn test_request_timeout() {
    let behavior = Behavior {
        silent: vec![keys::CREATE_STREAM],
        ..Behavior::default()
    };
    let config = ClientConfig {
        request_timeout: Duration::from_millis(100),
        ..support::config()
    };
    let (connection, _broker) = support::start_with(behavior, config).await;

    let result = connection
        .request(Request::CreateStream {
            stream: "orders".into(),
            arguments: HashMap::new(),
        })
        .await;
    assert!(matches!(
        result,
        Err(StreamError::ResponseTimeout {
            command: "create_stream",
            ..
        })
    ));
    assert!(connection.is_open());
}

#[tokio::test]
async fn test_undecodable_response_fails_only_its_caller() {
    let behavior = Behavior {
        bodies: HashMap::from([(keys::QUERY_OFFSET, Bytes::from_static(&[0, 0, 1]))]),
        ..Behavior::default()
    };
    let (environment, _broker) = support::environment(behavior).await;

    let started = tokio::time::Instant::now();
    let result = environment.query_offset("billing", "orders").await;
    assert!(matches!(
        result,
        Err(StreamError::TruncatedFrame { .. }) | Err(StreamError::MalformedFrame(_))
    ));
    assert!(started.elapsed() < Duration::from_secs(1));

    assert!(environment.connection().is_open());
    assert!(!environment.stream_exists("orders").await.unwrap());
}

#[tokio::test]
async fn test_broker_close_stops_everything() {
    let behavior = Behavior {
        auto_confirm: false,
        ..Behavior::default()
    };
    let (connection, mut broker) = support::start(behavior).await;
    let producer = Producer::create(&connection, "orders", ProducerOptions::default())
        .await
        .unwrap();
    let mut confirmations = producer.confirmations().unwrap();
    producer.send(Message::new("a")).await.unwrap();

    let mut w = streamwire_client::protocol::WireWriter::new();
    w.write_u32(99);
    w.write_u16(0x0f);
    w.write_string("shutting down").unwrap();
    broker.push(streamwire_client::protocol::build_command(keys::CLOSE, w));

    let reply = broker.expect(keys::CLOSE | streamwire_client::protocol::RESPONSE_FLAG).await;
    assert_eq!(reply.reader().read_u32().unwrap(), 99);

    connection.closed().await;
    let group = confirmations.next().await.unwrap();
    assert_eq!(
        group[0].status,
        ConfirmationStatus::Failed(FailureReason::ConnectionClosed)
    );
    assert!(producer.is_closed());
}

#[tokio::test]
async fn test_connection_close_notifies_consumer() {
    let (environment, _broker) = support::environment(Behavior::default()).await;
    let (handler, _rx) = collecting();
    let consumer = environment
        .subscribe(
            "orders",
            OffsetSpecification::First,
            ConsumerOptions::default(),
            handler,
        )
        .await
        .unwrap();

    environment.close().await.unwrap();
    environment.close().await.unwrap();

    let event = consumer.notify_close().unwrap().recv().await.unwrap();
    assert_eq!(event.reason, CloseReason::ConnectionClosed);
    assert!(!environment.connection().is_open());
}

// ============================================================================
// Environment
// ============================================================================

#[tokio::test]
async fn test_declare_stream_sends_arguments() {
    let (environment, mut broker) = support::environment(Behavior::default()).await;

    environment
        .declare_stream(
            "orders",
            StreamOptions::new()
                .max_length_bytes(ByteCapacity::gb(2))
                .max_age(Duration::from_secs(3600)),
        )
        .await
        .unwrap();

    let frame = broker.expect(keys::CREATE_STREAM).await;
    let mut r = frame.reader();
    r.read_u32().unwrap();
    assert_eq!(r.read_string().unwrap(), "orders");
    let arguments = r.read_string_map().unwrap();
    assert_eq!(arguments["max-length-bytes"], "2000000000");
    assert_eq!(arguments["max-age"], "3600s");
}

#[tokio::test]
async fn test_stream_management_errors() {
    let behavior = Behavior {
        codes: HashMap::from([(keys::CREATE_STREAM, 0x05), (keys::DELETE_STREAM, 0x02)]),
        ..Behavior::default()
    };
    let (environment, _broker) = support::environment(behavior).await;

    assert!(matches!(
        environment
            .declare_stream("orders", StreamOptions::default())
            .await,
        Err(StreamError::StreamAlreadyExists(_))
    ));
    assert!(matches!(
        environment.delete_stream("gone").await,
        Err(StreamError::StreamNotFound(s)) if s == "gone"
    ));
}

#[tokio::test]
async fn test_offsets_and_metadata() {
    let behavior = Behavior {
        stored_offset: Some(17),
        publisher_sequence: 8,
        streams: vec!["orders".to_string()],
        ..Behavior::default()
    };
    let (environment, _broker) = support::environment(behavior).await;

    assert_eq!(environment.query_offset("billing", "orders").await.unwrap(), 17);
    assert_eq!(environment.query_sequence("writer", "orders").await.unwrap(), 8);
    assert!(environment.stream_exists("orders").await.unwrap());
    assert!(!environment.stream_exists("other").await.unwrap());

    let metadata = environment.metadata(&["orders"]).await.unwrap();
    let leader = metadata.stream("orders").unwrap().leader.clone().unwrap();
    assert_eq!(leader.host, "localhost");
    assert_eq!(leader.port, 5552);
}

#[tokio::test]
async fn test_query_offset_without_stored_offset() {
    let (environment, _broker) = support::environment(Behavior::default()).await;

    assert!(matches!(
        environment.query_offset("billing", "orders").await,
        Err(StreamError::OffsetNotAvailable(_))
    ));
}
