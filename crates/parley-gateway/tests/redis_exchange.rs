//! Redis pub/sub exchange against a real server. Set `REDIS_URL` to run;
//! without it every test returns early.

use std::env;
use std::time::Duration;

use bytes::Bytes;
use uuid::Uuid;

use parley_gateway::exchange::RedisExchange;
use parley_gateway::{Exchange, Subscription};

fn redis_url() -> Option<String> {
    let url = env::var("REDIS_URL").ok();
    if url.is_none() {
        eprintln!("REDIS_URL not set, skipping redis exchange test");
    }
    url
}

/// A declared exchange with a name no other test run uses.
async fn exchange(url: &str) -> RedisExchange {
    let name = format!("parley-test.{}", Uuid::new_v4().simple());
    let exchange = RedisExchange::connect(url, name).await.unwrap();
    exchange.declare().await.unwrap();
    exchange
}

async fn next(sub: &mut Subscription) -> Bytes {
    tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("no delivery")
        .expect("subscription ended")
}

async fn assert_empty(sub: &mut Subscription) {
    let waited = tokio::time::timeout(Duration::from_millis(300), sub.recv()).await;
    assert!(waited.is_err(), "unexpected delivery on {}", sub.queue());
}

async fn subscribers(url: &str, channel: &str) -> i64 {
    let client = redis::Client::open(url).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let (_, count): (String, i64) = redis::cmd("PUBSUB")
        .arg("NUMSUB")
        .arg(channel)
        .query_async(&mut conn)
        .await
        .unwrap();
    count
}

#[tokio::test]
async fn exact_key_routes_to_its_queue() {
    let Some(url) = redis_url() else { return };
    let exchange = exchange(&url).await;
    let mut alice = exchange.bind("alice").await.unwrap();
    let mut bob = exchange.bind("bob").await.unwrap();

    exchange.publish("alice", Bytes::from_static(b"for alice")).await.unwrap();

    assert_eq!(next(&mut alice).await, Bytes::from_static(b"for alice"));
    assert_empty(&mut bob).await;
}

#[tokio::test]
async fn star_binding_matches_one_word() {
    let Some(url) = redis_url() else { return };
    let exchange = exchange(&url).await;
    let mut chats = exchange.bind("chat.*").await.unwrap();

    // The redis glob also matches the deeper key; the topic filter must not.
    exchange.publish("chat.alice.phone", Bytes::from_static(b"too deep")).await.unwrap();
    exchange.publish("chat.alice", Bytes::from_static(b"one word")).await.unwrap();

    assert_eq!(next(&mut chats).await, Bytes::from_static(b"one word"));
    assert_empty(&mut chats).await;
}

#[tokio::test]
async fn hash_binding_sees_every_key() {
    let Some(url) = redis_url() else { return };
    let exchange = exchange(&url).await;
    let mut audit = exchange.bind("#").await.unwrap();

    exchange.publish("alice", Bytes::from_static(b"one")).await.unwrap();
    exchange.publish("chat.bob", Bytes::from_static(b"two")).await.unwrap();

    assert_eq!(next(&mut audit).await, Bytes::from_static(b"one"));
    assert_eq!(next(&mut audit).await, Bytes::from_static(b"two"));
}

#[tokio::test]
async fn exchanges_do_not_share_channels() {
    let Some(url) = redis_url() else { return };
    let first = exchange(&url).await;
    let second = exchange(&url).await;
    let mut watcher = second.bind("#").await.unwrap();
    let mut alice = first.bind("alice").await.unwrap();

    first.publish("alice", Bytes::from_static(b"hi")).await.unwrap();

    assert_eq!(next(&mut alice).await, Bytes::from_static(b"hi"));
    assert_empty(&mut watcher).await;
}

#[tokio::test]
async fn dropping_subscription_unsubscribes() {
    let Some(url) = redis_url() else { return };
    let exchange = exchange(&url).await;
    let channel = format!("{}.alice", exchange.name());

    let sub = exchange.bind("alice").await.unwrap();
    assert_eq!(subscribers(&url, &channel).await, 1);

    drop(sub);
    let mut remaining = 1;
    for _ in 0..40 {
        remaining = subscribers(&url, &channel).await;
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(remaining, 0);

    // Publishing to a key nobody is bound to is not an error.
    exchange.publish("alice", Bytes::from_static(b"lost")).await.unwrap();
}
