#[path = "common.rs"]
mod common;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;

use perilmq::{
    publish, subscribe, AckDecision, BinaryCodec, Connection, DurabilityClass, ExchangeKind,
    JsonCodec, MemoryBroker,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ArmyMove {
    username: String,
    direction: String,
}

fn alice_moves_north() -> ArmyMove {
    ArmyMove {
        username: "alice".into(),
        direction: "north".into(),
    }
}

#[tokio::test]
async fn topic_subscription_receives_matching_publish_exactly_once() {
    common::init_logging();

    let broker = MemoryBroker::new();
    broker.declare_exchange("peril_topic", ExchangeKind::Topic);
    let conn = broker.connect();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = subscribe(
        &conn,
        "peril_topic",
        "army_moves.bob",
        "army_moves.*",
        DurabilityClass::Transient,
        JsonCodec,
        move |mv: ArmyMove| {
            tx.send(mv).unwrap();
            AckDecision::Ack
        },
    )
    .await
    .unwrap();

    let channel = conn.open_channel().await.unwrap();
    let mv = alice_moves_north();
    publish(&channel, "peril_topic", "army_moves.alice", &mv, &JsonCodec)
        .await
        .unwrap();

    let received = timeout(Duration::from_millis(500), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, mv);

    // Acked: the message is gone for good, never redelivered.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(broker.queue_depth("army_moves.bob"), Some(0));
}

#[tokio::test]
async fn non_matching_routing_key_is_not_delivered() {
    let broker = MemoryBroker::new();
    broker.declare_exchange("peril_topic", ExchangeKind::Topic);
    let conn = broker.connect();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = subscribe(
        &conn,
        "peril_topic",
        "army_moves.bob",
        "army_moves.*",
        DurabilityClass::Transient,
        JsonCodec,
        move |mv: ArmyMove| {
            tx.send(mv).unwrap();
            AckDecision::Ack
        },
    )
    .await
    .unwrap();

    let channel = conn.open_channel().await.unwrap();
    publish(&channel, "peril_topic", "pause.alice", &alice_moves_north(), &JsonCodec)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn messages_are_handled_in_publish_order() {
    let broker = MemoryBroker::new();
    broker.declare_exchange("peril_topic", ExchangeKind::Topic);
    let conn = broker.connect();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = subscribe(
        &conn,
        "peril_topic",
        "army_moves.bob",
        "army_moves.*",
        DurabilityClass::Transient,
        JsonCodec,
        move |mv: ArmyMove| {
            tx.send(mv.direction).unwrap();
            AckDecision::Ack
        },
    )
    .await
    .unwrap();

    let channel = conn.open_channel().await.unwrap();
    for direction in ["north", "east", "south"] {
        let mv = ArmyMove {
            username: "alice".into(),
            direction: direction.into(),
        };
        publish(&channel, "peril_topic", "army_moves.alice", &mv, &JsonCodec)
            .await
            .unwrap();
    }

    for expected in ["north", "east", "south"] {
        let direction = timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(direction, expected);
    }
}

#[tokio::test]
async fn binary_codec_round_trips_through_the_broker() {
    let broker = MemoryBroker::new();
    broker.declare_exchange("peril_topic", ExchangeKind::Topic);
    let conn = broker.connect();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = subscribe(
        &conn,
        "peril_topic",
        "game_logs",
        "game_logs.*",
        DurabilityClass::Durable,
        BinaryCodec,
        move |mv: ArmyMove| {
            tx.send(mv).unwrap();
            AckDecision::Ack
        },
    )
    .await
    .unwrap();

    let channel = conn.open_channel().await.unwrap();
    let mv = alice_moves_north();
    publish(&channel, "peril_topic", "game_logs.alice", &mv, &BinaryCodec)
        .await
        .unwrap();

    let received = timeout(Duration::from_millis(500), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, mv);
}

#[tokio::test]
async fn two_queues_both_receive_a_matching_publish() {
    let broker = MemoryBroker::new();
    broker.declare_exchange("peril_topic", ExchangeKind::Topic);
    let conn = broker.connect();

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let _sub_a = subscribe(
        &conn,
        "peril_topic",
        "army_moves.bob",
        "army_moves.*",
        DurabilityClass::Transient,
        JsonCodec,
        move |mv: ArmyMove| {
            tx_a.send(mv).unwrap();
            AckDecision::Ack
        },
    )
    .await
    .unwrap();

    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let _sub_b = subscribe(
        &conn,
        "peril_topic",
        "army_moves.carol",
        "army_moves.#",
        DurabilityClass::Transient,
        JsonCodec,
        move |mv: ArmyMove| {
            tx_b.send(mv).unwrap();
            AckDecision::Ack
        },
    )
    .await
    .unwrap();

    let channel = conn.open_channel().await.unwrap();
    let mv = alice_moves_north();
    publish(&channel, "peril_topic", "army_moves.alice", &mv, &JsonCodec)
        .await
        .unwrap();

    let got_a = timeout(Duration::from_millis(500), rx_a.recv()).await.unwrap().unwrap();
    let got_b = timeout(Duration::from_millis(500), rx_b.recv()).await.unwrap().unwrap();
    assert_eq!(got_a, mv);
    assert_eq!(got_b, mv);
}
