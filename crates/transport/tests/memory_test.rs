//! Two peers talking over linked in-process ports.

use std::sync::Arc;
use std::time::Duration;

use ire_core::{CallError, EventHandler, ListenerStyle, MethodHandler, Peer};
use ire_transport::MemoryPort;
use serde_json::{json, Value};
use tokio::sync::mpsc;

fn linked_peers() -> (Peer, Peer) {
    let (a, b) = MemoryPort::pair();
    let left = Peer::with_transport(Arc::new(ListenerStyle::new(a))).unwrap();
    let right = Peer::with_transport(Arc::new(ListenerStyle::new(b))).unwrap();
    (left, right)
}

// ============================================================================
// Invocation Tests
// ============================================================================

#[tokio::test]
async fn test_invoke_in_both_directions() {
    let (left, right) = linked_peers();
    left.register("whoami", MethodHandler::sync(|_| Ok(json!("left"))))
        .unwrap();
    right
        .register(
            "sum",
            MethodHandler::sync(|args| {
                Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
            }),
        )
        .unwrap();

    let sum = left.invoke("sum", vec![json!(1), json!(2), json!(3)]).unwrap();
    let name = right.invoke("whoami", vec![]).unwrap();

    assert_eq!(sum.await, Ok(json!(6)));
    assert_eq!(name.await, Ok(json!("left")));
}

#[tokio::test]
async fn test_unknown_method_rejects_caller() {
    let (left, _right) = linked_peers();

    let call = left.invoke("nope", vec![]).unwrap();
    assert_eq!(call.await, Err(CallError::Rejected(json!("UNKNOWN_METHOD"))));
}

#[tokio::test]
async fn test_many_concurrent_calls_resolve_to_their_own_result() {
    let (left, right) = linked_peers();
    right
        .register(
            "delayed",
            MethodHandler::new(|args| async move {
                let n = args.first().and_then(Value::as_u64).unwrap_or_default();
                // later calls finish first
                tokio::time::sleep(Duration::from_millis(20 - n)).await;
                Ok(json!(n))
            }),
        )
        .unwrap();

    let calls: Vec<_> = (0..10u64)
        .map(|n| left.invoke("delayed", vec![json!(n)]).unwrap())
        .collect();
    for (n, call) in calls.into_iter().enumerate() {
        assert_eq!(call.await, Ok(json!(n)));
    }
}

#[tokio::test]
async fn test_remote_failure_carries_message() {
    let (left, right) = linked_peers();
    right
        .register(
            "fail",
            MethodHandler::sync(|_| Err(anyhow::anyhow!("not today"))),
        )
        .unwrap();

    let call = left.invoke("fail", vec![]).unwrap();
    assert_eq!(call.await, Err(CallError::Rejected(json!("not today"))));
}

#[tokio::test]
async fn test_handler_can_call_back_into_caller() {
    let (left, right) = linked_peers();
    left.register("base", MethodHandler::sync(|_| Ok(json!(40))))
        .unwrap();

    let callback = right.downgrade();
    right
        .register(
            "answer",
            MethodHandler::new(move |_| {
                let callback = callback.clone();
                async move {
                    let peer = callback
                        .upgrade()
                        .ok_or_else(|| anyhow::anyhow!("peer dropped"))?;
                    let base = peer.invoke("base", vec![])?.await?;
                    Ok::<_, anyhow::Error>(json!(base.as_i64().unwrap_or_default() + 2))
                }
            }),
        )
        .unwrap();

    assert_eq!(left.invoke("answer", vec![]).unwrap().await, Ok(json!(42)));
}

// ============================================================================
// Event Tests
// ============================================================================

#[tokio::test]
async fn test_events_reach_listeners_in_order() {
    let (left, right) = linked_peers();
    let (tx, mut rx) = mpsc::unbounded_channel();
    right
        .on(
            "tick",
            EventHandler::new(move |data| {
                let _ = tx.send(data.clone());
            }),
        )
        .unwrap();

    for n in 0..3 {
        left.emit("tick", json!(n)).unwrap();
    }

    for n in 0..3 {
        assert_eq!(rx.recv().await, Some(json!(n)));
    }
}

#[tokio::test]
async fn test_once_listener_over_the_wire() {
    let (left, right) = linked_peers();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let once_tx = tx.clone();
    right
        .once("x", EventHandler::new(move |_| {
            let _ = once_tx.send("once");
        }))
        .unwrap();
    right
        .on("x", EventHandler::new(move |_| {
            let _ = tx.send("always");
        }))
        .unwrap();

    left.emit("x", Value::Null).unwrap();
    left.emit("x", Value::Null).unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(rx.recv().await.unwrap());
    }
    assert_eq!(seen, vec!["once", "always", "always"]);
    assert!(rx.try_recv().is_err());
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_unhook_rejects_calls_waiting_on_remote() {
    let (left, right) = linked_peers();
    right
        .register(
            "never",
            MethodHandler::new(|_| std::future::pending::<anyhow::Result<Value>>()),
        )
        .unwrap();

    let call = left.invoke("never", vec![]).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(right.in_flight(), 1);

    left.unhook();
    assert_eq!(call.await, Err(CallError::TransportClosed));
}

#[tokio::test]
async fn test_send_fails_once_remote_port_is_gone() {
    let (a, b) = MemoryPort::pair();
    let peer = Peer::with_transport(Arc::new(ListenerStyle::new(a))).unwrap();
    drop(b);

    assert!(peer.invoke("m", vec![]).is_err());
    assert!(peer.emit("e", Value::Null).is_err());
    assert_eq!(peer.pending_calls(), 0);
}

#[tokio::test]
async fn test_caller_side_timeout() {
    let (left, right) = linked_peers();
    right
        .register(
            "slow",
            MethodHandler::new(|_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Value::Null)
            }),
        )
        .unwrap();

    let call = left.invoke("slow", vec![]).unwrap();
    let outcome = tokio::time::timeout(Duration::from_millis(20), call).await;
    assert!(outcome.is_err(), "call should time out on the caller side");
}
