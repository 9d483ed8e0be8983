use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshbridge_client::{Bus, BusError, ClientConfig, spawn};
use meshbridge_core::{ConnectionState, Message};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingBus {
    sent: Mutex<Vec<(String, Message)>>,
    notify: Notify,
}

impl RecordingBus {
    async fn wait_for(&self, count: usize) -> Vec<(String, Message)> {
        loop {
            let notified = self.notify.notified();
            {
                let sent = self.sent.lock().unwrap();
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            notified.await;
        }
    }
}

impl Bus for RecordingBus {
    fn send(&self, module: &str, message: Message) -> Result<(), BusError> {
        self.sent.lock().unwrap().push((module.to_string(), message));
        self.notify.notify_waiters();
        Ok(())
    }
}

fn frame(id: &str, content: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({"header": {"msg_id": id}, "content": content})).unwrap()
}

#[tokio::test]
async fn peer_stream_reaches_bus_without_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edgemesh.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let bus = Arc::new(RecordingBus::default());
    let cancel = CancellationToken::new();

    let mut config = ClientConfig::new(&path);
    config.reconnect_delay = Duration::from_millis(20);
    let (handle, tasks) = spawn(config, "metamanager", bus.clone(), cancel.clone());

    let (mut peer, _) = listener.accept().await.unwrap();
    let mut stream = frame("1", json!("}{"));
    stream.extend(frame("ev", json!({"eventName": "join", "nodeName": "n2"})));
    stream.extend(frame("2", json!({"pod": "web-0"})));
    // Dribble the bytes so frames straddle reads, slowly enough that the
    // dispatcher is waiting again before the next frame completes.
    for piece in stream.chunks(7) {
        peer.write_all(piece).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let sent = bus.wait_for(2).await;
    let ids: Vec<&str> = sent.iter().map(|(_, m)| m.id()).collect();
    assert_eq!(ids, ["1", "2"]);
    assert!(sent.iter().all(|(module, _)| module == "metamanager"));
    assert_eq!(handle.state(), ConnectionState::Running);

    cancel.cancel();
    tasks.join().await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Stopped);
}

#[tokio::test]
async fn reconnects_after_peer_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edgemesh.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let bus = Arc::new(RecordingBus::default());
    let cancel = CancellationToken::new();

    let mut config = ClientConfig::new(&path);
    config.reconnect_delay = Duration::from_millis(20);
    let (_handle, tasks) = spawn(config, "metamanager", bus.clone(), cancel.clone());

    let (mut peer, _) = listener.accept().await.unwrap();
    peer.write_all(&frame("before", json!(1))).await.unwrap();
    bus.wait_for(1).await;
    drop(peer);

    let (mut peer, _) = listener.accept().await.unwrap();
    peer.write_all(&frame("after", json!(2))).await.unwrap();
    let sent = bus.wait_for(2).await;
    assert_eq!(sent[1].1.id(), "after");

    cancel.cancel();
    tasks.join().await.unwrap();
}

struct PanickingBus;

impl Bus for PanickingBus {
    fn send(&self, _module: &str, _message: Message) -> Result<(), BusError> {
        panic!("bus exploded");
    }
}

#[tokio::test]
async fn join_reports_a_panicked_dispatcher() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edgemesh.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let cancel = CancellationToken::new();
    let (handle, tasks) = spawn(ClientConfig::new(&path), "metamanager", Arc::new(PanickingBus), cancel.clone());

    let (mut peer, _) = listener.accept().await.unwrap();
    peer.write_all(&frame("boom", json!(1))).await.unwrap();
    while !tasks.dispatcher.is_finished() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // Later frames find no consumer and are counted as dropped.
    peer.write_all(&frame("after", json!(2))).await.unwrap();
    while handle.stats().dropped() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    cancel.cancel();
    let err = tasks.join().await.unwrap_err();
    assert!(err.is_panic());
}
