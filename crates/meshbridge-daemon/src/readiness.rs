//! Pod readiness patches relayed to the mesh agent.
//!
//! While the node is cut off from the cloud, pod status patches are turned
//! into mesh broadcasts: a pod that stops being ready is announced by name
//! once, and when it recovers the agent receives the endpoints it backs.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use meshbridge_client::{ClientError, ClientHandle};
use meshbridge_core::{ContentError, Message};
use serde::Deserialize;
use tracing::info;

use crate::endpoints::{EndpointSource, EndpointsError, filter_by_pod};

/// Route group of the mesh agent.
pub const MESH_GROUP: &str = "edgemesh";
const PATCH_RESOURCE: &str = "pods";
const PATCH_OPERATION: &str = "patch";

#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("pod document: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Endpoints(#[from] EndpointsError),
    #[error("failed to notify mesh agent: {0}")]
    Send(#[from] ClientError),
}

/// Something that can deliver a message to the mesh agent.
#[async_trait]
pub trait Peer: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), ClientError>;
}

#[async_trait]
impl Peer for ClientHandle {
    async fn send(&self, message: Message) -> Result<(), ClientError> {
        ClientHandle::send(self, message).await
    }
}

#[derive(Debug, Default, Deserialize)]
struct Pod {
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default, rename = "containerStatuses")]
    container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Deserialize)]
struct ContainerStatus {
    #[serde(default)]
    ready: bool,
}

/// Whether every container of the pod in `document` reports ready.
pub fn pod_is_ready(document: &[u8]) -> Result<bool, serde_json::Error> {
    let pod: Pod = serde_json::from_slice(document)?;
    Ok(pod.status.container_statuses.iter().all(|c| c.ready))
}

/// Last segment of a `/`-separated resource path.
pub fn resource_name(resource: &str) -> &str {
    resource.rsplit('/').next().unwrap_or(resource)
}

/// Whether `message` is a pod status patch.
pub fn is_pod_patch(message: &Message) -> bool {
    message.operation() == PATCH_OPERATION && message.resource().split('/').any(|s| s == "pod")
}

/// Pods currently announced as not ready.
#[derive(Debug, Default)]
pub struct ReadinessTracker {
    not_ready: Mutex<BTreeSet<String>>,
}

impl ReadinessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.not_ready.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns false if the pod was already tracked.
    pub fn insert(&self, pod: &str) -> bool {
        self.lock().insert(pod.to_string())
    }

    pub fn contains(&self, pod: &str) -> bool {
        self.lock().contains(pod)
    }

    /// Returns false if the pod was not tracked.
    pub fn remove(&self, pod: &str) -> bool {
        self.lock().remove(pod)
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }
}

/// What a patch led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// A tracked pod became ready; its endpoints were sent.
    Recovered,
    /// An untracked pod became not ready; its name was sent.
    MarkedNotReady,
    /// Nothing to announce.
    Unchanged,
}

/// Turns pod patches into mesh notifications.
pub struct Readiness {
    node_name: String,
    tracker: ReadinessTracker,
    endpoints: Arc<dyn EndpointSource>,
}

impl std::fmt::Debug for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Readiness")
            .field("node_name", &self.node_name)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl Readiness {
    pub fn new(node_name: impl Into<String>, endpoints: Arc<dyn EndpointSource>) -> Self {
        Self {
            node_name: node_name.into(),
            tracker: ReadinessTracker::new(),
            endpoints,
        }
    }

    pub fn tracker(&self) -> &ReadinessTracker {
        &self.tracker
    }

    fn notification(&self, body: String) -> Message {
        Message::new("")
            .build_router(&self.node_name, MESH_GROUP, PATCH_RESOURCE, PATCH_OPERATION)
            .fill_body(body)
    }

    /// Handle one pod patch whose content is the pod document as a string.
    ///
    /// Tracking only changes once the peer has been told, so a failed fetch
    /// or send is retried on the next patch for the same pod.
    pub async fn process_patch(
        &self,
        message: &Message,
        peer: &dyn Peer,
    ) -> Result<PatchOutcome, ReadinessError> {
        let pod = resource_name(message.resource());
        let ready = pod_is_ready(message.content_str()?.as_bytes())?;
        let tracked = self.tracker.contains(pod);

        if ready && tracked {
            info!(pod, "pod recovered");
            let endpoints = filter_by_pod(self.endpoints.fetch().await?, pod)?;
            let body = serde_json::to_string_pretty(&endpoints)?;
            peer.send(self.notification(body)).await?;
            self.tracker.remove(pod);
            info!(not_ready = ?self.tracker.snapshot(), "pod tracking updated");
            Ok(PatchOutcome::Recovered)
        } else if !ready && !tracked {
            peer.send(self.notification(pod.to_string())).await?;
            self.tracker.insert(pod);
            info!(pod, not_ready = ?self.tracker.snapshot(), "pod not ready");
            Ok(PatchOutcome::MarkedNotReady)
        } else {
            Ok(PatchOutcome::Unchanged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[derive(Default)]
    struct RecordingPeer {
        sent: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl Peer for RecordingPeer {
        async fn send(&self, message: Message) -> Result<(), ClientError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    struct DisconnectedPeer;

    #[async_trait]
    impl Peer for DisconnectedPeer {
        async fn send(&self, _message: Message) -> Result<(), ClientError> {
            Err(ClientError::NotConnected)
        }
    }

    struct StaticEndpoints(Value);

    #[async_trait]
    impl EndpointSource for StaticEndpoints {
        async fn fetch(&self) -> Result<Value, EndpointsError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenEndpoints;

    #[async_trait]
    impl EndpointSource for BrokenEndpoints {
        async fn fetch(&self) -> Result<Value, EndpointsError> {
            Err(EndpointsError::Malformed("unavailable"))
        }
    }

    fn endpoints() -> Arc<dyn EndpointSource> {
        Arc::new(StaticEndpoints(json!({"items": [{"subsets": [{"addresses": [
            {"ip": "10.0.0.1", "targetRef": {"kind": "Pod", "name": "web-0"}},
            {"ip": "10.0.0.2", "targetRef": {"kind": "Pod", "name": "web-1"}}
        ]}]}]})))
    }

    fn patch(ready: bool) -> Message {
        let pod = json!({"status": {"containerStatuses": [{"ready": true}, {"ready": ready}]}});
        Message::new("")
            .build_router("edged", "meta", "default/pod/web-0", "patch")
            .fill_body(pod.to_string())
    }

    #[test]
    fn readiness_requires_every_container() {
        assert!(pod_is_ready(br#"{"status":{"containerStatuses":[{"ready":true}]}}"#).unwrap());
        assert!(!pod_is_ready(br#"{"status":{"containerStatuses":[{"ready":true},{"ready":false}]}}"#).unwrap());
        assert!(pod_is_ready(br#"{"metadata":{"name":"x"}}"#).unwrap());
        assert!(pod_is_ready(b"not json").is_err());
    }

    #[test]
    fn resource_name_takes_last_segment() {
        assert_eq!(resource_name("default/pod/web-0"), "web-0");
        assert_eq!(resource_name("web-0"), "web-0");
        assert_eq!(resource_name(""), "");
    }

    #[test]
    fn detects_pod_patches() {
        assert!(is_pod_patch(&patch(true)));
        let other = Message::new("").build_router("edged", "meta", "default/configmap/x", "patch");
        assert!(!is_pod_patch(&other));
        let update = Message::new("").build_router("edged", "meta", "default/pod/x", "update");
        assert!(!is_pod_patch(&update));
    }

    #[test]
    fn tracker_is_a_set() {
        let tracker = ReadinessTracker::new();
        assert!(tracker.insert("b"));
        assert!(tracker.insert("a"));
        assert!(!tracker.insert("a"));
        assert_eq!(tracker.snapshot(), ["a", "b"]);
        assert!(tracker.remove("a"));
        assert!(!tracker.remove("a"));
        assert!(!tracker.contains("a"));
    }

    #[tokio::test]
    async fn not_ready_pod_is_announced_once() {
        let readiness = Readiness::new("node-a", endpoints());
        let peer = RecordingPeer::default();

        let outcome = readiness.process_patch(&patch(false), &peer).await.unwrap();
        assert_eq!(outcome, PatchOutcome::MarkedNotReady);
        let outcome = readiness.process_patch(&patch(false), &peer).await.unwrap();
        assert_eq!(outcome, PatchOutcome::Unchanged);

        let sent = peer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].route.source, "node-a");
        assert_eq!(sent[0].route.group, MESH_GROUP);
        assert_eq!(sent[0].resource(), "pods");
        assert_eq!(sent[0].operation(), "patch");
        assert_eq!(sent[0].content, "web-0");
        assert!(readiness.tracker().contains("web-0"));
    }

    #[tokio::test]
    async fn recovered_pod_sends_its_endpoints() {
        let readiness = Readiness::new("node-a", endpoints());
        let peer = RecordingPeer::default();

        readiness.process_patch(&patch(false), &peer).await.unwrap();
        let outcome = readiness.process_patch(&patch(true), &peer).await.unwrap();
        assert_eq!(outcome, PatchOutcome::Recovered);
        assert!(!readiness.tracker().contains("web-0"));

        let sent = peer.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        let body: Value = serde_json::from_str(sent[1].content_str().unwrap()).unwrap();
        let addresses = &body["items"][0]["subsets"][0]["addresses"];
        assert_eq!(addresses.as_array().unwrap().len(), 1);
        assert_eq!(addresses[0]["ip"], "10.0.0.1");
    }

    #[tokio::test]
    async fn ready_pod_never_tracked_is_ignored() {
        let readiness = Readiness::new("node-a", endpoints());
        let peer = RecordingPeer::default();
        let outcome = readiness.process_patch(&patch(true), &peer).await.unwrap();
        assert_eq!(outcome, PatchOutcome::Unchanged);
        assert!(peer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn endpoint_failure_keeps_pod_tracked() {
        let readiness = Readiness::new("node-a", Arc::new(BrokenEndpoints));
        let peer = RecordingPeer::default();
        readiness.process_patch(&patch(false), &peer).await.unwrap();

        let err = readiness.process_patch(&patch(true), &peer).await.unwrap_err();
        assert!(matches!(err, ReadinessError::Endpoints(_)));
        assert!(readiness.tracker().contains("web-0"));
    }

    #[tokio::test]
    async fn failed_send_leaves_tracking_unchanged() {
        let readiness = Readiness::new("node-a", endpoints());
        let err = readiness
            .process_patch(&patch(false), &DisconnectedPeer)
            .await
            .unwrap_err();
        assert!(matches!(err, ReadinessError::Send(ClientError::NotConnected)));
        assert!(!readiness.tracker().contains("web-0"));

        let peer = RecordingPeer::default();
        let outcome = readiness.process_patch(&patch(false), &peer).await.unwrap();
        assert_eq!(outcome, PatchOutcome::MarkedNotReady);
    }

    #[tokio::test]
    async fn non_string_content_is_a_type_mismatch() {
        let readiness = Readiness::new("node-a", endpoints());
        let peer = RecordingPeer::default();
        let msg = patch(false).fill_body(json!({"status": {}}));
        let err = readiness.process_patch(&msg, &peer).await.unwrap_err();
        assert!(matches!(
            err,
            ReadinessError::Content(ContentError::TypeMismatch { expected: "string", .. })
        ));
    }
}
