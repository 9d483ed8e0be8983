//! Endpoint lookup for recovered pods.
//!
//! The local metaserver serves the node's view of the Endpoints list. When a
//! pod recovers, only the addresses backed by that pod are sent to the mesh
//! agent.

use async_trait::async_trait;
use serde_json::Value;

pub const DEFAULT_ENDPOINTS_URL: &str = "http://127.0.0.1:10550/api/v1/endpoints";

#[derive(Debug, thiserror::Error)]
pub enum EndpointsError {
    #[error("endpoints request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed endpoints list: {0}")]
    Malformed(&'static str),
}

/// Source of the current Endpoints list as JSON.
#[async_trait]
pub trait EndpointSource: Send + Sync {
    async fn fetch(&self) -> Result<Value, EndpointsError>;
}

/// Fetches the list over HTTP.
#[derive(Debug, Clone)]
pub struct HttpEndpoints {
    client: reqwest::Client,
    url: String,
}

impl HttpEndpoints {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl EndpointSource for HttpEndpoints {
    async fn fetch(&self) -> Result<Value, EndpointsError> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Keep only addresses whose `targetRef` is the Pod `pod_name`.
///
/// Subsets left without addresses are dropped, as are endpoints left without
/// subsets. Every other field is preserved.
pub fn filter_by_pod(mut list: Value, pod_name: &str) -> Result<Value, EndpointsError> {
    let Some(object) = list.as_object_mut() else {
        return Err(EndpointsError::Malformed("expected an object"));
    };
    let items = match object.remove("items") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(EndpointsError::Malformed("items is not an array")),
    };

    let filtered: Vec<Value> = items
        .into_iter()
        .filter_map(|endpoint| filter_endpoint(endpoint, pod_name))
        .collect();
    object.insert("items".to_string(), Value::Array(filtered));
    Ok(list)
}

fn filter_endpoint(mut endpoint: Value, pod_name: &str) -> Option<Value> {
    let subsets = endpoint.get_mut("subsets")?.as_array_mut()?;
    subsets.retain_mut(|subset| {
        let Some(addresses) = subset.get_mut("addresses").and_then(Value::as_array_mut) else {
            return false;
        };
        addresses.retain(|address| targets_pod(address, pod_name));
        !addresses.is_empty()
    });
    if subsets.is_empty() {
        return None;
    }
    Some(endpoint)
}

fn targets_pod(address: &Value, pod_name: &str) -> bool {
    let Some(target) = address.get("targetRef") else {
        return false;
    };
    target.get("kind").and_then(Value::as_str) == Some("Pod")
        && target.get("name").and_then(Value::as_str) == Some(pod_name)
}
