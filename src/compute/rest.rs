use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};

use super::{ComputeApi, Instance, InstanceRef, wire};
use crate::error::GshError;
use crate::metadata::MetadataBag;

pub const DEFAULT_COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";

const OPERATION_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Compute Engine v1 over HTTPS.
pub struct RestCompute {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl RestCompute {
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self, GshError> {
        let client = Client::builder()
            .user_agent(concat!("gsh/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GshError::Api {
                resource: endpoint.to_string(),
                status: None,
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_text(&self, url: &str, resource: &str) -> Result<String, GshError> {
        tracing::debug!(%url, "GET");
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| transport_error(resource, e))?;
        read_body(resource, response).await
    }

    async fn post_json(&self, url: &str, resource: &str, body: String) -> Result<String, GshError> {
        tracing::debug!(%url, "POST");
        let response = self
            .authorize(self.client.post(url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(resource, e))?;
        read_body(resource, response).await
    }

    /// POST a mutation and block until the returned operation is DONE.
    async fn mutate(&self, url: &str, resource: &str, body: String) -> Result<(), GshError> {
        let text = self.post_json(url, resource, body).await?;
        let mut operation: wire::Operation =
            facet_json::from_str(&text).map_err(|e| decode_error(resource, e))?;

        loop {
            if operation.status == "DONE" {
                return operation_result(resource, &operation);
            }
            if operation.self_link.is_empty() {
                return Err(GshError::Api {
                    resource: resource.to_string(),
                    status: None,
                    message: format!("operation {} has no selfLink", operation.name),
                });
            }
            tokio::time::sleep(OPERATION_POLL_INTERVAL).await;
            let text = self.get_text(&operation.self_link, resource).await?;
            operation = facet_json::from_str(&text).map_err(|e| decode_error(resource, e))?;
        }
    }
}

impl ComputeApi for RestCompute {
    async fn get_project_metadata(&self, project: &str) -> Result<MetadataBag, GshError> {
        let resource = format!("projects/{project}");
        let url = format!("{}/{resource}", self.endpoint);
        let text = self.get_text(&url, &resource).await?;
        let parsed: wire::Project =
            facet_json::from_str(&text).map_err(|e| decode_error(&resource, e))?;
        Ok(MetadataBag::from_wire(parsed.common_instance_metadata))
    }

    async fn set_project_metadata(
        &self,
        project: &str,
        bag: &MetadataBag,
    ) -> Result<(), GshError> {
        let resource = format!("projects/{project}");
        let url = format!("{}/{resource}/setCommonInstanceMetadata", self.endpoint);
        let body = encode(&resource, &bag.to_wire())?;
        self.mutate(&url, &resource, body).await
    }

    async fn get_instance(&self, instance: &InstanceRef) -> Result<Instance, GshError> {
        let resource = instance.to_string();
        let url = format!("{}/{resource}", self.endpoint);
        let text = self.get_text(&url, &resource).await?;
        let parsed: wire::Instance =
            facet_json::from_str(&text).map_err(|e| decode_error(&resource, e))?;
        Ok(Instance::from_wire(parsed))
    }

    async fn set_instance_metadata(
        &self,
        instance: &InstanceRef,
        bag: &MetadataBag,
    ) -> Result<(), GshError> {
        let resource = instance.to_string();
        let url = format!("{}/{resource}/setMetadata", self.endpoint);
        let body = encode(&resource, &bag.to_wire())?;
        self.mutate(&url, &resource, body).await
    }

    async fn insert_instance(
        &self,
        project: &str,
        zone: &str,
        request: &wire::InstanceInsert,
    ) -> Result<(), GshError> {
        let resource = format!("projects/{project}/zones/{zone}/instances/{}", request.name);
        let url = format!("{}/projects/{project}/zones/{zone}/instances", self.endpoint);
        let body = facet_json::to_string(request).map_err(|e| GshError::Api {
            resource: resource.clone(),
            status: None,
            message: format!("failed to encode request: {e}"),
        })?;
        self.mutate(&url, &resource, body).await
    }
}

// ── helpers ───────────────────────────────────────────────

fn encode(resource: &str, metadata: &wire::Metadata) -> Result<String, GshError> {
    facet_json::to_string(metadata).map_err(|e| GshError::Api {
        resource: resource.to_string(),
        status: None,
        message: format!("failed to encode metadata: {e}"),
    })
}

async fn read_body(resource: &str, response: Response) -> Result<String, GshError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| transport_error(resource, e))?;
    if status.is_success() {
        return Ok(text);
    }

    let message = match facet_json::from_str::<wire::ErrorBody>(&text) {
        Ok(body) if !body.error.message.is_empty() => body.error.message,
        _ => format!("HTTP {status}"),
    };
    Err(GshError::Api {
        resource: resource.to_string(),
        status: Some(status.as_u16()),
        message,
    })
}

pub(crate) fn operation_result(resource: &str, operation: &wire::Operation) -> Result<(), GshError> {
    match &operation.error {
        Some(err) if !err.errors.is_empty() => Err(GshError::Api {
            resource: resource.to_string(),
            status: None,
            message: err
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect::<Vec<_>>()
                .join("; "),
        }),
        _ => Ok(()),
    }
}

fn transport_error(resource: &str, e: reqwest::Error) -> GshError {
    GshError::Api {
        resource: resource.to_string(),
        status: e.status().map(|s| s.as_u16()),
        message: format!("request failed: {e}"),
    }
}

fn decode_error(resource: &str, e: impl std::fmt::Display) -> GshError {
    GshError::Api {
        resource: resource.to_string(),
        status: None,
        message: format!("unexpected response: {e}"),
    }
}
