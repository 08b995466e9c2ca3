//! Compute Engine API client
//!
//! Implements the subset of the Compute Engine v1 REST API used to manage
//! zonal VM instances: `/compute/v1/projects/{project}/zones/{zone}/instances`.

use crate::compute_trait::ComputeClientTrait;
use crate::error::ComputeError;
use crate::models::*;
use reqwest::{Client, RequestBuilder, Response};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Default Compute Engine endpoint
pub const DEFAULT_BASE_URL: &str = "https://compute.googleapis.com";

/// Compute Engine API client
pub struct GceClient {
    client: Client,
    base_url: String,
    token: String,
}

// Keeps the bearer token out of logs
impl fmt::Debug for GceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GceClient")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl GceClient {
    /// Create a new Compute Engine client
    ///
    /// # Arguments
    /// * `base_url` - API endpoint (e.g., "https://compute.googleapis.com")
    /// * `token` - OAuth2 access token sent as a bearer token
    pub fn new(base_url: String, token: String) -> Result<Self, ComputeError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn zone_url(&self, project: &str, zone: &str) -> String {
        format!(
            "{}/compute/v1/projects/{}/zones/{}",
            self.base_url,
            urlencoding::encode(project),
            urlencoding::encode(zone)
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
    }

    /// Turns a non-success response into the matching error variant
    async fn check(response: Response) -> Result<Response, ComputeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|envelope| envelope.error.message)
            .unwrap_or(body);
        Err(ComputeError::from_status(status.as_u16(), message))
    }

    async fn decode<T: for<'de> serde::Deserialize<'de>>(response: Response) -> Result<T, ComputeError> {
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Get an instance by name
    pub async fn get_instance(&self, project: &str, zone: &str, name: &str) -> Result<Instance, ComputeError> {
        let url = format!("{}/instances/{}", self.zone_url(project, zone), urlencoding::encode(name));
        debug!("Fetching instance {} in {}/{}", name, project, zone);

        let response = self.authorize(self.client.get(&url)).send().await?;
        let response = Self::check(response).await?;
        Self::decode(response).await
    }

    /// List every instance in a zone
    pub async fn list_instances(&self, project: &str, zone: &str) -> Result<Vec<Instance>, ComputeError> {
        let base = format!("{}/instances", self.zone_url(project, zone));
        let mut all = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let url = match &page_token {
                Some(token) => format!("{}?pageToken={}", base, urlencoding::encode(token)),
                None => base.clone(),
            };
            debug!("Fetching page: {}", url);

            let response = self.authorize(self.client.get(&url)).send().await?;
            let response = Self::check(response).await?;
            let page: InstanceList = Self::decode(response).await?;
            all.extend(page.items);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(all)
    }

    /// Submit an instance insert
    pub async fn insert_instance(&self, project: &str, zone: &str, instance: &Instance) -> Result<Operation, ComputeError> {
        let url = format!("{}/instances", self.zone_url(project, zone));
        debug!("Inserting instance {} in {}/{}", instance.name, project, zone);

        let response = self.authorize(self.client.post(&url)).json(instance).send().await?;
        let response = Self::check(response).await?;
        Self::decode(response).await
    }

    /// Submit an instance delete
    pub async fn delete_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError> {
        let url = format!("{}/instances/{}", self.zone_url(project, zone), urlencoding::encode(name));
        debug!("Deleting instance {} in {}/{}", name, project, zone);

        let response = self.authorize(self.client.delete(&url)).send().await?;
        let response = Self::check(response).await?;
        Self::decode(response).await
    }

    /// Get a zonal operation
    pub async fn get_zone_operation(&self, project: &str, zone: &str, operation: &str) -> Result<Operation, ComputeError> {
        let url = format!("{}/operations/{}", self.zone_url(project, zone), urlencoding::encode(operation));

        let response = self.authorize(self.client.get(&url)).send().await?;
        let response = Self::check(response).await?;
        Self::decode(response).await
    }
}

#[async_trait::async_trait]
impl ComputeClientTrait for GceClient {
    async fn get_instance(&self, project: &str, zone: &str, name: &str) -> Result<Instance, ComputeError> {
        GceClient::get_instance(self, project, zone, name).await
    }

    async fn list_instances(&self, project: &str, zone: &str) -> Result<Vec<Instance>, ComputeError> {
        GceClient::list_instances(self, project, zone).await
    }

    async fn insert_instance(&self, project: &str, zone: &str, instance: &Instance) -> Result<Operation, ComputeError> {
        GceClient::insert_instance(self, project, zone, instance).await
    }

    async fn delete_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError> {
        GceClient::delete_instance(self, project, zone, name).await
    }

    async fn get_zone_operation(&self, project: &str, zone: &str, operation: &str) -> Result<Operation, ComputeError> {
        GceClient::get_zone_operation(self, project, zone, operation).await
    }
}
