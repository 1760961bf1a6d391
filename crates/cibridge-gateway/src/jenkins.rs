//! Jenkins remote API client
//!
//! Implements [`CiGateway`] over the Jenkins JSON API using `reqwest`.
//! Job paths use `/` as folder separator (`team/service/build`) and are
//! mapped onto `/job/team/job/service/job/build`.

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::JenkinsConfig;
use crate::error::GatewayError;
use crate::gateway::{CiGateway, GatewayResult};
use crate::types::{
    ArtifactInfo, ArtifactPayload, BuildInfo, BuildParameters, BuildResult, JobInfo,
    ParameterDefinition, QueueItemState,
};

/// Longest server error body echoed back in an error message.
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Crumb {
    crumb_request_field: String,
    crumb: String,
}

#[derive(Debug, Deserialize)]
struct RawBuildRef {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct RawQueueItem {
    #[serde(default)]
    cancelled: bool,
    executable: Option<RawBuildRef>,
}

impl From<RawQueueItem> for QueueItemState {
    fn from(raw: RawQueueItem) -> Self {
        match raw.executable {
            Some(build) => QueueItemState::Assigned {
                build_number: build.number,
            },
            None if raw.cancelled => QueueItemState::Cancelled,
            None => QueueItemState::Waiting,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBuild {
    number: u64,
    result: Option<String>,
    #[serde(default)]
    building: bool,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    duration: i64,
    #[serde(default)]
    estimated_duration: i64,
    display_name: Option<String>,
    url: Option<String>,
    queue_id: Option<u64>,
}

impl From<RawBuild> for BuildInfo {
    fn from(raw: RawBuild) -> Self {
        BuildInfo {
            number: raw.number,
            result: raw.result.map(BuildResult::from),
            building: raw.building,
            started_at_ms: (raw.timestamp > 0).then_some(raw.timestamp),
            duration_ms: u64::try_from(raw.duration).unwrap_or(0),
            estimated_duration_ms: u64::try_from(raw.estimated_duration)
                .ok()
                .filter(|ms| *ms > 0),
            display_name: raw
                .display_name
                .unwrap_or_else(|| format!("#{}", raw.number)),
            url: raw.url.unwrap_or_default(),
            queue_id: raw.queue_id.filter(|id| *id > 0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDefaultValue {
    #[serde(default)]
    value: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawParameter {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    description: Option<String>,
    default_parameter_value: Option<RawDefaultValue>,
    choices: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProperty {
    #[serde(default)]
    parameter_definitions: Vec<RawParameter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawJob {
    full_name: Option<String>,
    last_build: Option<RawBuildRef>,
    #[serde(default)]
    builds: Vec<RawBuildRef>,
    #[serde(default)]
    property: Vec<RawProperty>,
}

impl RawJob {
    fn into_job_info(self, job_name: &str) -> JobInfo {
        let parameters = self
            .property
            .into_iter()
            .flat_map(|p| p.parameter_definitions)
            .map(|p| ParameterDefinition {
                name: p.name,
                kind: p.kind,
                description: p.description.unwrap_or_default(),
                default_value: p.default_parameter_value.and_then(|d| d.value),
                choices: p.choices,
            })
            .collect();

        JobInfo {
            name: self.full_name.unwrap_or_else(|| job_name.to_string()),
            last_build: self.last_build.map(|b| b.number),
            recent_builds: self.builds.into_iter().map(|b| b.number).collect(),
            parameters,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    relative_path: String,
}

#[derive(Debug, Deserialize)]
struct RawArtifactList {
    #[serde(default)]
    artifacts: Vec<RawArtifact>,
}

/// Extract the queue item id from a `Location` header such as
/// `https://ci.example.com/queue/item/123/`.
pub fn parse_queue_location(location: &str) -> Option<u64> {
    let trimmed = location.trim_end_matches('/');
    let (prefix, id) = trimmed.rsplit_once('/')?;
    if !prefix.ends_with("/queue/item") {
        return None;
    }
    id.parse().ok()
}

/// Jenkins client for the gateway operations
pub struct JenkinsClient {
    config: JenkinsConfig,
    base: Url,
    http_client: reqwest::Client,
    crumb: OnceCell<Option<Crumb>>,
}

impl JenkinsClient {
    /// Create a new Jenkins client
    pub fn new(config: JenkinsConfig) -> GatewayResult<Self> {
        let base = Url::parse(&config.url).map_err(|e| {
            GatewayError::Config(format!("invalid Jenkins URL {}: {}", config.url, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(GatewayError::Config(format!(
                "Jenkins URL {} cannot carry a path",
                config.url
            )));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("cibridge/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(JenkinsClient {
            config,
            base,
            http_client,
            crumb: OnceCell::new(),
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> GatewayResult<Self> {
        Self::new(JenkinsConfig::from_env()?)
    }

    pub fn config(&self) -> &JenkinsConfig {
        &self.config
    }

    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> GatewayResult<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| GatewayError::Config("Jenkins URL cannot carry a path".to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    /// URL below a (possibly nested) job.
    pub fn job_url(&self, job_name: &str, tail: &[&str]) -> GatewayResult<Url> {
        let mut segments = Vec::new();
        for part in job_name.split('/').filter(|p| !p.is_empty()) {
            segments.push("job");
            segments.push(part);
        }
        if segments.is_empty() {
            return Err(GatewayError::NotFound(format!("job '{job_name}'")));
        }
        segments.extend_from_slice(tail);
        self.url(segments)
    }

    fn build_url(&self, job_name: &str, build_number: u64, tail: &[&str]) -> GatewayResult<Url> {
        let number = build_number.to_string();
        let mut segments = vec![number.as_str()];
        segments.extend_from_slice(tail);
        self.job_url(job_name, &segments)
    }

    fn artifact_url(&self, job_name: &str, build_number: u64, path: &str) -> GatewayResult<Url> {
        let mut tail = vec!["artifact"];
        tail.extend(path.split('/').filter(|p| !p.is_empty()));
        self.build_url(job_name, build_number, &tail)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http_client.request(method, url);
        match &self.config.username {
            Some(user) => request.basic_auth(user, self.config.api_token.as_deref()),
            None => request,
        }
    }

    async fn crumb(&self) -> GatewayResult<Option<Crumb>> {
        self.crumb
            .get_or_try_init(|| async {
                let url = self.url(["crumbIssuer", "api", "json"])?;
                match self.get_json::<Crumb>(url, "crumb issuer").await {
                    Ok(crumb) => Ok(Some(crumb)),
                    Err(GatewayError::NotFound(_)) => {
                        debug!("Jenkins has no crumb issuer; posting without CSRF crumb");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .await
            .cloned()
    }

    async fn post(&self, url: Url) -> GatewayResult<RequestBuilder> {
        let mut request = self.request(Method::POST, url);
        if let Some(crumb) = self.crumb().await? {
            request = request.header(crumb.crumb_request_field.as_str(), crumb.crumb.as_str());
        }
        Ok(request)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> GatewayResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(what.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let mut message: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
        if message.is_empty() {
            message = status.canonical_reason().unwrap_or("no reason").to_string();
        }

        if status.is_server_error() {
            warn!(status = status.as_u16(), target_ref = %what, "Jenkins server error");
            Err(GatewayError::Transient(format!(
                "{what}: HTTP {}: {message}",
                status.as_u16()
            )))
        } else {
            Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: format!("{what}: {message}"),
            })
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> GatewayResult<T> {
        debug!(url = %url, "GET");
        let response = self.send(self.request(Method::GET, url), what).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn artifact_size(&self, job_name: &str, build_number: u64, path: &str) -> Option<u64> {
        let url = self.artifact_url(job_name, build_number, path).ok()?;
        let response = self
            .send(self.request(Method::HEAD, url), path)
            .await
            .ok()?;
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }
}

fn job_ref(job_name: &str) -> String {
    format!("job '{job_name}'")
}

fn build_ref(job_name: &str, build_number: u64) -> String {
    format!("build #{build_number} of job '{job_name}'")
}

#[async_trait]
impl CiGateway for JenkinsClient {
    async fn submit_build(
        &self,
        job_name: &str,
        parameters: &BuildParameters,
    ) -> GatewayResult<u64> {
        let endpoint = if parameters.is_empty() {
            "build"
        } else {
            "buildWithParameters"
        };
        let url = self.job_url(job_name, &[endpoint])?;
        debug!(url = %url, params = parameters.len(), "POST");

        let mut request = self.post(url).await?;
        if !parameters.is_empty() {
            request = request.form(parameters);
        }
        let response = self.send(request, &job_ref(job_name)).await?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                GatewayError::Decode(format!(
                    "submit of {} returned no Location header",
                    job_ref(job_name)
                ))
            })?;

        parse_queue_location(location).ok_or_else(|| {
            GatewayError::Decode(format!("unexpected queue location: {location}"))
        })
    }

    async fn get_queue_item(&self, queue_item_id: u64) -> GatewayResult<QueueItemState> {
        let id = queue_item_id.to_string();
        let url = self.url(["queue", "item", id.as_str(), "api", "json"])?;
        let raw: RawQueueItem = self
            .get_json(url, &format!("queue item {queue_item_id}"))
            .await?;
        Ok(raw.into())
    }

    async fn cancel_queue_item(&self, queue_item_id: u64) -> GatewayResult<()> {
        let mut url = self.url(["queue", "cancelItem"])?;
        url.query_pairs_mut()
            .append_pair("id", &queue_item_id.to_string());
        debug!(url = %url, "POST");
        let request = self.post(url).await?;
        self.send(request, &format!("queue item {queue_item_id}"))
            .await?;
        Ok(())
    }

    async fn get_job(&self, job_name: &str) -> GatewayResult<JobInfo> {
        let url = self.job_url(job_name, &["api", "json"])?;
        let raw: RawJob = self.get_json(url, &job_ref(job_name)).await?;
        Ok(raw.into_job_info(job_name))
    }

    async fn get_build(&self, job_name: &str, build_number: u64) -> GatewayResult<BuildInfo> {
        let url = self.build_url(job_name, build_number, &["api", "json"])?;
        let raw: RawBuild = self
            .get_json(url, &build_ref(job_name, build_number))
            .await?;
        Ok(raw.into())
    }

    async fn get_console_text(&self, job_name: &str, build_number: u64) -> GatewayResult<String> {
        let url = self.build_url(job_name, build_number, &["consoleText"])?;
        debug!(url = %url, "GET");
        let response = self
            .send(
                self.request(Method::GET, url),
                &build_ref(job_name, build_number),
            )
            .await?;
        Ok(response.text().await?)
    }

    async fn list_artifacts(
        &self,
        job_name: &str,
        build_number: u64,
    ) -> GatewayResult<Vec<ArtifactInfo>> {
        let paths = self.list_artifact_paths(job_name, build_number).await?;
        let sizes = join_all(
            paths
                .iter()
                .map(|path| self.artifact_size(job_name, build_number, path)),
        )
        .await;

        Ok(paths
            .into_iter()
            .zip(sizes)
            .map(|(path, size)| ArtifactInfo { path, size })
            .collect())
    }

    async fn list_artifact_paths(
        &self,
        job_name: &str,
        build_number: u64,
    ) -> GatewayResult<Vec<String>> {
        let mut url = self.build_url(job_name, build_number, &["api", "json"])?;
        url.query_pairs_mut()
            .append_pair("tree", "artifacts[relativePath,fileName]");
        let raw: RawArtifactList = self
            .get_json(url, &build_ref(job_name, build_number))
            .await?;
        Ok(raw
            .artifacts
            .into_iter()
            .map(|a| a.relative_path)
            .collect())
    }

    async fn get_artifact(
        &self,
        job_name: &str,
        build_number: u64,
        path: &str,
    ) -> GatewayResult<ArtifactPayload> {
        let url = self.artifact_url(job_name, build_number, path)?;
        debug!(url = %url, "GET");
        let what = format!("artifact '{path}' of {}", build_ref(job_name, build_number));
        let response = self.send(self.request(Method::GET, url), &what).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let bytes = response.bytes().await?.to_vec();
        Ok(ArtifactPayload {
            bytes,
            content_type,
        })
    }

    async fn stop_build(&self, job_name: &str, build_number: u64) -> GatewayResult<()> {
        let url = self.build_url(job_name, build_number, &["stop"])?;
        debug!(url = %url, "POST");
        let request = self.post(url).await?;
        self.send(request, &build_ref(job_name, build_number))
            .await?;
        Ok(())
    }
}
