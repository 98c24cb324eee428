//! Purpose: Blocking HTTP client for search export and entity endpoints.
//! Exports: `Service`, `Namespace`, `ExportOptions`, `ResultsOptions`.
//! Role: Opens result streams over HTTP and hands response bodies to the batch readers.
//! Invariants: The base URL carries no path; every request path is built from segments.
//! Invariants: Response bodies are streamed, never buffered whole, for export and results.
//! Invariants: Namespace owner/app segments never contain path separators.
#![allow(clippy::result_large_err)]

use super::{ApiResult, Entity};
use crate::core::batch::BatchReader;
use crate::core::error::{Error, ErrorKind};
use crate::core::stream::{ResultStream, StreamConfig};
use crate::decode::{AnyDecoder, Format, FormatSets};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;
use url::Url;

#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

#[derive(Clone)]
struct ServiceInner {
    base_url: Url,
    authorization: Option<String>,
    namespace: Option<Namespace>,
    agent: ureq::Agent,
    stream_config: StreamConfig,
}

/// Owner/app scope for `servicesNS` paths; `None` maps to the `-` wildcard.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Namespace {
    pub owner: Option<String>,
    pub app: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ExportOptions {
    pub format: Format,
    pub earliest_time: Option<String>,
    pub latest_time: Option<String>,
    pub max_count: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct ResultsOptions {
    pub format: Format,
    pub offset: Option<u64>,
    pub count: Option<u64>,
}

#[derive(Deserialize)]
struct EntryEnvelope {
    #[serde(default)]
    entry: Vec<RemoteEntry>,
}

#[derive(Deserialize)]
struct RemoteEntry {
    name: String,
    #[serde(default)]
    content: Map<String, Value>,
}

#[derive(Deserialize)]
struct MessagesEnvelope {
    #[serde(default)]
    messages: Vec<RemoteMessage>,
}

#[derive(Deserialize)]
struct RemoteMessage {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

impl Service {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let agent = ureq::AgentBuilder::new().build();
        Ok(Self {
            inner: Arc::new(ServiceInner {
                base_url,
                authorization: None,
                namespace: None,
                agent,
                stream_config: StreamConfig::default(),
            }),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.inner).authorization = Some(format!("Bearer {}", token.into()));
        self
    }

    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        Arc::make_mut(&mut self.inner).authorization = Some(format!("Basic {encoded}"));
        self
    }

    pub fn with_namespace(mut self, owner: Option<&str>, app: Option<&str>) -> ApiResult<Self> {
        for segment in [owner, app].into_iter().flatten() {
            ensure_segment(segment)?;
        }
        Arc::make_mut(&mut self.inner).namespace = Some(Namespace {
            owner: owner.map(str::to_string),
            app: app.map(str::to_string),
        });
        Ok(self)
    }

    pub fn with_stream_config(mut self, config: StreamConfig) -> Self {
        Arc::make_mut(&mut self.inner).stream_config = config;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        self.inner.namespace.as_ref()
    }

    /// Runs a streaming export search and returns its batches as they arrive.
    pub fn export(&self, query: &str, options: &ExportOptions) -> ApiResult<FormatSets> {
        let url = self.endpoint("search/jobs/export")?;
        let search = normalize_query(query);
        let mut form = vec![
            ("output_mode", output_mode(options.format).to_string()),
            ("search", search),
        ];
        if let Some(earliest) = &options.earliest_time {
            form.push(("earliest_time", earliest.clone()));
        }
        if let Some(latest) = &options.latest_time {
            form.push(("latest_time", latest.clone()));
        }
        if let Some(max) = options.max_count {
            form.push(("max_count", max.to_string()));
        }
        let pairs: Vec<(&str, &str)> = form.iter().map(|(k, v)| (*k, v.as_str())).collect();

        debug!(url = %url, format = %options.format, "starting export search");
        let response = self.request("POST", &url).send_form(&pairs);
        let stream = self.open_stream(response)?;
        FormatSets::new(stream, options.format.factory())
    }

    /// Streams the results of a finished search job as a single batch.
    pub fn job_results(
        &self,
        sid: &str,
        options: &ResultsOptions,
    ) -> ApiResult<BatchReader<AnyDecoder>> {
        ensure_segment(sid)?;
        let mut url = self.endpoint(&format!("search/jobs/{sid}/results"))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("output_mode", output_mode(options.format));
            if let Some(offset) = options.offset {
                pairs.append_pair("offset", &offset.to_string());
            }
            if let Some(count) = options.count {
                pairs.append_pair("count", &count.to_string());
            }
        }
        debug!(url = %url, sid, "reading job results");
        let response = self.request("GET", &url).call();
        let stream = self
            .open_stream(response)
            .map_err(|err| err.with_path(sid))?;
        BatchReader::bind(options.format.decoder(), stream).map_err(|err| err.with_path(sid))
    }

    pub fn entity(&self, path: &str) -> ApiResult<Entity> {
        self.entities(path)?.into_iter().next().ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message("no entity at path")
                .with_path(path)
        })
    }

    pub fn entities(&self, path: &str) -> ApiResult<Vec<Entity>> {
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut().append_pair("output_mode", "json");
        let response = self
            .request("GET", &url)
            .set("Accept", "application/json")
            .call();
        let body = match response {
            Ok(resp) => resp.into_string().map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read response body")
                    .with_source(err)
            })?,
            Err(err) => return Err(request_error(err).with_path(path)),
        };
        let envelope: EntryEnvelope = serde_json::from_str(&body).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("invalid entity response json")
                .with_path(path)
                .with_source(err)
        })?;
        let base = path.trim_matches('/');
        Ok(envelope
            .entry
            .into_iter()
            .map(|entry| {
                let entity_path = format!("{base}/{}", entry.name);
                Entity::new(entry.name, entity_path, entry.content)
            })
            .collect())
    }

    fn endpoint(&self, path: &str) -> ApiResult<Url> {
        let mut segments: Vec<&str> = match &self.inner.namespace {
            None => vec!["services"],
            Some(ns) => vec![
                "servicesNS",
                ns.owner.as_deref().unwrap_or("-"),
                ns.app.as_deref().unwrap_or("-"),
            ],
        };
        segments.extend(path.split('/').filter(|segment| !segment.is_empty()));
        build_url(&self.inner.base_url, &segments)
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        let mut request = self.inner.agent.request(method, url.as_str());
        if let Some(authorization) = &self.inner.authorization {
            request = request.set("Authorization", authorization);
        }
        request
    }

    fn open_stream(
        &self,
        response: Result<ureq::Response, ureq::Error>,
    ) -> ApiResult<ResultStream> {
        let response = response.map_err(request_error)?;
        Ok(ResultStream::new(response.into_reader()).with_config(self.inner.stream_config))
    }
}

fn output_mode(format: Format) -> &'static str {
    match format {
        Format::Seq => "json_seq",
        Format::Auto | Format::Export => "json",
    }
}

/// Bare queries get an implicit `search` command; pipelines and explicit commands pass through.
fn normalize_query(query: &str) -> String {
    let trimmed = query.trim_start();
    if trimmed.starts_with('|') || trimmed == "search" || trimmed.starts_with("search ") {
        query.to_string()
    } else {
        format!("search {query}")
    }
}

fn ensure_segment(segment: &str) -> ApiResult<()> {
    if segment.is_empty() || segment.contains('/') {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("'{segment}' is not a valid path segment"))
            .with_hint("Namespace owner, app, and job ids must be non-empty and contain no '/'."));
    }
    Ok(())
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid service base url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("service base url must use http or https scheme"));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(
            Error::new(ErrorKind::Usage).with_message("service base url must not include a path")
        );
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("service base url cannot be a base")
        })?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

fn request_error(err: ureq::Error) -> Error {
    match err {
        ureq::Error::Status(code, resp) => parse_error_response(code, resp),
        ureq::Error::Transport(err) => Error::new(ErrorKind::Io)
            .with_message("request failed")
            .with_source(err),
    }
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    let kind = error_kind_from_status(status);
    let text = serde_json::from_str::<MessagesEnvelope>(&body)
        .ok()
        .map(|envelope| {
            envelope
                .messages
                .into_iter()
                .filter(|message| !message.text.is_empty())
                .map(|message| format!("{}: {}", message.kind, message.text))
                .collect::<Vec<_>>()
                .join("; ")
        })
        .filter(|text| !text.is_empty());
    match text {
        Some(text) => Error::new(kind).with_message(text),
        None => Error::new(kind).with_message(format!("service error status {status}")),
    }
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 => ErrorKind::Usage,
        401 | 403 => ErrorKind::Permission,
        404 => ErrorKind::NotFound,
        500..=599 => ErrorKind::Internal,
        _ => ErrorKind::Io,
    }
}
