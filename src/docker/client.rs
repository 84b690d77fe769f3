use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use http_body_util::{BodyExt, Empty};
use hyper::body::{Body, Incoming};
use hyper::http::uri::PathAndQuery;
use hyper_util::client::legacy::Client;
use hyperlocal::UnixConnector;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::de::DeserializeOwned;

use crate::container::{Container, ContainerID};

use super::models::{ContainerInspect, ErrorMessage, EventMessage};
use super::{ContainerEvent, ContainerRuntime, ContainerSummary, Error, EventSource, Result};

type HyperClient = Client<UnixConnector, Empty<Bytes>>;

/// Value of the `filters` query parameter of `/events`.
fn event_filters() -> String {
    let filters = serde_json::json!({
        "type": ["container"],
        "event": ["start", "destroy"],
    });
    utf8_percent_encode(&filters.to_string(), NON_ALPHANUMERIC).to_string()
}

/// Docker Engine API client talking HTTP/1.1 over the daemon's unix socket.
#[derive(Debug, Clone)]
pub struct DockerClient {
    client: HyperClient,
    socket_path: PathBuf,
    /// Either empty or `/v<version>`.
    api_prefix: String,
}

impl DockerClient {
    pub fn new(socket_path: impl Into<PathBuf>, api_version: Option<&str>) -> Self {
        let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build(UnixConnector);

        Self {
            client,
            socket_path: socket_path.into(),
            api_prefix: api_version
                .map(|v| format!("/v{}", v.trim_start_matches('v')))
                .unwrap_or_default(),
        }
    }

    /// Creates a client from a `DOCKER_HOST` style address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHost`] for anything but a `unix://` address.
    pub fn from_host(host: &str, api_version: Option<&str>) -> Result<Self> {
        match host.strip_prefix("unix://") {
            Some(path) if !path.is_empty() => Ok(Self::new(path, api_version)),
            _ => Err(Error::InvalidHost(host.to_owned())),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Checks that the daemon is reachable.
    pub async fn ping(&self) -> Result<()> {
        let response = self.get("/_ping").await?;
        response
            .into_body()
            .collect()
            .await
            .map_err(|err| Error::Body(Box::new(err)))?;
        Ok(())
    }

    fn uri(&self, path_and_query: &str) -> Result<hyper::Uri> {
        let path_and_query = format!("{}{}", self.api_prefix, path_and_query);
        // hyperlocal panics on an invalid path
        if let Err(err) = path_and_query.parse::<PathAndQuery>() {
            return Err(Error::InvalidUri {
                reason: err.to_string(),
                uri: path_and_query,
            });
        }
        Ok(hyperlocal::Uri::new(&self.socket_path, &path_and_query).into())
    }

    /// Performs a `GET` and turns non-2xx responses into errors.
    async fn get(&self, path_and_query: &str) -> Result<hyper::Response<Incoming>> {
        let mut req = hyper::Request::new(Empty::<Bytes>::new());
        *req.uri_mut() = self.uri(path_and_query)?;
        log::trace!("GET {path_and_query}");

        let response = self.client.request(req).await.map_err(|source| {
            if source.is_connect() {
                Error::Connect {
                    path: self.socket_path.clone(),
                    source,
                }
            } else {
                Error::Request(source)
            }
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|err| Error::Body(Box::new(err)))?
            .to_bytes();
        let message = serde_json::from_slice::<ErrorMessage>(&body)
            .map(|e| e.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_owned());

        if status == hyper::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(message));
        }
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str, what: &'static str) -> Result<T> {
        let body = self
            .get(path_and_query)
            .await?
            .into_body()
            .collect()
            .await
            .map_err(|err| Error::Body(Box::new(err)))?
            .to_bytes();
        serde_json::from_slice(&body).map_err(|source| Error::Decode { what, source })
    }
}

impl ContainerRuntime for DockerClient {
    type Events = EventStream<Incoming>;

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        self.get_json("/containers/json", "container list").await
    }

    async fn inspect(&self, id: &ContainerID) -> Result<Container> {
        let inspect: ContainerInspect = self
            .get_json(&format!("/containers/{id}/json"), "container details")
            .await?;
        Ok(inspect.into())
    }

    async fn subscribe(&self) -> Result<Self::Events> {
        let response = self
            .get(&format!("/events?filters={}", event_filters()))
            .await?;
        log::debug!("Subscribed to docker container events");
        Ok(EventStream::new(response.into_body()))
    }
}

/// Splits a byte stream into newline terminated lines.
#[derive(Debug, Default)]
struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete line without its terminator, skipping blank lines.
    fn next_line(&mut self) -> Option<Bytes> {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line = self.buf.split_to(pos + 1).freeze();
            line.truncate(pos);
            if !line.trim_ascii().is_empty() {
                return Some(line);
            }
        }
        None
    }

    /// Whatever is left once the stream has ended.
    fn take_remainder(&mut self) -> Option<Bytes> {
        let rest = self.buf.split().freeze();
        (!rest.trim_ascii().is_empty()).then_some(rest)
    }
}

/// Container events decoded from the daemon's newline delimited JSON stream.
pub struct EventStream<B> {
    body: B,
    lines: LineBuffer,
    finished: bool,
}

impl<B> EventStream<B> {
    pub fn new(body: B) -> Self {
        Self {
            body,
            lines: LineBuffer::default(),
            finished: false,
        }
    }
}

fn decode_event(line: &[u8]) -> Result<ContainerEvent> {
    serde_json::from_slice::<EventMessage>(line)
        .map(ContainerEvent::from)
        .map_err(|source| Error::Decode {
            what: "container event",
            source,
        })
}

impl<B> EventSource for EventStream<B>
where
    B: Body<Data = Bytes> + Send + Unpin,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    /// Returns `Ok(None)` once the daemon closed the stream.
    async fn next_event(&mut self) -> Result<Option<ContainerEvent>> {
        loop {
            if let Some(line) = self.lines.next_line() {
                return decode_event(&line).map(Some);
            }
            if self.finished {
                return match self.lines.take_remainder() {
                    Some(rest) => decode_event(&rest).map(Some),
                    None => Ok(None),
                };
            }

            match self.body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        self.lines.push(&data);
                    }
                }
                Some(Err(err)) => return Err(Error::Body(err.into())),
                None => self.finished = true,
            }
        }
    }
}
