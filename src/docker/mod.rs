//! Container runtime access.
//!
//! [`ContainerRuntime`] is everything the rest of the crate needs from a container
//! engine: the running containers, per-container details (primary pid and mounts)
//! and a stream of lifecycle events. [`DockerClient`] implements it against the
//! Docker Engine API.
mod client;
mod error;
mod models;

use std::future::Future;

pub use client::{DockerClient, EventStream};
pub use error::{Error, Result};
pub use models::{ContainerEvent, ContainerSummary, EventAction};

use crate::container::{Container, ContainerID};

/// Address of the Docker daemon when `DOCKER_HOST` is unset.
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

pub trait ContainerRuntime: Send + Sync {
    type Events: EventSource;

    /// Lists the currently running containers.
    fn list_containers(&self) -> impl Future<Output = Result<Vec<ContainerSummary>>> + Send;

    /// Fetches pid and mounts of a container.
    ///
    /// A container that does not exist (anymore) yields [`Error::NotFound`].
    fn inspect(&self, id: &ContainerID) -> impl Future<Output = Result<Container>> + Send;

    /// Subscribes to container `start` and `destroy` events.
    fn subscribe(&self) -> impl Future<Output = Result<Self::Events>> + Send;
}

pub trait EventSource: Send {
    /// Next event, `None` once the runtime closed the stream.
    fn next_event(&mut self) -> impl Future<Output = Result<Option<ContainerEvent>>> + Send;
}
