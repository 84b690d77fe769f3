//! Wire types of the Docker Engine API subset used here.
use std::fmt;

use serde::Deserialize;

use crate::container::{Container, ContainerID, Mount};

/// Entry of `GET /containers/json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContainerSummary {
    #[serde(rename = "Id")]
    pub id: ContainerID,
    #[serde(rename = "Image", default)]
    pub image: String,
}

/// Body of `GET /containers/{id}/json`.
#[derive(Debug, Deserialize)]
pub(super) struct ContainerInspect {
    #[serde(rename = "Id")]
    id: ContainerID,
    #[serde(rename = "State")]
    state: ContainerState,
    #[serde(rename = "Mounts", default)]
    mounts: Vec<MountPoint>,
}

#[derive(Debug, Deserialize)]
struct ContainerState {
    #[serde(rename = "Pid", default)]
    pid: u32,
}

#[derive(Debug, Deserialize)]
struct MountPoint {
    #[serde(rename = "Source", default)]
    source: String,
    #[serde(rename = "Destination")]
    destination: String,
}

impl From<ContainerInspect> for Container {
    fn from(inspect: ContainerInspect) -> Self {
        Container {
            id: inspect.id,
            pid: inspect.state.pid,
            mounts: inspect
                .mounts
                .into_iter()
                .map(|m| Mount::new(m.source, m.destination))
                .collect(),
        }
    }
}

/// Error body returned by the daemon for non-2xx responses.
#[derive(Debug, Deserialize)]
pub(super) struct ErrorMessage {
    pub message: String,
}

/// Container lifecycle event actions this crate reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    Start,
    Destroy,
    Other(String),
}

impl From<&str> for EventAction {
    fn from(action: &str) -> Self {
        match action {
            "start" => EventAction::Start,
            "destroy" => EventAction::Destroy,
            other => EventAction::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventAction::Start => f.write_str("start"),
            EventAction::Destroy => f.write_str("destroy"),
            EventAction::Other(other) => f.write_str(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub action: EventAction,
    pub id: ContainerID,
}

/// One line of the `GET /events` stream.
#[derive(Debug, Deserialize)]
pub(super) struct EventMessage {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Actor")]
    actor: EventActor,
}

#[derive(Debug, Deserialize)]
struct EventActor {
    #[serde(rename = "ID")]
    id: ContainerID,
}

impl From<EventMessage> for ContainerEvent {
    fn from(msg: EventMessage) -> Self {
        ContainerEvent {
            action: EventAction::from(msg.action.as_str()),
            id: msg.actor.id,
        }
    }
}
