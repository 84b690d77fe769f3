//! Container lifecycle tracking.
use std::convert::Infallible;

use crate::cgroup::CgroupBackend;
use crate::container::ContainerID;
use crate::device::DeviceInspector;
use crate::docker::{self, ContainerRuntime, EventAction, EventSource};
use crate::processor::{self, Processor};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to list running containers: {0}")]
    List(#[source] docker::Error),
    #[error("failed to subscribe to container events: {0}")]
    Subscribe(#[source] docker::Error),
    #[error("container event stream failed: {0}")]
    Stream(#[source] docker::Error),
    #[error("container event stream ended")]
    StreamEnded,
    #[error(transparent)]
    Process(#[from] processor::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Grants devices to already running containers, then to every container that
/// starts afterwards.
pub struct Watcher<R, C, I> {
    runtime: R,
    processor: Processor<C, I>,
}

impl<R, C, I> Watcher<R, C, I>
where
    R: ContainerRuntime,
    C: CgroupBackend,
    I: DeviceInspector,
{
    pub fn new(runtime: R, processor: Processor<C, I>) -> Self {
        Self { runtime, processor }
    }

    pub fn processor(&self) -> &Processor<C, I> {
        &self.processor
    }

    /// Runs until the event stream fails or ends, both of which are errors.
    ///
    /// The subscription is opened before the running containers are listed so
    /// that no container starting in between is missed.
    pub async fn run(&self) -> Result<Infallible> {
        let mut events = self.runtime.subscribe().await.map_err(Error::Subscribe)?;
        self.bootstrap().await?;
        self.watch(&mut events).await
    }

    /// Processes every running container once, returns how many were processed.
    pub async fn bootstrap(&self) -> Result<usize> {
        let containers = self.runtime.list_containers().await.map_err(Error::List)?;
        log::info!("Found {} running containers", containers.len());

        for container in &containers {
            log::info!(
                "Checking existing container {} {}",
                container.id.short(),
                container.image
            );
            self.process(&container.id).await?;
        }
        Ok(containers.len())
    }

    /// Handles events of `events` until it fails or ends.
    pub async fn watch<E: EventSource>(&self, events: &mut E) -> Result<Infallible> {
        loop {
            let event = match events.next_event().await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(Error::StreamEnded),
                Err(err) => return Err(Error::Stream(err)),
            };

            match event.action {
                EventAction::Start => {
                    log::info!("Container {} started", event.id.short());
                    self.process(&event.id).await?;
                }
                EventAction::Destroy => {
                    let forgotten = self.processor.ledger().forget(&event.id);
                    log::debug!(
                        "Container {} destroyed, forgot {} granted device(s)",
                        event.id.short(),
                        forgotten
                    );
                }
                EventAction::Other(action) => {
                    log::trace!("ignoring `{action}` event for {}", event.id.short());
                }
            }
        }
    }

    async fn process(&self, id: &ContainerID) -> Result<()> {
        let report = self.processor.process(&self.runtime, id).await?;
        log::info!("Processed container {}: {}", id.short(), report);
        Ok(())
    }
}
