/// Device Mapping Manager: grants containers access to the host devices that are
/// bind mounted into them.
///
/// Docker's `--device` flag only covers devices present when a container starts.
/// Bind mounting `/dev/...` paths instead keeps hot-plugged devices visible, but the
/// container's device cgroup still denies access to them. This crate watches the
/// Docker daemon and adds the matching allow rules to each container's device cgroup,
/// on cgroup v1 through `devices.allow` and on cgroup v2 by patching the attached
/// `BPF_CGROUP_DEVICE` programs.
pub mod cgroup;
pub mod config;
pub mod container;
pub mod device;
pub mod docker;
pub mod environment;
pub mod error;
pub mod fsutil;
pub mod grant;
pub mod mountinfo;
pub mod mounts;
pub mod processor;
pub mod watcher;

#[cfg(test)]
mod testutil;

use config::Config;
use processor::Processor;
use watcher::Watcher;

/// Runs the Device Mapping Manager until the container runtime goes away.
///
/// # Errors
///
/// Possible errors include:
/// - Invalid configuration (e.g., a non `unix://` `DOCKER_HOST`).
/// - Running in a container without the host root mounted.
/// - The Docker daemon being unreachable at startup.
/// - Listing containers, or the event stream, failing later on.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    log::debug!("Configuration: {:?}", config);

    let host_root = environment::resolve_host_root(&config.rootfs)?;
    log::debug!("Final host root: {}", host_root.display());

    let client =
        docker::DockerClient::from_host(&config.docker_host, config.docker_api_version.as_deref())?;
    client.ping().await?;
    log::info!(
        "Connected to Docker daemon at {}",
        client.socket_path().display()
    );

    let processor = Processor::new(
        cgroup::HostCgroups::new(&config.proc_root),
        device::HostDevices,
        mounts::MountResolver::new(&config.device_root),
        host_root,
    );

    match Watcher::new(client, processor).run().await {
        Ok(never) => match never {},
        Err(err) => Err(err.into()),
    }
}
