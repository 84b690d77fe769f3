/// Entry point for the Device Mapping Manager.
///
/// Watches the local Docker daemon and grants every container access to the host
/// devices bind mounted into it. Runs until the daemon's event stream fails.
///
/// # Errors
///
/// Returns an error if startup fails (e.g., invalid configuration or an unreachable
/// Docker daemon) or once the event stream fails or ends.
///
/// # Examples
///
/// ```bash
/// RUST_LOG=debug DOCKER_HOST=unix:///var/run/docker.sock cargo run
/// ```
#[tokio::main(flavor = "multi_thread")]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!(
        "Starting Device Mapping Manager version {}",
        env!("CARGO_PKG_VERSION")
    );
    device_mapping_manager::run().await
}
