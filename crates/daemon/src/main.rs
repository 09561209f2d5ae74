use anyhow::Context;
use clap::Parser;

use mp3fs_daemon::{logging, Cli, MountConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = MountConfig::from_cli(&cli).context("invalid configuration")?;
    let _guard = logging::init(config.log_dir.as_deref());

    run(config).await
}

#[cfg(feature = "fuse")]
async fn run(config: MountConfig) -> anyhow::Result<()> {
    use common::codec::CodecSet;
    use mp3fs_daemon::fuse::spawn_mount;

    let codecs = CodecSet::production();
    codecs
        .decoder
        .ready()
        .await
        .context("failed to load decoder runtime")?;

    let mount = spawn_mount(&config, codecs, tokio::runtime::Handle::current())?;
    tracing::info!(
        path = %mount.mount_point().display(),
        "mounted; send SIGINT or SIGTERM to unmount"
    );

    shutdown_signal().await?;
    tracing::info!("shutting down");

    let stats = tokio::task::spawn_blocking(move || mount.unmount())
        .await
        .context("unmount task failed")?;
    tracing::info!(
        entries = stats.entries,
        bytes = stats.bytes,
        hits = stats.hits,
        misses = stats.misses,
        productions = stats.productions,
        evictions = stats.evictions,
        "cache statistics"
    );
    Ok(())
}

#[cfg(not(feature = "fuse"))]
async fn run(_config: MountConfig) -> anyhow::Result<()> {
    anyhow::bail!("mp3fs was built without the `fuse` feature")
}

#[cfg(feature = "fuse")]
async fn shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for SIGINT")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
