use std::path::PathBuf;

use clap::Parser;
use relay_daemon_dist::{
    default_install_dir, download, Release, Target, DEFAULT_DIST_URL, DEFAULT_VERSION,
    ENV_DIST_URL, ENV_INSTALL_DIR, ENV_TARGET_ARCH, ENV_TARGET_OS, ENV_VERSION,
};
use tracing_subscriber::EnvFilter;

/// Installs a libp2p-relay-daemon release for the interop tests.
#[derive(Debug, Parser)]
#[command(name = "relay-daemon-dist")]
struct Opt {
    #[arg(long, env = ENV_VERSION, default_value = DEFAULT_VERSION)]
    version: String,

    #[arg(long, env = ENV_DIST_URL, default_value = DEFAULT_DIST_URL)]
    dist_url: String,

    /// Go style os name; the host os when unset.
    #[arg(long, env = ENV_TARGET_OS)]
    os: Option<String>,

    /// Go style architecture; the host architecture when unset.
    #[arg(long, env = ENV_TARGET_ARCH)]
    arch: Option<String>,

    #[arg(long, env = ENV_INSTALL_DIR)]
    install_dir: Option<PathBuf>,

    /// Download even when the binary is already installed.
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opt = Opt::parse();

    let mut target = Target::from_env_or_host()?;
    if let Some(os) = opt.os.as_deref() {
        target.os = os.parse()?;
    }
    if let Some(arch) = opt.arch.as_deref() {
        target.arch = arch.parse()?;
    }

    let release = Release::new(opt.version, target).dist_url(opt.dist_url);
    let install_dir = opt.install_dir.unwrap_or_else(default_install_dir);
    let binary = install_dir.join(target.binary_name());

    if binary.is_file() && !opt.force {
        tracing::info!(path = %binary.display(), "already installed, pass --force to replace");
        return Ok(());
    }

    let path = download(&release, &install_dir).await?;
    println!("{}", path.display());

    Ok(())
}
