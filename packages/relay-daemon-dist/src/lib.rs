//! Fetches release binaries of [libp2p-relay-daemon] from an IPFS distribution server.
//!
//! Releases live at `<dist>/libp2p-relay-daemon/<version>/` as one archive per platform, each with
//! a `.sha512` companion holding the digest of the archive. The digest is checked before anything
//! is extracted or written.
//!
//! [libp2p-relay-daemon]: https://github.com/libp2p/go-libp2p-relay-daemon

#[macro_use]
extern crate tracing;

use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use sha2::{Digest, Sha512};

pub const DEFAULT_DIST_URL: &str = "https://dist.ipfs.tech";
pub const DEFAULT_VERSION: &str = "v0.4.0";

pub const ENV_VERSION: &str = "LIBP2P_RELAY_DAEMON_VERSION";
pub const ENV_DIST_URL: &str = "LIBP2P_RELAY_DAEMON_DIST_URL";
pub const ENV_INSTALL_DIR: &str = "LIBP2P_RELAY_DAEMON_INSTALL_DIR";
pub const ENV_TARGET_OS: &str = "TARGET_OS";
pub const ENV_TARGET_ARCH: &str = "TARGET_ARCH";

const DIST_NAME: &str = "libp2p-relay-daemon";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported {what}: {value}")]
    UnsupportedTarget { what: &'static str, value: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error("no checksum for {0} in the checksum file")]
    MissingChecksum(String),

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("{binary} not found in {archive}")]
    MissingBinary { binary: String, archive: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Operating systems, named the way Go names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    Darwin,
    Windows,
}

/// Cpu architectures, named the way Go names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Amd64,
    Arm64,
    I386,
    Arm,
}

impl Os {
    pub fn host() -> Result<Self> {
        std::env::consts::OS.parse()
    }

    fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
            Os::Windows => "windows",
        }
    }
}

impl Arch {
    pub fn host() -> Result<Self> {
        std::env::consts::ARCH.parse()
    }

    fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
            Arch::I386 => "386",
            Arch::Arm => "arm",
        }
    }
}

impl FromStr for Os {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(Os::Linux),
            "darwin" | "macos" => Ok(Os::Darwin),
            "windows" | "win32" => Ok(Os::Windows),
            _ => Err(Error::UnsupportedTarget {
                what: "os",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "amd64" | "x86_64" | "x64" => Ok(Arch::Amd64),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            "386" | "x86" | "ia32" | "i686" => Ok(Arch::I386),
            "arm" => Ok(Arch::Arm),
            _ => Err(Error::UnsupportedTarget {
                what: "architecture",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform a release is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub os: Os,
    pub arch: Arch,
}

impl Target {
    pub fn host() -> Result<Self> {
        Ok(Self {
            os: Os::host()?,
            arch: Arch::host()?,
        })
    }

    /// `TARGET_OS`/`TARGET_ARCH`, then `GOOS`/`GOARCH`, then the host.
    pub fn from_env_or_host() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |primary: &str, fallback: &str| {
            lookup(primary)
                .or_else(|| lookup(fallback))
                .filter(|value| !value.trim().is_empty())
        };

        let os = match var(ENV_TARGET_OS, "GOOS") {
            Some(os) => os.parse()?,
            None => Os::host()?,
        };
        let arch = match var(ENV_TARGET_ARCH, "GOARCH") {
            Some(arch) => arch.parse()?,
            None => Arch::host()?,
        };
        Ok(Self { os, arch })
    }

    pub fn binary_name(&self) -> &'static str {
        match self.os {
            Os::Windows => "libp2p-relay-daemon.exe",
            _ => "libp2p-relay-daemon",
        }
    }

    fn archive_extension(&self) -> &'static str {
        match self.os {
            Os::Windows => "zip",
            _ => "tar.gz",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// A release archive on a distribution server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub dist_url: String,
    pub version: String,
    pub target: Target,
}

impl Release {
    pub fn new(version: impl Into<String>, target: Target) -> Self {
        Self {
            dist_url: DEFAULT_DIST_URL.to_string(),
            version: version.into(),
            target,
        }
    }

    pub fn dist_url(mut self, url: impl Into<String>) -> Self {
        self.dist_url = url.into();
        self
    }

    pub fn archive_name(&self) -> String {
        format!(
            "{DIST_NAME}_{}_{}.{}",
            self.version,
            self.target,
            self.target.archive_extension()
        )
    }

    pub fn archive_url(&self) -> String {
        format!(
            "{}/{DIST_NAME}/{}/{}",
            self.dist_url.trim_end_matches('/'),
            self.version,
            self.archive_name()
        )
    }

    pub fn checksum_url(&self) -> String {
        format!("{}.sha512", self.archive_url())
    }
}

/// Where the downloader installs by default: `LIBP2P_RELAY_DAEMON_INSTALL_DIR`, or `bin` inside
/// this package.
pub fn default_install_dir() -> PathBuf {
    match std::env::var_os(ENV_INSTALL_DIR) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => Path::new(env!("CARGO_MANIFEST_DIR")).join("bin"),
    }
}

/// Path of the host's binary inside `dir`.
pub fn installed_binary(dir: &Path) -> PathBuf {
    let name = if cfg!(windows) {
        "libp2p-relay-daemon.exe"
    } else {
        "libp2p-relay-daemon"
    };
    dir.join(name)
}

/// Finds the digest of `file` in the contents of a `.sha512` file.
///
/// Lines look like `<hex digest>  <file name>`; a file with a single bare digest is accepted too.
pub fn parse_checksum(contents: &str, file: &str) -> Result<String> {
    let mut lines = contents.lines().map(str::trim).filter(|line| !line.is_empty());

    let found = lines.clone().find_map(|line| {
        let mut parts = line.split_whitespace();
        let digest = parts.next()?;
        let name = parts.next()?.trim_start_matches('*');
        let name = name.rsplit('/').next().unwrap_or(name);
        (name == file).then(|| digest.to_ascii_lowercase())
    });

    if let Some(digest) = found {
        return Ok(digest);
    }

    match (lines.next(), lines.next()) {
        (Some(only), None) if !only.contains(char::is_whitespace) => Ok(only.to_ascii_lowercase()),
        _ => Err(Error::MissingChecksum(file.to_string())),
    }
}

/// Checks `data` against the hex encoded sha-512 `expected`.
pub fn verify(file: &str, data: &[u8], expected: &str) -> Result<()> {
    let actual = hex::encode(Sha512::digest(data));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            file: file.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Pulls the daemon binary out of a release archive.
pub fn extract(archive: &[u8], release: &Release) -> Result<Vec<u8>> {
    let binary = release.target.binary_name();
    let missing = || Error::MissingBinary {
        binary: binary.to_string(),
        archive: release.archive_name(),
    };

    match release.target.os {
        Os::Windows => {
            let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
            for index in 0..zip.len() {
                let mut file = zip.by_index(index)?;
                if file.is_file() && file_name_is(file.name(), binary) {
                    let mut data = Vec::with_capacity(file.size() as usize);
                    file.read_to_end(&mut data)?;
                    return Ok(data);
                }
            }
            Err(missing())
        }
        _ => {
            let decoder = flate2::read::GzDecoder::new(archive);
            let mut tar = tar::Archive::new(decoder);
            for entry in tar.entries()? {
                let mut entry = entry?;
                let is_binary = entry.header().entry_type().is_file()
                    && file_name_is(&entry.path()?.to_string_lossy(), binary);
                if is_binary {
                    let mut data = Vec::with_capacity(entry.size() as usize);
                    entry.read_to_end(&mut data)?;
                    return Ok(data);
                }
            }
            Err(missing())
        }
    }
}

fn file_name_is(path: &str, name: &str) -> bool {
    path.rsplit(['/', '\\']).next() == Some(name)
}

/// Downloads `release`, verifies it and installs the binary into `install_dir`.
///
/// Returns the path of the installed binary. Nothing is written when verification fails.
pub async fn download(release: &Release, install_dir: &Path) -> Result<PathBuf> {
    let client = reqwest::Client::new();

    let checksum_url = release.checksum_url();
    debug!(url = %checksum_url, "fetching checksum");
    let checksums = client
        .get(&checksum_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let expected = parse_checksum(&checksums, &release.archive_name())?;

    let archive_url = release.archive_url();
    info!(url = %archive_url, "downloading");
    let archive = client
        .get(&archive_url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    verify(&release.archive_name(), &archive, &expected)?;
    debug!(bytes = archive.len(), "checksum verified");

    let binary = extract(&archive, release)?;

    tokio::fs::create_dir_all(install_dir).await?;
    let path = install_dir.join(release.target.binary_name());
    tokio::fs::write(&path, &binary).await?;
    make_executable(&path).await?;

    info!(path = %path.display(), version = %release.version, "installed");
    Ok(path)
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_: &Path) -> Result<()> {
    Ok(())
}
