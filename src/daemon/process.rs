//! Plumbing shared by everything that runs an external process: readiness detection on stdout,
//! output draining and port reservation.

use std::collections::VecDeque;
use std::net::{Ipv4Addr, TcpListener, UdpSocket};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, ChildStdout};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Span;
use tracing_futures::Instrument;

use crate::error::{Error, Result};
use crate::p2p::Transport;

/// Lines of stderr kept around for error reports.
const STDERR_TAIL: usize = 64;

/// The stdout of a process that reported readiness, along with everything it printed until then.
pub(crate) struct Ready {
    pub stdout: Lines<BufReader<ChildStdout>>,
    pub output: Vec<String>,
}

/// Span carrying the name of a process, entered by everything that reads its output.
pub(crate) fn span(name: &str) -> Span {
    info_span!("daemon", %name)
}

/// Reads stdout of `child` until `is_ready` accepts a line.
///
/// The process is killed when it does not get ready within `timeout`. Stderr must already be
/// drained through [`drain_stderr`] so that the process cannot block on a full pipe.
pub(crate) async fn wait_ready<F>(
    name: &str,
    child: &mut Child,
    stderr: &mut Option<JoinHandle<Vec<String>>>,
    timeout: Duration,
    is_ready: F,
) -> Result<Ready>
where
    F: FnMut(&str) -> bool,
{
    read_until_ready(name, child, stderr, timeout, is_ready)
        .instrument(span(name))
        .await
}

async fn read_until_ready<F>(
    name: &str,
    child: &mut Child,
    stderr: &mut Option<JoinHandle<Vec<String>>>,
    timeout: Duration,
    mut is_ready: F,
) -> Result<Ready>
where
    F: FnMut(&str) -> bool,
{
    let stdout = child.stdout.take().ok_or_else(|| Error::ProcessExited {
        name: name.to_string(),
        status: "stdout not captured".into(),
        output: String::new(),
    })?;

    let mut stdout = BufReader::new(stdout).lines();
    let mut output = Vec::new();
    let deadline = Instant::now() + timeout;

    loop {
        match tokio::time::timeout_at(deadline, stdout.next_line()).await {
            Ok(Ok(Some(line))) => {
                trace!(target: "ipfs_interop::process", "{line}");
                let ready = is_ready(&line);
                output.push(line);
                if ready {
                    return Ok(Ready { stdout, output });
                }
            }
            Ok(Ok(None)) | Ok(Err(_)) => {
                let status = match child.wait().await {
                    Ok(status) => status.to_string(),
                    Err(e) => e.to_string(),
                };
                if let Some(handle) = stderr.take() {
                    if let Ok(Ok(lines)) = tokio::time::timeout(Duration::from_secs(1), handle).await {
                        output.extend(lines);
                    }
                }
                return Err(Error::ProcessExited {
                    name: name.to_string(),
                    status,
                    output: output.join("\n"),
                });
            }
            Err(_) => {
                warn!(?timeout, "not ready in time, killing");
                if let Err(e) = child.kill().await {
                    debug!("kill failed: {e}");
                }
                return Err(Error::StartupTimeout {
                    name: name.to_string(),
                    timeout,
                });
            }
        }
    }
}

/// Logs stderr of a process until it closes. The handle resolves to the last lines written.
pub(crate) fn drain_stderr<R>(name: String, stderr: R) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let task = async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut tail = VecDeque::with_capacity(STDERR_TAIL);
        while let Ok(Some(line)) = lines.next_line().await {
            trace!(target: "ipfs_interop::process", "stderr: {line}");
            if tail.len() == STDERR_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail.into_iter().collect()
    };
    tokio::spawn(task.instrument(span(&name)))
}

/// Keeps reading stdout after readiness so the process never blocks on it.
pub(crate) fn drain_stdout(name: String, mut stdout: Lines<BufReader<ChildStdout>>) {
    let task = async move {
        while let Ok(Some(line)) = stdout.next_line().await {
            trace!(target: "ipfs_interop::process", "{line}");
        }
    };
    tokio::spawn(task.instrument(span(&name)));
}

/// Picks a currently unused loopback port for `transport`.
///
/// The port is released before returning, so another process could grab it in between.
pub(crate) fn free_port(transport: Transport) -> Result<u16> {
    let port = match transport {
        Transport::Quic => UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?.local_addr()?.port(),
        Transport::Tcp | Transport::WebSocket => {
            TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?.local_addr()?.port()
        }
    };
    Ok(port)
}

/// The multiaddr that follows `marker` on a line like `RPC API server listening on /ip4/..`.
pub(crate) fn addr_after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let (_, rest) = line.split_once(marker)?;
    rest.split_whitespace().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listening_lines() {
        assert_eq!(
            addr_after(
                "RPC API server listening on /ip4/127.0.0.1/tcp/5001",
                "RPC API server listening on"
            ),
            Some("/ip4/127.0.0.1/tcp/5001")
        );
        assert_eq!(
            addr_after("API listening on /ip4/127.0.0.1/tcp/5002/http", "API listening on"),
            Some("/ip4/127.0.0.1/tcp/5002/http")
        );
        assert_eq!(addr_after("Daemon is ready", "API listening on"), None);
    }

    #[test]
    fn output_is_logged_under_the_daemon_span() {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = span("go-0");
            let metadata = span.metadata().unwrap();
            assert_eq!(metadata.name(), "daemon");
            assert!(metadata.fields().field("name").is_some());
        });
    }

    #[test]
    fn free_ports_are_nonzero() {
        for transport in Transport::ALL {
            assert_ne!(free_port(transport).unwrap(), 0);
        }
    }
}
