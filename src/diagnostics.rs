//! Agent-reachability diagnostics.
//!
//! Best-effort handshake with the local agent's management port. The
//! absence of a reachable agent never prevents the profiler from starting;
//! the one hard consequence is nooping the tracer when the agent predates
//! the minimum supported version, since older agents reject the frame
//! stream.

use crate::config::Config;
use crate::tracer::Tracer;
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{info, warn};

/// Oldest agent build that understands this wire protocol revision.
pub const MINIMUM_AGENT_VERSION: AgentVersion = AgentVersion([1, 0, 683, 0]);

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Dotted-quad agent build number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AgentVersion(pub [u32; 4]);

impl AgentVersion {
    fn parse(s: &str) -> Option<Self> {
        let mut parts = [0u32; 4];
        let mut count = 0;
        for (i, segment) in s.split('.').enumerate() {
            if i >= 4 {
                return None;
            }
            parts[i] = segment.parse().ok()?;
            count = i + 1;
        }
        (count == 4).then_some(Self(parts))
    }
}

/// The agent replies to `GetAgentInfo` with one JSON line. Older agents
/// report the version as a plain string, newer ones as a structured
/// object.
#[derive(Debug, Deserialize)]
struct AgentInfo {
    #[serde(rename = "Status")]
    status: Option<i64>,
    #[serde(rename = "Version")]
    version: VersionField,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VersionField {
    Legacy(String),
    Structured {
        #[serde(rename = "Major")]
        major: u32,
        #[serde(rename = "Minor")]
        minor: u32,
        #[serde(rename = "Build")]
        build: u32,
        #[serde(rename = "Revision")]
        revision: u32,
    },
}

impl VersionField {
    fn version(&self) -> Option<AgentVersion> {
        match self {
            VersionField::Legacy(s) => AgentVersion::parse(s),
            VersionField::Structured {
                major,
                minor,
                build,
                revision,
            } => Some(AgentVersion([*major, *minor, *build, *revision])),
        }
    }
}

/// Query the agent management port and log its state. Noops the tracer
/// when the agent is too old for this protocol revision. Never fatal.
pub fn verify_agent(tracer: &Tracer, config: &Config) {
    match fetch_agent_info(&config.management_host, config.management_port) {
        Ok(info) => report(tracer, &info),
        Err(err) => {
            // Degraded mode: keep running, frames simply go nowhere.
            info!(error = %err, "agent management port not reachable, continuing without diagnostics");
        }
    }
}

fn fetch_agent_info(host: &str, port: u16) -> anyhow::Result<AgentInfo> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow::anyhow!("no address for {host}:{port}"))?;
    let mut stream = TcpStream::connect_timeout(&addr, HANDSHAKE_TIMEOUT)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    stream.write_all(b"GetAgentInfo")?;
    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line)?;
    Ok(serde_json::from_str(&line)?)
}

fn report(tracer: &Tracer, agent: &AgentInfo) {
    match agent.version.version() {
        Some(version) if version < MINIMUM_AGENT_VERSION => {
            warn!(
                agent_version = ?version.0,
                minimum = ?MINIMUM_AGENT_VERSION.0,
                "agent below minimum supported version, profiler loaded in noop mode"
            );
            tracer.noop();
        }
        _ => match agent.status {
            Some(1) => info!("agent is running and configured"),
            Some(0) => warn!("agent is running but misconfigured: API key not set"),
            _ => info!("agent is reachable, state unknown"),
        },
    }
}
