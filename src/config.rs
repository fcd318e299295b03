//! Environment-driven configuration.
//!
//! All knobs come from `RASTRO_*` environment variables with agent-side
//! defaults baked in, so a process picks up a local agent with zero
//! configuration. Verbosity is not configured here: log filtering is the
//! subscriber's job (`RUST_LOG`).

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

/// Agent endpoints as shipped by the agent installer.
pub const DEFAULT_AGENT_HOST: &str = "127.0.0.1";
pub const DEFAULT_SINK_PORT: u16 = 2799;
pub const MULTICAST_HOST: &str = "239.100.15.215";
pub const MANAGEMENT_PORT: u16 = 2790;

#[cfg(windows)]
const DEFAULT_RULE_DIR: &str = "C:\\ProgramData\\Rastro\\Filters";
#[cfg(not(windows))]
const DEFAULT_RULE_DIR: &str = "/usr/share/rastro/filters";

/// Which network sink the process attaches at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkMode {
    #[default]
    Udp,
    Tcp,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub network_mode: NetworkMode,
    pub udp_host: String,
    pub udp_port: u16,
    pub tcp_host: String,
    pub tcp_port: u16,
    pub use_multicast: bool,
    /// Idle ticks before the flusher forces a partial batch out.
    pub batch_idle_counter: u32,
    pub hook_http: bool,
    pub hook_sql: bool,
    /// User-specified filter rule file; overrides the installed default.
    pub overrides_file: Option<PathBuf>,
    pub management_host: String,
    pub management_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            network_mode: NetworkMode::Udp,
            udp_host: DEFAULT_AGENT_HOST.to_string(),
            udp_port: DEFAULT_SINK_PORT,
            tcp_host: DEFAULT_AGENT_HOST.to_string(),
            tcp_port: DEFAULT_SINK_PORT,
            use_multicast: false,
            batch_idle_counter: 500,
            hook_http: true,
            hook_sql: true,
            overrides_file: None,
            management_host: DEFAULT_AGENT_HOST.to_string(),
            management_port: MANAGEMENT_PORT,
        }
    }
}

fn cast_to_boolean(raw: &str) -> bool {
    matches!(raw, "true" | "True" | "1")
}

impl Config {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source. Unset variables fall back
    /// to defaults; unparseable numeric or mode values are configuration
    /// errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();
        if let Some(v) = lookup("RASTRO_API_KEY") {
            config.api_key = v;
        }
        if let Some(v) = lookup("RASTRO_NETWORK_MODE") {
            config.network_mode = match v.as_str() {
                "Udp" | "UDP" | "udp" => NetworkMode::Udp,
                "Tcp" | "TCP" | "tcp" => NetworkMode::Tcp,
                other => bail!("RASTRO_NETWORK_MODE must be Udp or Tcp, got '{other}'"),
            };
        }
        if let Some(v) = lookup("RASTRO_UDP_HOST") {
            config.udp_host = v;
        }
        if let Some(v) = lookup("RASTRO_UDP_PORT") {
            config.udp_port = v.parse().context("RASTRO_UDP_PORT is not a port number")?;
        }
        if let Some(v) = lookup("RASTRO_TCP_HOST") {
            config.tcp_host = v;
        }
        if let Some(v) = lookup("RASTRO_TCP_PORT") {
            config.tcp_port = v.parse().context("RASTRO_TCP_PORT is not a port number")?;
        }
        if let Some(v) = lookup("RASTRO_USE_MULTICAST") {
            config.use_multicast = cast_to_boolean(&v);
        }
        if let Some(v) = lookup("RASTRO_BATCH_IDLE_COUNTER") {
            config.batch_idle_counter = v
                .parse()
                .context("RASTRO_BATCH_IDLE_COUNTER is not an integer")?;
        }
        if let Some(v) = lookup("RASTRO_HOOK_HTTP") {
            config.hook_http = cast_to_boolean(&v);
        }
        if let Some(v) = lookup("RASTRO_HOOK_SQL") {
            config.hook_sql = cast_to_boolean(&v);
        }
        if let Some(v) = lookup("RASTRO_USER_OVERRIDES_FILE") {
            config.overrides_file = Some(PathBuf::from(v));
        }
        Ok(config)
    }

    /// The UDP destination host, honoring the multicast toggle.
    pub fn udp_host(&self) -> &str {
        if self.use_multicast {
            MULTICAST_HOST
        } else {
            &self.udp_host
        }
    }

    /// The filter rule file for this process: the user override when set,
    /// otherwise the installed per-API-key default.
    pub fn rule_file(&self) -> PathBuf {
        match &self.overrides_file {
            Some(path) => path.clone(),
            None => PathBuf::from(DEFAULT_RULE_DIR).join(format!("{}.txt", self.api_key)),
        }
    }
}
