// crates/scheduler/src/config.rs

use crate::state::SessionMode;
use crate::tasking::PolicyKind;
use anyhow::bail;
use api::Handshake;
use clap::Parser;
use std::fmt;

const TESTING_PATH: &str = "ws-testing";
const COMPETITION_PATH: &str = "ws-competition";

/// `scheduler` - A drone delivery scheduling client.
///
/// Connects to a delivery simulation server over a websocket, authenticates,
/// and answers every turn of every scenario run with a set of drone launches.
#[derive(Parser, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Base websocket URL of the simulation server, e.g. `ws://localhost:8080`.
    ///
    /// The endpoint path is appended depending on `--comp-mode`.
    #[arg(long, alias = "server_url_base", env = "SCHEDULER_SERVER_URL_BASE")]
    pub server_url_base: String,

    /// Entry name reported to the server in the handshake.
    #[arg(long, alias = "entry_name", env = "SCHEDULER_ENTRY_NAME", default_value = "")]
    pub entry_name: String,

    /// Authentication token. Never logged.
    #[arg(
        long,
        alias = "auth_token",
        env = "SCHEDULER_AUTH_TOKEN",
        default_value = "",
        hide_env_values = true
    )]
    pub auth_token: String,

    /// Connect to the competition endpoint and keep answering scenario runs
    /// until the server closes the session.
    ///
    /// Without it the scheduler uses the testing endpoint and exits after a
    /// single run.
    #[arg(long, alias = "comp_mode", env = "SCHEDULER_COMP_MODE")]
    pub comp_mode: bool,

    /// Launch allocation policy.
    #[arg(long, value_enum, env = "SCHEDULER_POLICY", default_value_t = PolicyKind::FirstAvailable)]
    pub policy: PolicyKind,

    /// Listen address for the Prometheus metrics server. Disabled when unset.
    #[arg(long, alias = "metrics_listen_addr", env = "SCHEDULER_METRICS_LISTEN_ADDR")]
    pub metrics_listen_addr: Option<std::net::SocketAddr>,
}

impl Config {
    /// Full websocket URL for the selected endpoint.
    pub fn endpoint_url(&self) -> anyhow::Result<String> {
        let base = self.server_url_base.trim_end_matches('/');
        if !(base.starts_with("ws://") || base.starts_with("wss://")) {
            bail!("server url base must start with ws:// or wss://, got {base:?}");
        }
        let path = if self.comp_mode {
            COMPETITION_PATH
        } else {
            TESTING_PATH
        };
        Ok(format!("{base}/{path}"))
    }

    pub fn session_mode(&self) -> SessionMode {
        SessionMode::from_comp_mode(self.comp_mode)
    }

    pub fn handshake(&self) -> Handshake {
        Handshake {
            auth_token: self.auth_token.clone(),
            entry_name: self.entry_name.clone(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_url_base", &self.server_url_base)
            .field("entry_name", &self.entry_name)
            .field("auth_token", &"<redacted>")
            .field("comp_mode", &self.comp_mode)
            .field("policy", &self.policy)
            .field("metrics_listen_addr", &self.metrics_listen_addr)
            .finish()
    }
}
