use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Args;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::magic::RelativePathBuf,
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::error::Error;

use super::TracingGuard;

pub const DEFAULT_RELAY_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8001);

/// Plain environment variable the browser client configuration was historically read from
pub const FIREBASE_CONFIG_ENV: &str = "FIREBASE_CONFIG";

/// Plain environment variable the listen port was historically read from
pub const PORT_ENV: &str = "PORT";

/// Filter for the file log layer. Kept outside the `TELERELAY_` prefix so it is
/// never read as the `file_log` key.
pub const FILE_LOG_FILTER_ENV: &str = "RELAY_FILE_LOG";

#[derive(Deserialize, Serialize, Debug)]
pub struct RelayConfig {
    pub(crate) bind: SocketAddr,
    pub(crate) static_dir: RelativePathBuf,
    pub(crate) firebase_config: Option<String>,
    pub(crate) log_path: Option<RelativePathBuf>,
    pub(crate) file_log: bool,
}

#[derive(Args, Debug, Serialize, Default)]
#[command(rename_all = "kebab-case")]
pub struct RelayConfigCli {
    /// The address to bind to
    #[arg(short, long)]
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub bind: Option<String>,
    /// The path of the config file
    #[arg(long)]
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub config: Option<String>,
    /// The directory holding `index.html` and the other static assets, default to `static`
    #[arg(long)]
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub static_dir: Option<String>,
    /// The browser client configuration served at `/firebase-config`, as a JSON document
    #[arg(long)]
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub firebase_config: Option<String>,
    /// The log file path. If not specified, then the default rolling log file path would be used.
    /// If specified, then the log file would be exactly at the path specified.
    #[arg(long)]
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub log_path: Option<String>,
    /// Enable logging to file
    #[arg(long)]
    #[serde(skip_serializing_if = "::std::ops::Not::not")]
    pub file_log: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_RELAY_ADDR,
            static_dir: "static".to_string().into(),
            firebase_config: None,
            log_path: None,
            file_log: false,
        }
    }
}

impl RelayConfig {
    pub fn new(cli: &RelayConfigCli) -> crate::error::Result<Self> {
        let mut defaults = Self::default();
        if let Ok(port) = std::env::var(PORT_ENV) {
            let port = port.trim().parse::<u16>().map_err(|e| {
                figment::Error::from(format!("invalid {PORT_ENV} {port:?}: {e}"))
            })?;
            defaults.bind.set_port(port);
        }
        let mut config: Self = Figment::new()
            .merge(Serialized::from(defaults, "relay"))
            .merge(Toml::file(cli.config.as_deref().unwrap_or("config.toml")).nested())
            .merge(Env::prefixed("TELERELAY_").profile("relay"))
            .merge(Serialized::from(cli, "relay"))
            .select("relay")
            .extract()?;
        if config.firebase_config.is_none() {
            config.firebase_config = std::env::var(FIREBASE_CONFIG_ENV).ok();
        }
        Ok(config)
    }

    pub fn bind(&self) -> SocketAddr {
        self.bind
    }

    pub fn setup_tracing_subscriber(&self) -> crate::error::Result<TracingGuard> {
        let stdout_layer = tracing_subscriber::fmt::layer().with_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netrelay=info".into()),
        );
        if self.file_log {
            let file_logger = self
                .log_path
                .as_ref()
                .and_then(|p| {
                    let path = p.relative();
                    let dir = path.parent();
                    let file_name = path.file_name();
                    match (dir, file_name) {
                        (Some(dir), Some(file_name)) => {
                            Some(tracing_appender::rolling::never(dir, file_name))
                        }
                        _ => None,
                    }
                })
                .or_else(|| {
                    dirs::cache_dir()
                        .map(|mut p| {
                            p.push("telerelay");
                            p
                        })
                        .map(|dir| {
                            tracing_appender::rolling::daily(dir, format!("{}.log", self.bind))
                        })
                })
                .ok_or(Error::InvalidConfig(figment::Error::from(
                    "log path not valid and cache directory not found",
                )))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_logger);
            let env_filter = tracing_subscriber::EnvFilter::try_from_env(FILE_LOG_FILTER_ENV)
                .unwrap_or_else(|_| "netrelay=info".into());
            tracing_subscriber::registry()
                .with(stdout_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(non_blocking)
                        .with_filter(env_filter),
                )
                .try_init()
                .map_err(|e| Error::Custom(e.to_string()))?;
            Ok(TracingGuard {
                file_guard: Some(guard),
            })
        } else {
            tracing_subscriber::registry()
                .with(stdout_layer)
                .try_init()
                .map_err(|e| Error::Custom(e.to_string()))?;
            Ok(TracingGuard { file_guard: None })
        }
    }
}
