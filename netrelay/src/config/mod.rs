pub mod relay;
pub use relay::{RelayConfig, RelayConfigCli};

/// Keeps the non-blocking file writer alive for as long as the process logs
pub struct TracingGuard {
    pub file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}
