use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api::{router, RelayState};
use crate::config::{RelayConfig, RelayConfigCli};
use crate::signal::shutdown_signal;
use crate::websocket::ConnectionRegistry;

pub struct RelayServer {
    listener: TcpListener,
    state: RelayState,
    cancel_token: CancellationToken,
}

impl RelayServer {
    pub async fn main(cli: RelayConfigCli) {
        let config = match RelayConfig::new(&cli) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                return;
            }
        };
        let _guard = match config.setup_tracing_subscriber() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("{}", e);
                return;
            }
        };
        match Self::setup(config).await {
            Ok(server) => {
                if let Err(e) = server.run().await {
                    tracing::error!("{}", e);
                }
            }
            Err(e) => {
                tracing::error!("{}", e);
            }
        }
    }

    pub async fn setup(config: RelayConfig) -> crate::error::Result<Self> {
        tracing::debug!("Relay server is setting up");
        let cancel_token = CancellationToken::new();
        let static_dir = config.static_dir.relative();
        if !static_dir.is_dir() {
            tracing::warn!(
                static_dir = %static_dir.display(),
                "Static directory not found, page routes will return 404"
            );
        }
        let state = RelayState {
            registry: ConnectionRegistry::new(),
            static_dir: Arc::new(static_dir),
            firebase_config: config.firebase_config.map(Arc::from),
            cancel_token: cancel_token.clone(),
        };
        let listener = TcpListener::bind(config.bind).await?;
        Ok(Self {
            listener,
            state,
            cancel_token,
        })
    }

    /// The address the server actually listens on
    pub fn local_addr(&self) -> crate::error::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Cancelling this token shuts the server down
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn registry(&self) -> ConnectionRegistry {
        self.state.registry.clone()
    }

    pub async fn run(self) -> crate::error::Result<()> {
        let RelayServer {
            listener,
            state,
            cancel_token,
        } = self;
        let addr = listener.local_addr()?;
        let app = router(state);
        tracing::info!("Relay server is listening on: {}", addr);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(cancel_token))
        .await?;
        tracing::info!("Relay server stopped");
        Ok(())
    }
}
