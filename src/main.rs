use clap::{Parser, Subcommand};
use netrelay::{config::RelayConfigCli, server::RelayServer};

/// Main entry point for the telerelay command-line tool.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Arguments {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run the signaling relay server.
    Serve(RelayConfigCli),
}

fn main() {
    let args = Arguments::parse();
    match args.mode {
        Mode::Serve(relay_cli) => {
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .expect("failed to build tokio runtime")
                .block_on(async {
                    RelayServer::main(relay_cli).await;
                });
        }
    }
}
