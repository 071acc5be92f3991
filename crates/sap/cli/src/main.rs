//! `sapd`, a bridge between SIM Access Profile clients and a modem

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::WrapErr;
use nexum_sap_core::{ProtocolMessage, TestMode};
use nexum_sap_server::{ModemEndpoint, SapServer};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

mod config;
mod host;

use config::load_config;
use host::LoggingHost;

#[derive(Parser)]
#[command(version, about = "Bridge Bluetooth SIM Access Profile clients to a modem")]
struct Cli {
    /// Trace level output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept SAP clients and bridge them to the modem, one at a time
    Serve {
        /// Address to accept SAP clients on
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Modem endpoint, unix:PATH or tcp:HOST:PORT
        #[arg(short, long)]
        modem: Option<ModemEndpoint>,

        /// Path to a TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Report a voice call as ongoing
        #[arg(long)]
        call_ongoing: bool,
    },

    /// Decode a SAP message given as hex
    Decode {
        /// Message bytes in hex
        #[arg(required = true)]
        hex: String,
    },
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Serve {
            listen,
            modem,
            config,
            call_ongoing,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(listen) = listen {
                config.listen = listen;
            }
            let modem = match modem {
                Some(modem) => modem,
                None => config
                    .modem
                    .parse()
                    .wrap_err("invalid modem endpoint in configuration")?,
            };
            config.call_ongoing |= call_ongoing;
            serve(&config, modem)
        }
        Commands::Decode { hex } => decode(&hex),
    }
}

fn serve(config: &config::Config, modem: ModemEndpoint) -> eyre::Result<()> {
    let listener = TcpListener::bind(config.listen)
        .wrap_err_with(|| format!("failed to listen on {}", config.listen))?;
    let host = Arc::new(LoggingHost::new(config.call_ongoing));
    let server_config = config.server_config();
    let test_mode = config.test_mode.map(|enabled| {
        if enabled {
            TestMode::Enabled
        } else {
            TestMode::Disabled
        }
    });
    info!(listen = %config.listen, %modem, "Waiting for SAP clients");

    serve_clients(listener.incoming(), |client: TcpStream| {
        let peer = client.peer_addr().ok();
        info!(?peer, "SAP client connected");
        if let Err(e) = client.set_nodelay(true) {
            warn!(?peer, error = %e, "Failed to disable Nagle on SAP client");
        }

        let mut builder = SapServer::builder(Box::new(client), modem.clone())
            .host(host.clone())
            .config(server_config.clone());
        if let Some(mode) = test_mode {
            builder = builder.test_mode(mode);
        }
        builder.start()?.join()?;
        info!(?peer, "SAP client disconnected");
        Ok(())
    });

    Ok(())
}

/// Run one session per accepted client; a failed session does not stop the loop
fn serve_clients<S>(
    clients: impl IntoIterator<Item = io::Result<S>>,
    mut session: impl FnMut(S) -> nexum_sap_server::Result<()>,
) {
    for client in clients {
        let client = match client {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Failed to accept SAP client");
                continue;
            }
        };
        if let Err(e) = session(client) {
            error!(error = %e, "SAP session failed");
        }
    }
}

fn decode(input: &str) -> eyre::Result<()> {
    let input: String = input.split_whitespace().collect();
    let bytes = hex::decode(input.trim_start_matches("0x")).wrap_err("invalid hex")?;
    let msg = ProtocolMessage::decode(&bytes)?;
    println!("{}", msg.kind());
    println!("{msg:#?}");
    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_ansi(true)
        .init();
}
