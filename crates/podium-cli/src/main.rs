//! podium CLI: host a presentation remote, or act as a controller.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use podium_input::{ActionExecutor, DryRunExecutor};
use podium_protocol::{ControlClient, QuicControlTransport, ServerVerification};
use podium_server::config::IdentityConfig;
use podium_server::net::{self, DEFAULT_PORT_RANGE_END, DEFAULT_PORT_RANGE_START};
use podium_server::{setup, ControlServer, ServerOptions, ServerState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long `send` waits for acknowledgments after its last command.
const ACK_WAIT: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(
    name = "podium",
    about = "Control a presentation from another device",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control server until Ctrl-C.
    Serve {
        /// Path to configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on. 0 picks a free port.
        #[arg(short, long)]
        port: Option<u32>,

        /// Log actions instead of pressing keys.
        #[arg(long)]
        dry_run: bool,
    },

    /// Connect as a controller and send command tokens.
    Send {
        /// Address of the host (ip:port).
        address: SocketAddr,

        /// Command tokens, e.g. NEXT_SLIDE.
        #[arg(required = true)]
        tokens: Vec<String>,

        /// Expected host certificate fingerprint.
        #[arg(short, long)]
        fingerprint: Option<String>,

        /// Controller name sent in the handshake.
        #[arg(short, long, default_value = "podium-cli")]
        name: String,
    },

    /// Generate a TLS certificate for this host.
    GenerateCert {
        /// Output directory for certificate files.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Print the first free port in a range.
    FreePort {
        /// Address to probe.
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
        bind: IpAddr,

        #[arg(long, default_value_t = DEFAULT_PORT_RANGE_START)]
        start: u16,

        /// Exclusive.
        #[arg(long, default_value_t = DEFAULT_PORT_RANGE_END)]
        end: u16,
    },
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            dry_run,
        } => serve(config.as_deref(), port, dry_run).await,
        Commands::Send {
            address,
            tokens,
            fingerprint,
            name,
        } => {
            init_tracing("warn");
            send(address, &tokens, fingerprint, &name).await
        }
        Commands::GenerateCert { output } => {
            init_tracing("info");
            generate_cert(&output)
        }
        Commands::FreePort { bind, start, end } => {
            init_tracing("warn");
            let port = net::find_free_port(bind, start, end)?;
            println!("{port}");
            Ok(())
        }
    }
}

async fn serve(config_path: Option<&Path>, port: Option<u32>, dry_run: bool) -> anyhow::Result<()> {
    let config = setup::load_config(config_path)?;
    init_tracing(&config.server.log_level);

    let port = setup::select_port(&config, port)?;
    let (cert_pem, key_pem) =
        setup::load_or_generate_certs(&setup::config_dir(), &config.identity.name)?;
    let fingerprint = podium_protocol::certificate_fingerprint(&cert_pem)?;

    let transport = QuicControlTransport::new(config.server.bind_ip()?, cert_pem, key_pem);
    let server = ControlServer::new(
        Arc::new(transport),
        build_executor(dry_run)?,
        ServerOptions {
            grace_period: config.server.grace_period(),
        },
    );

    let handle = server.spawn(u32::from(port))?;
    let status = server
        .wait_for_status(|s| matches!(s.state, ServerState::Running | ServerState::Error))
        .await;
    if status.state == ServerState::Error {
        handle.stop(Duration::ZERO).await?;
        anyhow::bail!("{}", status.text);
    }

    let ip = net::local_ip();
    if !net::has_network(ip) {
        warn!("no network connection detected, controllers on other devices cannot reach this host");
    }
    println!("Host:        {}", config.identity.name);
    println!("Address:     {ip}:{port}");
    println!("Fingerprint: {fingerprint}");

    let mut status_rx = server.status_receiver();
    println!("Status:      {}", status_rx.borrow_and_update().text);
    let printer = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let text = status_rx.borrow_and_update().text.clone();
            println!("Status:      {text}");
        }
    });

    let mut stopped = server.status_receiver();
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("received Ctrl-C, shutting down");
        }
        _ = stopped.wait_for(|s| s.state == ServerState::Stopped) => {
            warn!("server stopped on its own");
        }
    }

    let result = handle.stop(config.server.grace_period()).await;
    if let Err(e) = server.shutdown_executor().await {
        warn!(error = %e, "failed to release action executor");
    }
    printer.abort();
    result?;
    Ok(())
}

fn build_executor(dry_run: bool) -> anyhow::Result<Box<dyn ActionExecutor>> {
    if dry_run {
        info!("dry run, actions are only logged");
        return Ok(Box::new(DryRunExecutor));
    }

    #[cfg(feature = "linux")]
    let executor: Box<dyn ActionExecutor> =
        Box::new(podium_input::linux::UinputExecutor::new()?);

    #[cfg(not(feature = "linux"))]
    let executor: Box<dyn ActionExecutor> = {
        warn!("built without uinput support, actions are only logged");
        Box::new(DryRunExecutor)
    };

    Ok(executor)
}

async fn send(
    address: SocketAddr,
    tokens: &[String],
    fingerprint: Option<String>,
    name: &str,
) -> anyhow::Result<()> {
    let verification = if let Some(fingerprint) = fingerprint {
        ServerVerification::Fingerprint(fingerprint)
    } else {
        warn!("no fingerprint given, host certificate is not verified");
        ServerVerification::SkipVerification
    };

    let mut client = ControlClient::connect(address, name, verification).await?;

    if let Ok(Ok(Some(msg))) = tokio::time::timeout(Duration::from_secs(2), client.recv()).await {
        println!("{}: {}", msg.event_name(), msg.message());
    }

    for token in tokens {
        client.send_command(token).await?;
        println!("sent {token}");
    }

    while let Ok(received) = tokio::time::timeout(ACK_WAIT, client.recv()).await {
        match received? {
            Some(msg) => println!("{}: {}", msg.event_name(), msg.message()),
            None => break,
        }
    }

    client.disconnect().await?;
    Ok(())
}

fn generate_cert(output: &Path) -> anyhow::Result<()> {
    let name = IdentityConfig::default().name;
    info!(%name, output = %output.display(), "generating TLS certificate");

    let cert = podium_certgen::generate_certificate(&name)?;

    std::fs::create_dir_all(output)?;
    let cert_path = output.join("podium.crt");
    let key_path = output.join("podium.key");
    std::fs::write(&cert_path, &cert.cert_pem)?;
    std::fs::write(&key_path, &cert.key_pem)?;

    println!("Certificate: {}", cert_path.display());
    println!("Private key: {}", key_path.display());
    println!("Fingerprint: {}", cert.fingerprint);
    Ok(())
}
