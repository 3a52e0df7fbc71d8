use std::path::PathBuf;
use std::process::exit;

use std::future::Future;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tokio::runtime::Runtime;
use tokio::signal::unix::{signal, SignalKind};

use sonya_ble::config::{self, ClientConfig};
use sonya_ble::logging::init_logging;
use sonya_ble::{
    locator, BluezTransport, CommandSource, Console, Session, SessionEnd, Shutdown,
    StreamAccumulator,
};

#[derive(Parser, Debug)]
#[command(name = "sonya-ble", about = "Sonya Watch BLE client (RX/TX tester)")]
struct Args {
    /// BLE address (if omitted: scan by name)
    #[arg(long)]
    address: Option<String>,
    /// Scan filter by name substring
    #[arg(long, default_value = config::DEFAULT_NAME_FILTER)]
    name: String,
    /// Scan timeout in seconds
    #[arg(long, default_value_t = 6.0)]
    scan_timeout: f64,
    /// Service UUID (informational)
    #[arg(long, default_value_t = config::SERVICE_UUID.to_string())]
    svc_uuid: String,
    /// RX characteristic UUID (write)
    #[arg(long, default_value_t = config::RX_UUID.to_string())]
    rx_uuid: String,
    /// TX characteristic UUID (notify)
    #[arg(long, default_value_t = config::TX_UUID.to_string())]
    tx_uuid: String,
    /// Send command immediately after subscribing (repeatable)
    #[arg(long = "cmd")]
    cmd: Vec<String>,
    /// Do not read stdin; just send --cmd and wait
    #[arg(long)]
    no_interactive: bool,
    /// Seconds to keep the connection in no-interactive mode
    #[arg(long, default_value_t = 8.0)]
    keepalive: f64,
    /// Milliseconds to wait after each --cmd
    #[arg(long, default_value_t = 100)]
    pacing_ms: u64,
    /// Append received AUDIO_CHUNK payloads to file (raw 16kHz s16le mono)
    #[arg(long)]
    audio_out: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ClientConfig> {
        Ok(ClientConfig {
            address: self.address,
            name_filter: self.name,
            scan_timeout: config::seconds("scan-timeout", self.scan_timeout)?,
            service_uuid: config::parse_uuid("svc-uuid", &self.svc_uuid)?,
            rx_uuid: config::parse_uuid("rx-uuid", &self.rx_uuid)?,
            tx_uuid: config::parse_uuid("tx-uuid", &self.tx_uuid)?,
            commands: self.cmd,
            interactive: !self.no_interactive,
            keepalive: config::seconds("keepalive", self.keepalive)?,
            pacing: std::time::Duration::from_millis(self.pacing_ms),
            audio_out: self.audio_out,
        })
    }
}

fn main() {
    init_logging();
    match run() {
        Ok(end) => {
            info!("exiting: {:?}", end);
            exit(0);
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit(1);
        }
    }
}

fn run() -> Result<SessionEnd> {
    let cfg = Args::parse().into_config()?;

    let rt = Runtime::new().context("tokio runtime init failed")?;
    let result = rt.block_on(run_session(cfg));
    // stdin reads run on a blocking thread that never returns on its own
    rt.shutdown_background();
    result
}

async fn run_session(cfg: ClientConfig) -> Result<SessionEnd> {
    // installed before anything can block so Ctrl-C always ends the run cleanly
    let mut sigint =
        signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let (stop, shutdown) = Shutdown::new();
    tokio::spawn(async move {
        if sigint.recv().await.is_some() {
            stop.trigger();
        }
    });

    let Some(transport) = until_shutdown(&shutdown, BluezTransport::open()).await? else {
        return Ok(SessionEnd::Interrupted);
    };

    let address = match &cfg.address {
        Some(addr) => addr.clone(),
        None => {
            let scan = locator::discover(&transport, &cfg.name_filter, cfg.scan_timeout);
            match until_shutdown(&shutdown, scan).await? {
                Some(addr) => addr,
                None => return Ok(SessionEnd::Interrupted),
            }
        }
    };

    let accumulator = match &cfg.audio_out {
        Some(path) => StreamAccumulator::with_file_sink(path)
            .with_context(|| format!("failed to open audio sink {}", path.display()))?,
        None => StreamAccumulator::new(),
    };

    let source = if cfg.interactive {
        CommandSource::stdin(cfg.commands.clone())
    } else {
        CommandSource::fixed(cfg.commands.clone())
    };

    let mut session = Session::new(&cfg, accumulator, Console::stdout());
    Ok(session.start(&transport, &address, source, &shutdown).await?)
}

/// Await `step` unless a shutdown comes first, in which case `None`.
async fn until_shutdown<T>(
    shutdown: &Shutdown,
    step: impl Future<Output = sonya_ble::Result<T>>,
) -> Result<Option<T>> {
    tokio::select! {
        res = step => Ok(Some(res?)),
        () = shutdown.requested() => {
            info!("shutdown requested before connecting");
            Ok(None)
        }
    }
}
