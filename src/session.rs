//! Duplex command/notification session with a connected watch.
//!
//! A run goes `Idle → Connecting → Connected → Subscribed → Running →
//! Draining → Closed`. While running, two futures are polled side by side on
//! the same task:
//!
//! - the telemetry pump, which decodes each TX notification, prints it and
//!   feeds the [`StreamAccumulator`];
//! - the command driver, which writes commands from the [`CommandSource`] to
//!   RX one at a time.
//!
//! Neither waits on the other, so a user sitting at the prompt never stalls
//! the telemetry transcript. Whatever ends the run (end of input, keepalive,
//! shutdown signal, lost link, failed write), the session unsubscribes and
//! disconnects before `run` returns.
//!
//! A [`Shutdown`] request is honoured in every phase: while connecting it
//! abandons the attempt, while subscribing or running it tears the link down.

use std::io::Write;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::{FutureExt, Stream, StreamExt};
use log::{debug, info, warn};
use tokio::sync::watch;
use uuid::Uuid;

use crate::accumulator::{RecordingSummary, StreamAccumulator};
use crate::commands::{CommandSource, Origin};
use crate::config::ClientConfig;
use crate::errors::{BluetoothError, ClientError, Result};
use crate::protocol::{self, hexdump};

// ============================================================================
// Transport Abstraction
// ============================================================================

/// Notification payloads from one characteristic, in delivery order.
/// The stream ends when the link goes away.
pub type Notifications = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// A connected GATT client link.
#[async_trait]
pub trait GattLink: Send {
    async fn subscribe(&mut self, characteristic: Uuid) -> Result<Notifications>;
    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<()>;
    /// Write without response.
    async fn write_command(&mut self, characteristic: Uuid, data: &[u8]) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
}

/// Opens links by device address.
#[async_trait]
pub trait Connector: Send + Sync {
    type Link: GattLink;

    async fn connect(&self, address: &str) -> Result<Self::Link>;

    /// Undo whatever a cancelled `connect` may have left behind.
    async fn abandon(&self, _address: &str) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Shutdown
// ============================================================================

/// Stop request shared by every phase of a run. Clones observe the same
/// request.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending half of a [`Shutdown`].
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Shutdown { rx })
    }

    /// Resolves once a stop was requested. Never resolves if the trigger is
    /// dropped unused.
    pub async fn requested(&self) {
        let mut rx = self.rx.clone();
        let fired = rx.wait_for(|stop| *stop).await.is_ok();
        if fired || *rx.borrow() {
            return;
        }
        std::future::pending::<()>().await
    }
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

// ============================================================================
// Console
// ============================================================================

/// Line-oriented transcript output shared by the telemetry and command paths.
pub struct Console {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Console {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn timestamped(&self, text: &str) {
        let ts = chrono::Local::now().format("%H:%M:%S");
        self.plain(&format!("[{ts}] {text}"));
    }

    fn plain(&self, text: &str) {
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(out, "{text}").and_then(|_| out.flush()) {
            warn!("console write failed: {e}");
        }
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Subscribed,
    Running,
    Draining,
    Closed,
}

/// Why a run finished cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// One-shot mode listened for the full keepalive.
    KeepaliveElapsed,
    /// Interactive input reached end of file.
    InputClosed,
    /// The shutdown signal fired.
    Interrupted,
}

/// One session per process run.
///
/// # Example
/// ```ignore
/// let (stop, shutdown) = Shutdown::new();
/// let mut session = Session::new(&config, StreamAccumulator::new(), Console::stdout());
/// let end = session
///     .start(&connector, "C8:2E:18:00:00:01", CommandSource::fixed(["PING"]), &shutdown)
///     .await?;
/// ```
pub struct Session<L: GattLink> {
    link: Option<L>,
    state: SessionState,
    address: Option<String>,
    service_uuid: Uuid,
    rx_uuid: Uuid,
    tx_uuid: Uuid,
    pacing: Duration,
    keepalive: Duration,
    accumulator: StreamAccumulator,
    console: Console,
}

impl<L: GattLink> Session<L> {
    pub fn new(config: &ClientConfig, accumulator: StreamAccumulator, console: Console) -> Self {
        Self {
            link: None,
            state: SessionState::Idle,
            address: None,
            service_uuid: config.service_uuid,
            rx_uuid: config.rx_uuid,
            tx_uuid: config.tx_uuid,
            pacing: config.pacing,
            keepalive: config.keepalive,
            accumulator,
            console,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn accumulator(&self) -> &StreamAccumulator {
        &self.accumulator
    }

    fn set_state(&mut self, next: SessionState) {
        debug!("session state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Open the link. A failure is terminal for this session.
    pub async fn connect<C>(&mut self, connector: &C, address: &str) -> Result<()>
    where
        C: Connector<Link = L> + ?Sized,
    {
        if self.state != SessionState::Idle {
            return Err(ClientError::InvalidConfig(format!(
                "connect called in state {:?}",
                self.state
            )));
        }
        self.set_state(SessionState::Connecting);
        info!("connecting: address={}", address);

        match connector.connect(address).await {
            Ok(link) => {
                self.link = Some(link);
                self.address = Some(address.to_string());
                self.set_state(SessionState::Connected);
                info!(
                    "connected: address={}, svc={}, rx={}, tx={}",
                    address, self.service_uuid, self.rx_uuid, self.tx_uuid
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Closed);
                Err(match e {
                    ClientError::Bluetooth(BluetoothError::ConnectFailed { .. }) => e,
                    other => BluetoothError::ConnectFailed {
                        address: address.to_string(),
                        reason: other.to_string(),
                    }
                    .into(),
                })
            }
        }
    }

    /// Connect, then [`run`](Self::run). A shutdown request while the
    /// connection is still being opened abandons it and ends cleanly.
    pub async fn start<C>(
        &mut self,
        connector: &C,
        address: &str,
        source: CommandSource,
        shutdown: &Shutdown,
    ) -> Result<SessionEnd>
    where
        C: Connector<Link = L> + ?Sized,
    {
        let connected = tokio::select! {
            res = self.connect(connector, address) => Some(res),
            () = shutdown.requested() => None,
        };
        match connected {
            Some(res) => res?,
            None => {
                info!("shutdown requested while connecting: address={}", address);
                if let Err(e) = connector.abandon(address).await {
                    warn!("abandoning connection failed: {e}");
                }
                self.set_state(SessionState::Closed);
                return Ok(SessionEnd::Interrupted);
            }
        }
        self.run(source, shutdown).await
    }

    /// Subscribe to TX, exchange commands and telemetry until the source is
    /// done or `shutdown` fires, then tear the link down.
    pub async fn run(
        &mut self,
        mut source: CommandSource,
        shutdown: &Shutdown,
    ) -> Result<SessionEnd> {
        let Some(mut link) = self.link.take() else {
            return Err(BluetoothError::Disconnected.into());
        };

        let subscribed = tokio::select! {
            res = link.subscribe(self.tx_uuid) => Some(res),
            () = shutdown.requested() => None,
        };
        let mut notifications = match subscribed {
            Some(Ok(n)) => n,
            Some(Err(e)) => {
                warn!("subscribe to TX failed: {e}");
                self.set_state(SessionState::Draining);
                self.disconnect(&mut link).await;
                self.set_state(SessionState::Closed);
                return Err(e);
            }
            None => {
                info!("shutdown requested while subscribing");
                self.set_state(SessionState::Draining);
                self.disconnect(&mut link).await;
                self.set_state(SessionState::Closed);
                return Ok(SessionEnd::Interrupted);
            }
        };
        self.set_state(SessionState::Subscribed);
        info!("TX notifications enabled");

        self.set_state(SessionState::Running);
        let outcome: Result<SessionEnd> = {
            let telemetry =
                pump_notifications(&mut notifications, &mut self.accumulator, &self.console);
            let commands = drive_commands(
                &mut link,
                self.rx_uuid,
                &mut source,
                self.pacing,
                self.keepalive,
                &self.console,
            );
            tokio::select! {
                end = commands => end,
                () = telemetry => Err(BluetoothError::Disconnected.into()),
                () = shutdown.requested() => {
                    info!("shutdown requested");
                    Ok(SessionEnd::Interrupted)
                }
            }
        };

        self.set_state(SessionState::Draining);
        // frames already delivered still belong in the transcript and sink
        while let Some(Some(data)) = notifications.next().now_or_never() {
            dispatch_notification(&data, &mut self.accumulator, &self.console);
        }
        if let Err(e) = link.unsubscribe(self.tx_uuid).await {
            warn!("unsubscribe from TX failed (ignored): {e}");
        }
        self.disconnect(&mut link).await;
        self.set_state(SessionState::Closed);

        match &outcome {
            Ok(end) => info!("session finished: {:?}", end),
            Err(e) => warn!("session aborted: {e}"),
        }
        outcome
    }

    async fn disconnect(&mut self, link: &mut L) {
        match link.disconnect().await {
            Ok(()) => info!(
                "disconnected: address={}",
                self.address.as_deref().unwrap_or("?")
            ),
            Err(e) => warn!("disconnect failed: {e}"),
        }
    }
}

async fn pump_notifications(
    notifications: &mut Notifications,
    accumulator: &mut StreamAccumulator,
    console: &Console,
) {
    while let Some(data) = notifications.next().await {
        dispatch_notification(&data, accumulator, console);
    }
    warn!("TX notification stream ended");
}

fn dispatch_notification(data: &[u8], accumulator: &mut StreamAccumulator, console: &Console) {
    let Some(frame) = protocol::parse(data) else {
        console.timestamped(&format!(
            "<< TX raw {} bytes hex={}",
            data.len(),
            hexdump(data)
        ));
        return;
    };

    let (kind, text) = protocol::describe(&frame);
    console.timestamped(&format!("<< TX {text}"));
    if let Some(RecordingSummary {
        chunk_count,
        byte_count,
    }) = accumulator.observe(kind, &frame)
    {
        console.timestamped(&format!(
            "   total AUDIO_CHUNK: chunks={chunk_count} bytes={byte_count}"
        ));
    }
}

async fn drive_commands<L: GattLink>(
    link: &mut L,
    rx_uuid: Uuid,
    source: &mut CommandSource,
    pacing: Duration,
    keepalive: Duration,
    console: &Console,
) -> Result<SessionEnd> {
    if source.is_interactive() {
        console.plain("Enter commands for RX (e.g. PING / SETREC:2 / REC). Ctrl+C to exit.");
    }

    while let Some(cmd) = source.next_command().await? {
        link.write_command(rx_uuid, cmd.as_bytes()).await?;
        console.plain(&format!(">> RX: {:?}", cmd.text));
        if cmd.origin == Origin::Scripted {
            tokio::time::sleep(pacing).await;
        }
    }

    if source.is_interactive() {
        return Ok(SessionEnd::InputClosed);
    }
    debug!("keeping link open for {:?}", keepalive);
    tokio::time::sleep(keepalive).await;
    Ok(SessionEnd::KeepaliveElapsed)
}
