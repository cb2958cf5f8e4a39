//! Ambilight update loop and its start/stop control surface

use std::{collections::HashMap, sync::Arc, time::Duration};

use parse_display::Display;
use thiserror::Error;
use tokio::{
    select,
    sync::{broadcast, mpsc, watch, Mutex},
    task::JoinHandle,
    time::{timeout, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    capture::{self, CaptureError, DisplayService},
    geometry::GeometryError,
    models::{Config, ConfigError},
    transport::{SerialTransport, TransportError},
};

mod core;
pub use self::core::*;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("the controller is already running")]
    AlreadyRunning,
    #[error("the controller is not running")]
    NotRunning,
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ControllerState {
    Stopped,
    Running,
}

/// Why a strand was left out of a tick
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum SkipReason {
    #[display("{0}")]
    Geometry(GeometryError),
    #[display("capture failed: {0}")]
    Capture(String),
}

/// Notifications for the user interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Started,
    Stopped,
    DisplaysChanged { count: usize },
    StrandSkipped { strand: usize, reason: SkipReason },
    StrandResumed { strand: usize },
    /// The last `failures` frames could not be sent
    ConnectivityWarning { failures: u32 },
    ConnectivityRestored,
}

type SharedTransport = Arc<Mutex<Box<dyn SerialTransport>>>;

struct Running {
    token: CancellationToken,
    config_tx: mpsc::Sender<Arc<Config>>,
    join: JoinHandle<()>,
}

/// Drives the capture, sample, encode and send pipeline at a fixed period
pub struct AmbilightController {
    displays: Arc<dyn DisplayService>,
    transport: SharedTransport,
    running: Mutex<Option<Running>>,
    event_tx: broadcast::Sender<ControllerEvent>,
}

impl AmbilightController {
    pub fn new(displays: Arc<dyn DisplayService>, transport: Box<dyn SerialTransport>) -> Self {
        let (event_tx, _) = broadcast::channel(64);

        Self {
            displays,
            transport: Arc::new(Mutex::new(transport)),
            running: Mutex::new(None),
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.event_tx.subscribe()
    }

    pub fn display_service(&self) -> &Arc<dyn DisplayService> {
        &self.displays
    }

    pub async fn state(&self) -> ControllerState {
        if self.running.lock().await.is_some() {
            ControllerState::Running
        } else {
            ControllerState::Stopped
        }
    }

    /// Ports the transport can open, for the user to pick from
    pub async fn list_ports(&self) -> Result<Vec<String>, TransportError> {
        self.transport.lock().await.list_ports()
    }

    /// Open the transport and start the update loop
    ///
    /// A transport that fails to open does not prevent starting: opening is
    /// retried on every tick.
    #[instrument(skip_all, fields(port = %config.port))]
    pub async fn start(&self, config: Config) -> Result<(), ControllerError> {
        config.check()?;

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }

        let config = Arc::new(config);

        if let Err(error) = self.transport.lock().await.open(&config.port).await {
            warn!(error = %error, "failed to open transport, will try again later");
        }

        let mut display_rx = self.displays.subscribe();
        if let Err(error) = self.displays.list_displays().await {
            warn!(error = %error, "failed to enumerate displays");
        }
        let displays = display_rx.borrow_and_update().clone();
        info!(displays = %displays.len(), strands = %config.strands.len(), leds = %config.led_count(), "starting");

        let token = CancellationToken::new();
        let (config_tx, config_rx) = mpsc::channel(1);

        let worker = Worker {
            core: Core::new(config, displays, self.event_tx.clone()),
            displays: self.displays.clone(),
            transport: self.transport.clone(),
            display_rx: Some(display_rx),
            config_rx,
            token: token.clone(),
            link: LinkHealth::default(),
            event_tx: self.event_tx.clone(),
        };

        *running = Some(Running {
            token,
            config_tx,
            join: tokio::spawn(worker.run()),
        });

        self.event_tx.send(ControllerEvent::Started).ok();
        Ok(())
    }

    /// Stop the update loop and close the transport
    ///
    /// Waits for an in-flight tick to complete, so nothing is sent once this
    /// returns. Does nothing but closing the transport if already stopped.
    #[instrument(skip_all)]
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;

        if let Some(Running { token, join, .. }) = running.take() {
            token.cancel();

            if let Err(error) = join.await {
                error!(error = %error, "update loop failed");
            }

            self.transport.lock().await.close().await;

            info!("stopped");
            self.event_tx.send(ControllerEvent::Stopped).ok();
        } else {
            self.transport.lock().await.close().await;
        }
    }

    /// Replace the configuration of the running loop
    ///
    /// Applied between two ticks.
    pub async fn update_config(&self, config: Config) -> Result<(), ControllerError> {
        config.check()?;

        let running = self.running.lock().await;
        let running = running.as_ref().ok_or(ControllerError::NotRunning)?;

        running
            .config_tx
            .send(Arc::new(config))
            .await
            .map_err(|_| ControllerError::NotRunning)
    }
}

impl std::fmt::Debug for AmbilightController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmbilightController").finish()
    }
}

/// Consecutive send failure tracking
#[derive(Debug, Default)]
struct LinkHealth {
    failures: u32,
}

/// The update loop
///
/// Ticks, display changes and configuration updates are all handled from the
/// same task, so a tick always sees a consistent configuration.
struct Worker {
    core: Core,
    displays: Arc<dyn DisplayService>,
    transport: SharedTransport,
    display_rx: Option<watch::Receiver<Vec<capture::Display>>>,
    config_rx: mpsc::Receiver<Arc<Config>>,
    token: CancellationToken,
    link: LinkHealth,
    event_tx: broadcast::Sender<ControllerEvent>,
}

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    // Late ticks are dropped, a fresh frame supersedes them
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

impl Worker {
    async fn run(mut self) {
        let mut interval = ticker(self.core.config().period());

        loop {
            select! {
                biased;

                _ = self.token.cancelled() => {
                    break;
                },
                Some(config) = self.config_rx.recv() => {
                    self.on_config(config, &mut interval).await;
                },
                displays = next_displays(&mut self.display_rx) => {
                    info!(count = %displays.len(), "displays changed");
                    self.event_tx
                        .send(ControllerEvent::DisplaysChanged { count: displays.len() })
                        .ok();
                    self.core.set_displays(displays);
                },
                _ = interval.tick() => {
                    self.tick().await;
                },
            }
        }

        debug!("update loop stopped");
    }

    async fn on_config(&mut self, config: Arc<Config>, interval: &mut Interval) {
        let previous = self.core.config().clone();
        info!(strands = %config.strands.len(), leds = %config.led_count(), "configuration updated");

        if previous.period_ms != config.period_ms {
            *interval = ticker(config.period());
        }

        if previous.port != config.port {
            let mut transport = self.transport.lock().await;
            transport.close().await;

            if let Err(error) = transport.open(&config.port).await {
                warn!(port = %config.port, error = %error, "failed to open transport, will try again later");
            }
        }

        self.core.set_config(config);
    }

    #[instrument(level = "trace", skip_all)]
    async fn tick(&mut self) {
        let config = self.core.config().clone();
        let period = config.period();
        let capture_timeout = config.capture_timeout();

        let plans = self.core.plan();
        let targets = Core::targets(&plans);

        let displays = &self.displays;
        let captures: Captures = futures::future::join_all(targets.iter().map(|display| async move {
            let result = match timeout(capture_timeout, displays.capture(display)).await {
                Ok(result) => result,
                Err(_) => Err(CaptureError::Timeout(display.id)),
            };

            (display.id, result)
        }))
        .await
        .into_iter()
        .collect::<HashMap<_, _>>();

        let data = self.core.assemble(&plans, &captures);
        let result = send(&self.transport, &config.port, data, period).await;

        self.link
            .update(result, config.failure_warning_threshold, &self.event_tx);
    }
}

async fn next_displays(
    rx: &mut Option<watch::Receiver<Vec<capture::Display>>>,
) -> Vec<capture::Display> {
    if let Some(inner) = rx.as_mut() {
        if inner.changed().await.is_ok() {
            return inner.borrow_and_update().clone();
        }

        warn!("display change notifications closed");
    }

    *rx = None;
    futures::future::pending().await
}

/// Send one frame, opening the transport first if needed
///
/// A send that does not complete within `period` closes the transport, the
/// next tick reopens it.
async fn send(
    transport: &SharedTransport,
    port: &str,
    data: &[u8],
    period: Duration,
) -> Result<(), TransportError> {
    let mut transport = transport.lock().await;

    if !transport.is_open() {
        transport.open(port).await?;
    }

    let result = timeout(period, transport.send(data)).await;
    match result {
        Ok(result) => result,
        Err(_) => {
            // Part of the frame may be on the wire, the receiver only
            // realigns on a fresh connection
            transport.close().await;
            Err(TransportError::Timeout)
        }
    }
}

impl LinkHealth {
    fn update(
        &mut self,
        result: Result<(), TransportError>,
        threshold: u32,
        event_tx: &broadcast::Sender<ControllerEvent>,
    ) {
        match result {
            Ok(()) => {
                if self.failures >= threshold {
                    info!(failures = %self.failures, "connectivity restored");
                    event_tx.send(ControllerEvent::ConnectivityRestored).ok();
                }

                self.failures = 0;
            }
            Err(error) => {
                self.failures = self.failures.saturating_add(1);

                if self.failures == 1 {
                    warn!(error = %error, "failed to send frame");
                } else {
                    trace!(error = %error, failures = %self.failures, "failed to send frame");
                }

                if self.failures == threshold {
                    warn!(failures = %self.failures, "serial link keeps failing");
                    event_tx
                        .send(ControllerEvent::ConnectivityWarning {
                            failures: self.failures,
                        })
                        .ok();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_health_warns_once_per_streak() {
        let (tx, mut rx) = broadcast::channel(16);
        let mut link = LinkHealth::default();

        for _ in 0..5 {
            link.update(Err(TransportError::NotConnected), 3, &tx);
        }

        assert_eq!(
            rx.try_recv().ok(),
            Some(ControllerEvent::ConnectivityWarning { failures: 3 })
        );
        assert!(rx.try_recv().is_err());

        link.update(Ok(()), 3, &tx);
        assert_eq!(rx.try_recv().ok(), Some(ControllerEvent::ConnectivityRestored));
        assert_eq!(link.failures, 0);
    }

    #[test]
    fn short_failure_streaks_are_silent() {
        let (tx, mut rx) = broadcast::channel(16);
        let mut link = LinkHealth::default();

        link.update(Err(TransportError::Timeout), 3, &tx);
        link.update(Ok(()), 3, &tx);

        assert!(rx.try_recv().is_err());
    }
}
