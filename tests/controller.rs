use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use ambilight::{
    capture::{CaptureError, Display, DisplayId, DisplayService},
    controller::{AmbilightController, ControllerEvent, ControllerState, SkipReason},
    image::RawImage,
    models::{Color, Config, Direction, DisplayAssignment, Strand},
    transport::{SerialTransport, TransportError},
};
use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

/// Display service serving fixed images
struct FakeDisplays {
    tx: watch::Sender<Vec<Display>>,
    images: Mutex<HashMap<DisplayId, RawImage>>,
    capture_delay: Mutex<Duration>,
}

impl FakeDisplays {
    fn new(capture_delay: Duration) -> Arc<Self> {
        let (tx, _) = watch::channel(Vec::new());

        Arc::new(Self {
            tx,
            images: Mutex::new(HashMap::new()),
            capture_delay: Mutex::new(capture_delay),
        })
    }

    fn set_capture_delay(&self, delay: Duration) {
        *self.capture_delay.lock().unwrap() = delay;
    }

    /// Replace the connected displays, as a hotplug event would
    fn connect(&self, displays: Vec<(Display, RawImage)>) {
        let mut images = self.images.lock().unwrap();
        images.clear();

        let mut list = Vec::new();
        for (display, image) in displays {
            images.insert(display.id, image);
            list.push(display);
        }

        self.tx.send_replace(list);
    }
}

#[async_trait]
impl DisplayService for FakeDisplays {
    async fn list_displays(&self) -> Result<Vec<Display>, CaptureError> {
        Ok(self.tx.borrow().clone())
    }

    async fn capture(&self, display: &Display) -> Result<RawImage, CaptureError> {
        let delay = *self.capture_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.images
            .lock()
            .unwrap()
            .get(&display.id)
            .cloned()
            .ok_or(CaptureError::CaptureUnavailable(display.id))
    }

    fn subscribe(&self) -> watch::Receiver<Vec<Display>> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Record {
    Open(String),
    Send(Vec<u8>),
    Close,
}

/// Transport recording every call
#[derive(Clone, Default)]
struct RecordingTransport {
    log: Arc<Mutex<Vec<Record>>>,
    open: bool,
    /// Number of sends to fail before succeeding
    failing_sends: Arc<Mutex<u32>>,
}

impl RecordingTransport {
    fn records(&self) -> Vec<Record> {
        self.log.lock().unwrap().clone()
    }

    fn frames(&self) -> Vec<Vec<u8>> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                Record::Send(data) => Some(data),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SerialTransport for RecordingTransport {
    async fn open(&mut self, port: &str) -> Result<(), TransportError> {
        self.log.lock().unwrap().push(Record::Open(port.to_owned()));
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        if self.open {
            self.log.lock().unwrap().push(Record::Close);
            self.open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }

        {
            let mut failing = self.failing_sends.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(TransportError::NotConnected);
            }
        }

        self.log.lock().unwrap().push(Record::Send(data.to_vec()));
        Ok(())
    }

    fn list_ports(&self) -> Result<Vec<String>, TransportError> {
        Ok(vec!["test".to_owned()])
    }
}

#[derive(Debug, Clone, PartialEq)]
enum WireEvent {
    Open,
    Byte(u8),
    Close,
}

/// Transport writing one byte at a time, slower than a tick for a whole frame
#[derive(Clone, Default)]
struct SlowTransport {
    wire: Arc<Mutex<Vec<WireEvent>>>,
    open: bool,
}

impl SlowTransport {
    /// Bytes received during each connection, in order
    fn sessions(&self) -> Vec<Vec<u8>> {
        let mut sessions = Vec::new();

        for event in self.wire.lock().unwrap().iter() {
            match event {
                WireEvent::Open => sessions.push(Vec::new()),
                WireEvent::Byte(byte) => sessions
                    .last_mut()
                    .expect("byte written before open")
                    .push(*byte),
                WireEvent::Close => {}
            }
        }

        sessions
    }
}

#[async_trait]
impl SerialTransport for SlowTransport {
    async fn open(&mut self, _port: &str) -> Result<(), TransportError> {
        self.wire.lock().unwrap().push(WireEvent::Open);
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        if self.open {
            self.wire.lock().unwrap().push(WireEvent::Close);
            self.open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }

        for byte in data {
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.wire.lock().unwrap().push(WireEvent::Byte(*byte));
        }

        Ok(())
    }

    fn list_ports(&self) -> Result<Vec<String>, TransportError> {
        Ok(vec!["test".to_owned()])
    }
}

fn display(id: u64) -> Display {
    Display {
        id: DisplayId(id),
        name: Some(format!("display {}", id)),
        width: 100,
        height: 100,
    }
}

fn rgb_image() -> RawImage {
    RawImage::from_fn(100, 100, |x, y| match (x / 10, y / 10) {
        (0, 0) => Color::new(255, 0, 0),
        (1, 0) => Color::new(0, 255, 0),
        (2, 0) => Color::new(0, 0, 255),
        _ => Color::new(0, 0, 0),
    })
}

fn config() -> Config {
    Config {
        period_ms: 5,
        capture_timeout_ms: None,
        failure_warning_threshold: 3,
        port: "test".to_owned(),
        transport: Default::default(),
        capture: Default::default(),
        frame: Default::default(),
        displays: vec![DisplayAssignment {
            width: 100,
            height: 100,
            shown: 0,
        }],
        strands: vec![Strand {
            id_min: 0,
            count: 3,
            display: 0,
            start_x: 0,
            start_y: 0,
            direction: Direction::Right,
            size: 10,
        }],
    }
}

const RGB_FRAME: [u8; 9] = [0xFF, 0x00, 0x00, 0x00, 0xFF, 0x00, 0x00, 0x00, 0xFF];

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn wait_event(
    rx: &mut broadcast::Receiver<ControllerEvent>,
    mut pred: impl FnMut(&ControllerEvent) -> bool,
) -> ControllerEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not received in time")
}

#[tokio::test]
async fn sends_sampled_colors() {
    let displays = FakeDisplays::new(Duration::ZERO);
    displays.connect(vec![(display(1), rgb_image())]);
    let transport = RecordingTransport::default();

    let controller = AmbilightController::new(displays, Box::new(transport.clone()));
    controller.start(config()).await.expect("start failed");
    assert_eq!(controller.state().await, ControllerState::Running);

    wait_until(|| transport.frames().len() >= 2).await;
    controller.stop().await;

    let frames = transport.frames();
    assert!(frames.iter().all(|frame| frame == &RGB_FRAME));
    assert_eq!(transport.records().first(), Some(&Record::Open("test".to_owned())));
    assert_eq!(transport.records().last(), Some(&Record::Close));
    assert_eq!(controller.state().await, ControllerState::Stopped);
}

#[tokio::test]
async fn start_twice_fails() {
    let displays = FakeDisplays::new(Duration::ZERO);
    let controller =
        AmbilightController::new(displays, Box::new(RecordingTransport::default()));

    controller.start(config()).await.expect("start failed");
    assert!(controller.start(config()).await.is_err());

    controller.stop().await;
    controller.stop().await;
    assert_eq!(controller.state().await, ControllerState::Stopped);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let displays = FakeDisplays::new(Duration::ZERO);
    let controller =
        AmbilightController::new(displays, Box::new(RecordingTransport::default()));

    let mut bad = config();
    bad.strands[0].display = 3;

    assert!(controller.start(bad).await.is_err());
    assert_eq!(controller.state().await, ControllerState::Stopped);
}

#[tokio::test]
async fn display_hotplug() {
    let displays = FakeDisplays::new(Duration::ZERO);
    displays.connect(vec![(display(1), rgb_image())]);
    let transport = RecordingTransport::default();

    let controller = AmbilightController::new(displays.clone(), Box::new(transport.clone()));
    let mut events = controller.subscribe();
    controller.start(config()).await.expect("start failed");

    wait_until(|| !transport.frames().is_empty()).await;

    // Unplug: the last known colors keep being sent
    displays.connect(vec![]);
    wait_event(&mut events, |event| {
        matches!(event, ControllerEvent::StrandSkipped { strand: 0, reason: SkipReason::Geometry(_) })
    })
    .await;

    let sent = transport.frames().len();
    wait_until(|| transport.frames().len() >= sent + 2).await;
    assert!(transport.frames()[sent..].iter().all(|frame| frame == &RGB_FRAME));

    // Plug back in under a new identifier
    displays.connect(vec![(
        display(2),
        RawImage::from_fn(100, 100, |_, _| Color::new(1, 2, 3)),
    )]);
    wait_event(&mut events, |event| {
        matches!(event, ControllerEvent::StrandResumed { strand: 0 })
    })
    .await;

    let expected = vec![1, 2, 3, 1, 2, 3, 1, 2, 3];
    wait_until(|| transport.frames().last() == Some(&expected)).await;

    controller.stop().await;
}

#[tokio::test]
async fn no_send_after_stop() {
    // Captures take several periods, so stop lands during a tick
    let displays = FakeDisplays::new(Duration::from_millis(4));
    displays.connect(vec![(display(1), rgb_image())]);
    let transport = RecordingTransport::default();

    let controller = AmbilightController::new(displays, Box::new(transport.clone()));
    controller.start(config()).await.expect("start failed");

    wait_until(|| !transport.frames().is_empty()).await;
    controller.stop().await;

    let records = transport.records();
    assert_eq!(records.last(), Some(&Record::Close));

    // Nothing is sent once stop returned
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.records(), records);
}

#[tokio::test]
async fn send_failures_do_not_stop_the_loop() {
    let displays = FakeDisplays::new(Duration::ZERO);
    displays.connect(vec![(display(1), rgb_image())]);
    let transport = RecordingTransport::default();
    *transport.failing_sends.lock().unwrap() = 4;

    let controller = AmbilightController::new(displays, Box::new(transport.clone()));
    let mut events = controller.subscribe();
    controller.start(config()).await.expect("start failed");

    assert_eq!(
        wait_event(&mut events, |event| matches!(event, ControllerEvent::ConnectivityWarning { .. })).await,
        ControllerEvent::ConnectivityWarning { failures: 3 }
    );
    wait_event(&mut events, |event| *event == ControllerEvent::ConnectivityRestored).await;

    wait_until(|| !transport.frames().is_empty()).await;
    assert_eq!(controller.state().await, ControllerState::Running);

    controller.stop().await;
}

#[tokio::test]
async fn update_config_between_ticks() {
    let displays = FakeDisplays::new(Duration::ZERO);
    displays.connect(vec![(display(1), rgb_image())]);
    let transport = RecordingTransport::default();

    let controller = AmbilightController::new(displays, Box::new(transport.clone()));
    assert!(controller.update_config(config()).await.is_err());

    controller.start(config()).await.expect("start failed");
    wait_until(|| !transport.frames().is_empty()).await;

    // Single LED sampling the green square, on another port
    let mut updated = config();
    updated.port = "other".to_owned();
    updated.strands[0].count = 1;
    updated.strands[0].start_x = 10;
    controller
        .update_config(updated)
        .await
        .expect("update failed");

    wait_until(|| transport.frames().last() == Some(&vec![0x00, 0xFF, 0x00])).await;
    assert!(transport
        .records()
        .contains(&Record::Open("other".to_owned())));

    // Frames are never mixed between configurations
    assert!(transport
        .frames()
        .iter()
        .all(|frame| frame == &RGB_FRAME || frame == &[0x00, 0xFF, 0x00]));

    controller.stop().await;
}

#[tokio::test]
async fn send_timeout_resets_the_link() {
    let displays = FakeDisplays::new(Duration::ZERO);
    displays.connect(vec![(display(1), rgb_image())]);
    let transport = SlowTransport::default();

    let mut config = config();
    config.period_ms = 10;

    let controller = AmbilightController::new(displays, Box::new(transport.clone()));
    let mut events = controller.subscribe();
    controller.start(config).await.expect("start failed");

    // 9 bytes at 2 ms each never fit in a 10 ms tick
    wait_event(&mut events, |event| matches!(event, ControllerEvent::ConnectivityWarning { .. })).await;
    wait_until(|| transport.sessions().len() >= 3).await;
    assert_eq!(controller.state().await, ControllerState::Running);

    controller.stop().await;

    // Every connection starts on a frame boundary, a cut frame is never
    // continued by the next one
    let sessions = transport.sessions();
    for session in &sessions {
        assert!(session.len() < RGB_FRAME.len(), "session {:?}", session);
        assert_eq!(&session[..], &RGB_FRAME[..session.len()]);
    }
}

#[tokio::test]
async fn capture_timeout_keeps_last_colors() {
    let displays = FakeDisplays::new(Duration::ZERO);
    displays.connect(vec![(display(1), rgb_image())]);
    let transport = RecordingTransport::default();

    let controller = AmbilightController::new(displays.clone(), Box::new(transport.clone()));
    let mut events = controller.subscribe();
    controller.start(config()).await.expect("start failed");

    wait_until(|| !transport.frames().is_empty()).await;

    // Captures now take ten tick periods
    displays.set_capture_delay(Duration::from_millis(50));
    wait_event(&mut events, |event| {
        matches!(event, ControllerEvent::StrandSkipped { strand: 0, reason: SkipReason::Capture(_) })
    })
    .await;

    let sent = transport.frames().len();
    wait_until(|| transport.frames().len() >= sent + 2).await;
    assert!(transport.frames()[sent..].iter().all(|frame| frame == &RGB_FRAME));
    assert_eq!(controller.state().await, ControllerState::Running);

    // A longer capture timeout lets the same captures through again
    let mut patient = config();
    patient.capture_timeout_ms = Some(500);
    controller
        .update_config(patient)
        .await
        .expect("update failed");

    wait_event(&mut events, |event| {
        matches!(event, ControllerEvent::StrandResumed { strand: 0 })
    })
    .await;

    controller.stop().await;
}
