use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use xcap::Monitor;

use super::{CaptureError, Display, DisplayId, DisplayService, HotplugPoller};
use crate::image::RawImage;

impl From<xcap::XCapError> for CaptureError {
    fn from(error: xcap::XCapError) -> Self {
        Self::Backend(error.to_string())
    }
}

/// Live monitors of the host graphics stack
pub struct XcapDisplays {
    poller: HotplugPoller,
}

fn describe(monitor: &Monitor) -> Result<Display, CaptureError> {
    Ok(Display {
        id: DisplayId(monitor.id()? as _),
        name: monitor.name().ok(),
        width: monitor.width()?,
        height: monitor.height()?,
    })
}

fn enumerate() -> Result<Vec<Display>, CaptureError> {
    Monitor::all()?.iter().map(describe).collect()
}

fn capture(id: DisplayId) -> Result<RawImage, CaptureError> {
    let monitor = Monitor::all()?
        .into_iter()
        .find(|monitor| monitor.id().ok().map(|mid| mid as u64) == Some(id.0))
        .ok_or(CaptureError::CaptureUnavailable(id))?;

    Ok(RawImage::from(monitor.capture_image()?))
}

impl XcapDisplays {
    pub async fn new(hotplug_poll: Duration) -> Result<Self, CaptureError> {
        let initial = tokio::task::spawn_blocking(enumerate).await??;

        for found in &initial {
            info!(display = %found, "found display");
        }

        Ok(Self {
            poller: HotplugPoller::spawn(initial, hotplug_poll, enumerate),
        })
    }
}

#[async_trait]
impl DisplayService for XcapDisplays {
    async fn list_displays(&self) -> Result<Vec<Display>, CaptureError> {
        self.poller.refresh().await
    }

    async fn capture(&self, display: &Display) -> Result<RawImage, CaptureError> {
        let id = display.id;
        tokio::task::spawn_blocking(move || capture(id)).await?
    }

    fn subscribe(&self) -> watch::Receiver<Vec<Display>> {
        self.poller.subscribe()
    }
}
