//! Display enumeration and snapshot acquisition

use std::sync::Arc;

use async_trait::async_trait;
use parse_display::Display as ParseDisplay;
use thiserror::Error;
use tokio::sync::watch;

use crate::{image::RawImage, models};

mod hotplug;
pub use hotplug::*;

mod image_file;
pub use image_file::ImageFileDisplays;

#[cfg(feature = "xcap")]
mod monitor;
#[cfg(feature = "xcap")]
pub use monitor::XcapDisplays;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("display {0} is not connected")]
    CaptureUnavailable(DisplayId),
    #[error("capture of display {0} timed out")]
    Timeout(DisplayId),
    #[error("capture backend not supported: {0}")]
    NotSupported(&'static str),
    #[error("capture backend error: {0}")]
    Backend(String),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Platform-assigned display identifier
///
/// Only stable while the display stays connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ParseDisplay)]
#[display("#{0}")]
pub struct DisplayId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Display {
    pub id: DisplayId,
    pub name: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Display for Display {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}x{}", self.id, self.width, self.height)?;

        if let Some(name) = &self.name {
            write!(f, " ({})", name)?;
        }

        Ok(())
    }
}

#[async_trait]
pub trait DisplayService: Send + Sync {
    /// Currently connected displays, in a stable order
    async fn list_displays(&self) -> Result<Vec<Display>, CaptureError>;

    /// Snapshot of the contents of `display` at its native resolution
    async fn capture(&self, display: &Display) -> Result<RawImage, CaptureError>;

    /// Register for display list changes
    ///
    /// The receiver holds the latest display list. Dropping it unregisters.
    fn subscribe(&self) -> watch::Receiver<Vec<Display>>;
}

pub async fn from_config(
    config: &models::Capture,
) -> Result<Arc<dyn DisplayService>, CaptureError> {
    match &config.backend {
        models::CaptureBackend::Image { files } => Ok(Arc::new(
            ImageFileDisplays::new(files.clone(), config.hotplug_poll()).await?,
        )),
        #[cfg(feature = "xcap")]
        models::CaptureBackend::Xcap => Ok(Arc::new(XcapDisplays::new(config.hotplug_poll()).await?)),
        #[cfg(not(feature = "xcap"))]
        other => Err(CaptureError::NotSupported(other.into())),
    }
}
