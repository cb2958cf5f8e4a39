use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use tokio::sync::watch;

use super::{CaptureError, Display, DisplayId, DisplayService, HotplugPoller};
use crate::image::RawImage;

/// Displays backed by image files
///
/// Each configured file stands for one display, identified by its position in
/// the list. A file that cannot be read is a disconnected display. Decoded
/// images are cached until the file modification time changes.
pub struct ImageFileDisplays {
    inner: Arc<Inner>,
    poller: HotplugPoller,
}

struct Inner {
    files: Vec<PathBuf>,
    cache: Mutex<HashMap<DisplayId, CachedImage>>,
}

struct CachedImage {
    modified: SystemTime,
    image: RawImage,
}

impl Inner {
    fn enumerate(&self) -> Result<Vec<Display>, CaptureError> {
        let mut displays = Vec::with_capacity(self.files.len());

        for (idx, path) in self.files.iter().enumerate() {
            match image::image_dimensions(path) {
                Ok((width, height)) => displays.push(Display {
                    id: DisplayId(idx as _),
                    name: Some(path.display().to_string()),
                    width,
                    height,
                }),
                Err(error) => {
                    trace!(path = %path.display(), error = %error, "display file unavailable");
                }
            }
        }

        Ok(displays)
    }

    fn capture(&self, id: DisplayId) -> Result<RawImage, CaptureError> {
        let path = self
            .files
            .get(id.0 as usize)
            .ok_or(CaptureError::CaptureUnavailable(id))?;

        let modified = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map_err(|_| CaptureError::CaptureUnavailable(id))?;

        if let Some(cached) = self.cache_lock().get(&id) {
            if cached.modified == modified {
                return Ok(cached.image.clone());
            }
        }

        let image = RawImage::from(image::open(path)?.to_rgb8());
        debug!(path = %path.display(), width = %image.width(), height = %image.height(), "loaded display image");

        self.cache_lock().insert(
            id,
            CachedImage {
                modified,
                image: image.clone(),
            },
        );

        Ok(image)
    }

    fn cache_lock(&self) -> std::sync::MutexGuard<'_, HashMap<DisplayId, CachedImage>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ImageFileDisplays {
    pub async fn new(files: Vec<PathBuf>, hotplug_poll: Duration) -> Result<Self, CaptureError> {
        let inner = Arc::new(Inner {
            files,
            cache: Mutex::new(HashMap::new()),
        });

        let initial = tokio::task::spawn_blocking({
            let inner = inner.clone();
            move || inner.enumerate()
        })
        .await??;

        info!(count = %initial.len(), "image file displays ready");

        let poller = HotplugPoller::spawn(initial, hotplug_poll, {
            let inner = inner.clone();
            move || inner.enumerate()
        });

        Ok(Self { inner, poller })
    }
}

#[async_trait]
impl DisplayService for ImageFileDisplays {
    async fn list_displays(&self) -> Result<Vec<Display>, CaptureError> {
        self.poller.refresh().await
    }

    async fn capture(&self, display: &Display) -> Result<RawImage, CaptureError> {
        let inner = self.inner.clone();
        let id = display.id;

        tokio::task::spawn_blocking(move || inner.capture(id)).await?
    }

    fn subscribe(&self) -> watch::Receiver<Vec<Display>> {
        self.poller.subscribe()
    }
}
