use std::{sync::Arc, time::Duration};

use tokio::{select, sync::watch, time::MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::{CaptureError, Display};

type ListFn = dyn Fn() -> Result<Vec<Display>, CaptureError> + Send + Sync;

/// Display change notifications for backends that can only enumerate
///
/// Polls the display list on a blocking thread and publishes it whenever it
/// changes. The polling task stops when the poller is dropped.
pub struct HotplugPoller {
    tx: watch::Sender<Vec<Display>>,
    list: Arc<ListFn>,
    _guard: DropGuard,
}

impl HotplugPoller {
    pub fn spawn<F>(initial: Vec<Display>, period: Duration, list: F) -> Self
    where
        F: Fn() -> Result<Vec<Display>, CaptureError> + Send + Sync + 'static,
    {
        let (tx, _) = watch::channel(initial);
        let list: Arc<ListFn> = Arc::new(list);
        let token = CancellationToken::new();

        tokio::spawn({
            let tx = tx.clone();
            let list = list.clone();
            let token = token.clone();

            async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {
                            if let Err(error) = Self::poll(&tx, list.clone()).await {
                                warn!(error = %error, "failed to enumerate displays");
                            }
                        }
                    }
                }

                trace!("hotplug poller stopped");
            }
        });

        Self {
            tx,
            list,
            _guard: token.drop_guard(),
        }
    }

    async fn poll(
        tx: &watch::Sender<Vec<Display>>,
        list: Arc<ListFn>,
    ) -> Result<Vec<Display>, CaptureError> {
        let displays = tokio::task::spawn_blocking(move || list()).await??;

        let changed = tx.send_if_modified(|current| {
            if *current != displays {
                *current = displays.clone();
                true
            } else {
                false
            }
        });

        if changed {
            info!(count = %displays.len(), "display list changed");
        }

        Ok(displays)
    }

    /// Enumerate displays now, notifying subscribers if the list changed
    pub async fn refresh(&self) -> Result<Vec<Display>, CaptureError> {
        Self::poll(&self.tx, self.list.clone()).await
    }

    pub fn current(&self) -> Vec<Display> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Display>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::capture::DisplayId;

    fn display(id: u64) -> Display {
        Display {
            id: DisplayId(id),
            name: None,
            width: 100,
            height: 100,
        }
    }

    #[tokio::test]
    async fn publishes_changes() {
        let source = Arc::new(Mutex::new(vec![display(1)]));
        let poller = HotplugPoller::spawn(vec![display(1)], Duration::from_millis(5), {
            let source = source.clone();
            move || Ok(source.lock().unwrap().clone())
        });

        let mut rx = poller.subscribe();
        *source.lock().unwrap() = vec![display(1), display(2)];

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("no change notification")
            .expect("poller dropped");

        assert_eq!(*rx.borrow_and_update(), vec![display(1), display(2)]);
        assert_eq!(poller.current().len(), 2);
    }

    #[tokio::test]
    async fn refresh_without_change_does_not_notify() {
        let poller = HotplugPoller::spawn(vec![display(1)], Duration::from_secs(3600), || {
            Ok(vec![display(1)])
        });

        let rx = poller.subscribe();
        poller.refresh().await.expect("refresh failed");

        assert!(!rx.has_changed().expect("poller dropped"));
    }
}
