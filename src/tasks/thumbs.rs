use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::Sender;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::events::{ThumbnailFailed, ThumbnailReady};
use crate::source::ImageId;
use crate::store::ThumbnailStore;

/// Hands thumbnail generation to a single background worker.
///
/// Requests are deduplicated while pending and drained one at a time, so at
/// most one decode runs per queue and peak memory stays bounded. The worker
/// exits once the queue is empty; the next enqueue spawns a fresh one. An
/// enqueue racing with a worker on its way out is caught by the re-check in
/// the drain loop, so queued work is always eventually drained.
pub struct ThumbnailService {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<ThumbnailStore>,
    ready_tx: Sender<ThumbnailReady>,
    failed_tx: Sender<ThumbnailFailed>,
    cancel: CancellationToken,
    thumb_size: u32,
    queue: Mutex<Pending>,
    worker_active: AtomicBool,
}

#[derive(Default)]
struct Pending {
    order: VecDeque<ImageId>,
    queued: HashSet<ImageId>,
}

impl ThumbnailService {
    pub fn new(
        store: Arc<ThumbnailStore>,
        ready_tx: Sender<ThumbnailReady>,
        failed_tx: Sender<ThumbnailFailed>,
        cancel: CancellationToken,
        thumb_size: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                ready_tx,
                failed_tx,
                cancel,
                thumb_size,
                queue: Mutex::new(Pending::default()),
                worker_active: AtomicBool::new(false),
            }),
        }
    }

    /// Queue `id` for generation, spawning the worker if none is active.
    /// Returns `false` and does nothing if the identifier is already
    /// pending. Must be called from within a Tokio runtime.
    pub fn enqueue(&self, id: ImageId) -> bool {
        {
            let mut queue = self.inner.queue.lock().expect("thumbnail queue poisoned");
            if !queue.queued.insert(id.clone()) {
                debug!(id = %id, "already pending; enqueue ignored");
                return false;
            }
            queue.order.push_back(id);
        }
        self.ensure_worker();
        true
    }

    /// Drop every not-yet-started request. An in-flight generation finishes
    /// and still notifies. Cleared requests are not restored; callers
    /// re-enqueue when they want them again.
    pub fn stop_fetching(&self) {
        let mut queue = self.inner.queue.lock().expect("thumbnail queue poisoned");
        let dropped = queue.order.len();
        queue.order.clear();
        queue.queued.clear();
        if dropped > 0 {
            debug!(dropped, "cleared pending thumbnail requests");
        }
    }

    pub fn pending(&self) -> usize {
        self.inner
            .queue
            .lock()
            .expect("thumbnail queue poisoned")
            .order
            .len()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.worker_active.load(Ordering::Acquire)
    }

    fn ensure_worker(&self) {
        if !self.inner.worker_active.swap(true, Ordering::AcqRel) {
            let inner = Arc::clone(&self.inner);
            task::spawn(drain(inner));
        }
    }
}

async fn drain(inner: Arc<Inner>) {
    debug!("thumbnail worker started");
    loop {
        if inner.cancel.is_cancelled() {
            inner.worker_active.store(false, Ordering::Release);
            debug!("thumbnail worker cancelled");
            return;
        }

        let next = {
            let mut queue = inner.queue.lock().expect("thumbnail queue poisoned");
            let id = queue.order.pop_front();
            if let Some(id) = &id {
                queue.queued.remove(id);
            }
            id
        };
        let Some(id) = next else {
            inner.worker_active.store(false, Ordering::Release);
            // An enqueue may have seen the worker as active while we popped
            // the last item; reclaim the flag if work slipped in.
            let refill = !inner
                .queue
                .lock()
                .expect("thumbnail queue poisoned")
                .order
                .is_empty();
            if refill
                && inner
                    .worker_active
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                continue;
            }
            debug!("thumbnail worker idle; exiting");
            return;
        };

        let store = Arc::clone(&inner.store);
        let cancel = inner.cancel.clone();
        let size = inner.thumb_size;
        let item = id.clone();
        let produced =
            task::spawn_blocking(move || store.get_or_create(&item, size, Some(cancel))).await;

        match produced {
            Ok(Ok(Some(location))) => {
                let _ = inner.ready_tx.send(ThumbnailReady { id, location }).await;
            }
            Ok(Ok(None)) => {
                let _ = inner.failed_tx.send(ThumbnailFailed(id)).await;
            }
            Ok(Err(err)) => {
                warn!(id = %id, error = %err, "thumbnail generation failed");
                let _ = inner.failed_tx.send(ThumbnailFailed(id)).await;
            }
            Err(err) => {
                warn!(id = %id, error = %err, "thumbnail task panicked");
                let _ = inner.failed_tx.send(ThumbnailFailed(id)).await;
            }
        }
    }
}
