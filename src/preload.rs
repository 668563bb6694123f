//! Background preloading.
//!
//! Preload units are queued FIFO and drained by a single worker thread that is
//! started on first use. The queue has its own mutex, separate from the cache
//! mutex, and a condition variable wakes the worker when work arrives. The
//! worker never holds the queue lock while it materializes a bitmap, so
//! callers can enqueue or cancel at any time; a unit already taken off the
//! queue always runs to completion.
//!
//! The worker only keeps a weak reference to the cache it fills. Dropping the
//! cache stops and joins the worker.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{CacheError, Result};
use crate::model::{PictureDesc, SceneKey};

/// Progress reported to a preload callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PreloadStatus {
    /// The batch started.
    Loading,
    /// Every unit before the end marker has been processed.
    Finished,
    /// The batch was cancelled before its end marker ran.
    Canceled,
}

/// Caller-supplied progress callback. Any user parameter is captured by the
/// closure.
pub type StatusCallback = Arc<dyn Fn(PreloadStatus) + Send + Sync>;

/// One queued piece of preload work.
#[derive(Clone)]
pub enum PreloadUnit {
    /// Materialize a picture into its own block.
    Normal {
        /// Scene that will hold the reference.
        scene: SceneKey,
        /// Resolved picture.
        picture: PictureDesc,
    },
    /// Materialize a picture into the scene's compact arenas.
    NormalCompact {
        /// Scene that owns the arenas and the reference.
        scene: SceneKey,
        /// Resolved picture.
        picture: PictureDesc,
    },
    /// Report `Loading`.
    BeginCallback {
        /// Scene the batch belongs to.
        scene: Option<SceneKey>,
        /// Callback to invoke.
        callback: StatusCallback,
    },
    /// Report `Finished` (or `Canceled` when removed from the queue).
    EndCallback {
        /// Scene the batch belongs to.
        scene: Option<SceneKey>,
        /// Callback to invoke.
        callback: StatusCallback,
    },
}

impl PreloadUnit {
    /// Scene the unit is tagged with.
    pub fn scene(&self) -> Option<SceneKey> {
        match self {
            Self::Normal { scene, .. } | Self::NormalCompact { scene, .. } => Some(*scene),
            Self::BeginCallback { scene, .. } | Self::EndCallback { scene, .. } => *scene,
        }
    }

    /// Picture id for picture units.
    pub fn picture_id(&self) -> Option<u32> {
        match self {
            Self::Normal { picture, .. } | Self::NormalCompact { picture, .. } => Some(picture.id),
            _ => None,
        }
    }
}

impl fmt::Debug for PreloadUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal { scene, picture } => write!(f, "Normal({scene:?}, {})", picture.id),
            Self::NormalCompact { scene, picture } => {
                write!(f, "NormalCompact({scene:?}, {})", picture.id)
            }
            Self::BeginCallback { scene, .. } => write!(f, "BeginCallback({scene:?})"),
            Self::EndCallback { scene, .. } => write!(f, "EndCallback({scene:?})"),
        }
    }
}

/// Which queued units a cancel removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelFilter {
    /// Everything queued.
    All,
    /// Units tagged with this scene.
    Scene(SceneKey),
}

impl CancelFilter {
    fn matches(&self, unit: &PreloadUnit) -> bool {
        match self {
            Self::All => true,
            Self::Scene(key) => unit.scene() == Some(*key),
        }
    }
}

/// Lifecycle of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    /// No worker thread running.
    Idle,
    /// Worker running (waiting or working).
    Active,
    /// Stop requested, worker finishing its current unit.
    StopRequested,
}

/// Counters of the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadStats {
    /// Units ever enqueued.
    pub enqueued: u64,
    /// Units processed by the worker.
    pub processed: u64,
    /// Units removed by a cancel.
    pub canceled: u64,
    /// Picture units whose load failed.
    pub failed: u64,
}

/// What the worker fills. Implemented by the cache.
pub trait PreloadSink: Send + Sync {
    /// Materializes `picture` for `scene`, compact or not.
    fn preload_picture(&self, scene: SceneKey, picture: &PictureDesc, compact: bool) -> Result<()>;
}

#[derive(Debug)]
struct QueueState {
    units: VecDeque<PreloadUnit>,
    state: WorkerState,
    paused: bool,
    in_flight: bool,
    stats: PreloadStats,
}

#[derive(Debug)]
struct QueueShared {
    queue: Mutex<QueueState>,
    ready: Condvar,
    drained: Condvar,
}

impl QueueShared {
    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.queue
            .lock()
            .map_err(|_| CacheError::poisoned("preload queue"))
    }
}

/// FIFO of preload units with its worker thread.
#[derive(Debug)]
pub struct PreloadScheduler {
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for PreloadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PreloadScheduler {
    /// Creates an idle scheduler. No thread is spawned until work arrives.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(QueueShared {
                queue: Mutex::new(QueueState {
                    units: VecDeque::new(),
                    state: WorkerState::Idle,
                    paused: false,
                    in_flight: false,
                    stats: PreloadStats::default(),
                }),
                ready: Condvar::new(),
                drained: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Appends `units` and wakes the worker, starting it if needed.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock or when the thread cannot be spawned.
    pub fn enqueue(&self, units: Vec<PreloadUnit>, sink: Weak<dyn PreloadSink>) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        let start = {
            let mut q = self.shared.lock()?;
            q.stats.enqueued += units.len() as u64;
            q.units.extend(units);
            let start = q.state != WorkerState::Active;
            if start {
                q.state = WorkerState::Active;
            }
            start
        };
        if start && let Err(e) = self.spawn(sink) {
            // Leave the queue startable so the next enqueue retries.
            self.shared.lock()?.state = WorkerState::Idle;
            return Err(e);
        }
        self.shared.ready.notify_one();
        Ok(())
    }

    fn spawn(&self, sink: Weak<dyn PreloadSink>) -> Result<()> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| CacheError::poisoned("preload worker"))?;
        if let Some(previous) = worker.take()
            && previous.join().is_err()
        {
            log::error!("previous preload worker panicked");
        }
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("rescache-preload".into())
            .spawn(move || worker_loop(&shared, &sink))
            .map_err(|e| CacheError::Internal(format!("spawn preload worker: {e}")))?;
        log::info!("preload worker started");
        *worker = Some(handle);
        Ok(())
    }

    /// Removes every queued unit matching `filter`, keeping the others in
    /// order. Removed end markers report `Canceled`. Returns the number of
    /// units removed.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn cancel(&self, filter: CancelFilter) -> Result<usize> {
        let removed: Vec<PreloadUnit> = {
            let mut q = self.shared.lock()?;
            let (removed, kept): (VecDeque<_>, VecDeque<_>) =
                q.units.drain(..).partition(|u| filter.matches(u));
            q.units = kept;
            q.stats.canceled += removed.len() as u64;
            if q.units.is_empty() && !q.in_flight {
                self.shared.drained.notify_all();
            }
            removed.into()
        };
        if !removed.is_empty() {
            log::warn!("cancelled {} preload unit(s) ({filter:?})", removed.len());
        }
        let count = removed.len();
        for unit in removed {
            if let PreloadUnit::EndCallback { callback, .. } = unit {
                callback(PreloadStatus::Canceled);
            }
        }
        Ok(count)
    }

    /// Stops the worker from taking new units.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn pause(&self) -> Result<()> {
        self.shared.lock()?.paused = true;
        Ok(())
    }

    /// Lets the worker continue.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn resume(&self) -> Result<()> {
        self.shared.lock()?.paused = false;
        self.shared.ready.notify_all();
        Ok(())
    }

    /// Blocks until the queue is empty and no unit is in flight. Returns
    /// `false` on timeout.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn wait_idle(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut q = self.shared.lock()?;
        while !q.units.is_empty() || q.in_flight {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (guard, _) = self
                .shared
                .drained
                .wait_timeout(q, deadline - now)
                .map_err(|_| CacheError::poisoned("preload queue"))?;
            q = guard;
        }
        Ok(true)
    }

    /// Number of queued units.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn pending(&self) -> Result<usize> {
        Ok(self.shared.lock()?.units.len())
    }

    /// Scene tags and picture ids of the queued units, in order.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn snapshot(&self) -> Result<Vec<(Option<SceneKey>, Option<u32>)>> {
        Ok(self
            .shared
            .lock()?
            .units
            .iter()
            .map(|u| (u.scene(), u.picture_id()))
            .collect())
    }

    /// Counters.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn stats(&self) -> Result<PreloadStats> {
        Ok(self.shared.lock()?.stats)
    }

    /// Worker lifecycle state.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn state(&self) -> Result<WorkerState> {
        Ok(self.shared.lock()?.state)
    }

    /// Asks the worker to stop after its current unit and joins it.
    pub fn stop(&self) {
        if let Ok(mut q) = self.shared.lock()
            && q.state == WorkerState::Active
        {
            q.state = WorkerState::StopRequested;
        }
        self.shared.ready.notify_all();
        let handle = match self.worker.lock() {
            Ok(mut w) => w.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            log::error!("preload worker panicked");
        }
    }

    /// Runs `units` on the calling thread, in order. Returns the number of
    /// picture units that failed.
    pub fn run_serial(units: Vec<PreloadUnit>, sink: &dyn PreloadSink) -> usize {
        units
            .into_iter()
            .filter(|unit| execute(unit, sink).is_err())
            .count()
    }
}

/// Runs one unit. Picture failures are logged and reported back.
fn execute(unit: &PreloadUnit, sink: &dyn PreloadSink) -> Result<()> {
    let outcome = match unit {
        PreloadUnit::Normal { scene, picture } => sink.preload_picture(*scene, picture, false),
        PreloadUnit::NormalCompact { scene, picture } => {
            sink.preload_picture(*scene, picture, true)
        }
        PreloadUnit::BeginCallback { callback, .. } => {
            callback(PreloadStatus::Loading);
            Ok(())
        }
        PreloadUnit::EndCallback { callback, .. } => {
            callback(PreloadStatus::Finished);
            Ok(())
        }
    };
    if let Err(e) = &outcome {
        log::warn!("preload of {unit:?} failed: {e}");
    }
    outcome
}

/// Takes the next unit, waiting while the queue is empty or paused. `None`
/// means the worker should exit.
fn next_unit(shared: &QueueShared) -> Option<PreloadUnit> {
    let mut q = shared.lock().ok()?;
    loop {
        if q.state == WorkerState::StopRequested {
            q.state = WorkerState::Idle;
            shared.drained.notify_all();
            return None;
        }
        if !q.paused
            && let Some(unit) = q.units.pop_front()
        {
            q.in_flight = true;
            return Some(unit);
        }
        q = shared.ready.wait(q).ok()?;
    }
}

fn worker_loop(shared: &QueueShared, sink: &Weak<dyn PreloadSink>) {
    while let Some(unit) = next_unit(shared) {
        let outcome = match sink.upgrade() {
            Some(target) => execute(&unit, &*target),
            None => {
                log::info!("cache gone, preload worker exiting");
                if let Ok(mut q) = shared.lock() {
                    q.in_flight = false;
                    q.state = WorkerState::Idle;
                }
                shared.drained.notify_all();
                return;
            }
        };
        let Ok(mut q) = shared.lock() else {
            return;
        };
        q.in_flight = false;
        q.stats.processed += 1;
        if outcome.is_err() {
            q.stats.failed += 1;
        }
        if q.units.is_empty() {
            shared.drained.notify_all();
        }
    }
    log::info!("preload worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoSink;

    impl PreloadSink for NoSink {
        fn preload_picture(&self, _: SceneKey, _: &PictureDesc, _: bool) -> Result<()> {
            Ok(())
        }
    }

    fn marker() -> PreloadUnit {
        PreloadUnit::BeginCallback {
            scene: None,
            callback: Arc::new(|_: PreloadStatus| {}),
        }
    }

    #[test]
    #[allow(clippy::panic)]
    fn failed_worker_start_leaves_the_scheduler_idle() {
        let scheduler = PreloadScheduler::new();
        let poisoned = std::thread::scope(|s| {
            s.spawn(|| {
                let _held = scheduler.worker.lock();
                panic!("worker slot poisoned");
            })
            .join()
        });
        assert!(poisoned.is_err());

        let sink: Weak<dyn PreloadSink> = Weak::<NoSink>::new();
        assert!(matches!(
            scheduler.enqueue(vec![marker()], sink.clone()),
            Err(CacheError::Internal(_))
        ));
        assert_eq!(scheduler.state().ok(), Some(WorkerState::Idle));
        assert_eq!(scheduler.pending().ok(), Some(1));

        // A later enqueue tries to start the worker again.
        assert!(scheduler.enqueue(vec![marker()], sink).is_err());
        assert_eq!(scheduler.state().ok(), Some(WorkerState::Idle));
    }
}
