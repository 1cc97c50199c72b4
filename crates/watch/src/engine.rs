//! Per-path watch engine: debounced filesystem events feeding a bounded
//! worker pool.
//!
//! One engine owns one watched directory. The notify callback runs on its
//! own thread and bridges into the async world with `blocking_send`; the
//! engine task consumes those events, debounces them per path
//! (last-event-wins), and on each tick dispatches settled paths as jobs to
//! a bounded channel shared by `buffer_size` workers. Workers classify at
//! pickup — the MIME index is the source of truth, never a cached value.
//!
//! Shutdown is cooperative: cancellation makes the engine enqueue one
//! sentinel job per worker, join them all, and drop the notify
//! subscription. In-flight jobs always finish.

use curator_core::{Config, Processor, WatchedPath};
use curator_mime::{MimeIndex, PARTIAL_DOWNLOAD};
use curator_pipeline::{PipelineContext, handle};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Dispatch tick. Short enough to keep latency near the configured delay,
/// long enough to keep an idle engine off the CPU.
const TICK: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("Failed to initialize watcher: {0}")]
  Init(#[source] notify::Error),

  #[error("Failed to watch path: {0}")]
  Watch(#[source] notify::Error),
}

/// The effective settings for one watched path. Engines are restarted by
/// the supervisor whenever these change.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
  pub path: PathBuf,
  pub processors: Vec<Processor>,
  pub delay: Duration,
  pub buffer_size: usize,
  pub cleanup_zero_byte: bool,
}

impl EngineConfig {
  pub fn for_path(watched: &WatchedPath, config: &Config) -> Self {
    Self {
      path: watched.path.clone(),
      processors: watched.processors.clone(),
      delay: Duration::from_secs(config.delay_in_seconds),
      buffer_size: config.buffer_size,
      cleanup_zero_byte: config.cleanup_zero_byte,
    }
  }
}

/// A unit of work for the pool. `ready == false` is the shutdown sentinel.
#[derive(Debug)]
pub struct Job {
  pub source: PathBuf,
  pub processors: Arc<Vec<Processor>>,
  pub cleanup_zero_byte: bool,
  pub ready: bool,
}

impl Job {
  fn shutdown() -> Self {
    Self {
      source: PathBuf::new(),
      processors: Arc::new(Vec::new()),
      cleanup_zero_byte: false,
      ready: false,
    }
  }
}

/// A buffered event awaiting its quiet window.
#[derive(Debug)]
struct PendingEvent {
  kind: EventKind,
  last_event: Instant,
}

pub struct WatchEngine {
  config: EngineConfig,
  index_rx: watch::Receiver<Arc<MimeIndex>>,
  cancel: CancellationToken,
  notifications: mpsc::Sender<String>,
  // Held to keep the notify subscription alive; dropped on shutdown.
  _watcher: RecommendedWatcher,
  event_rx: mpsc::Receiver<Result<Event, notify::Error>>,
}

impl WatchEngine {
  pub fn new(
    config: EngineConfig,
    index_rx: watch::Receiver<Arc<MimeIndex>>,
    cancel: CancellationToken,
    notifications: mpsc::Sender<String>,
  ) -> Result<Self, EngineError> {
    let (event_tx, event_rx) = mpsc::channel::<Result<Event, notify::Error>>(256);

    let mut watcher = RecommendedWatcher::new(
      move |res| {
        // notify's thread; a full or closed channel drops the event.
        let _ = event_tx.blocking_send(res);
      },
      notify::Config::default(),
    )
    .map_err(EngineError::Init)?;

    watcher
      .watch(&config.path, RecursiveMode::Recursive)
      .map_err(EngineError::Watch)?;

    info!(path = %config.path.display(), workers = config.buffer_size, "Listening to path");

    Ok(Self {
      config,
      index_rx,
      cancel,
      notifications,
      _watcher: watcher,
      event_rx,
    })
  }

  /// Spawn the engine onto the runtime.
  pub fn spawn(
    config: EngineConfig,
    index_rx: watch::Receiver<Arc<MimeIndex>>,
    cancel: CancellationToken,
    notifications: mpsc::Sender<String>,
  ) -> Result<tokio::task::JoinHandle<()>, EngineError> {
    let engine = Self::new(config, index_rx, cancel, notifications)?;
    Ok(tokio::spawn(engine.run()))
  }

  /// Run until cancelled. Owns the debounce buffer for its whole life; no
  /// other task touches it.
  pub async fn run(mut self) {
    let (job_tx, job_rx) = mpsc::channel::<Job>(self.config.buffer_size);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let in_flight = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::with_capacity(self.config.buffer_size);
    for id in 0..self.config.buffer_size {
      debug!(path = %self.config.path.display(), worker = id, "Starting worker");
      workers.push(tokio::spawn(worker_loop(
        id,
        Arc::clone(&job_rx),
        self.index_rx.clone(),
        Arc::clone(&in_flight),
      )));
    }

    let mut pending: HashMap<PathBuf, PendingEvent> = HashMap::new();
    let mut tick = tokio::time::interval(TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Open while at least one job of the current burst may still be in
    // flight; closing it emits the completion notification exactly once.
    let mut cycle_open = false;

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          info!(path = %self.config.path.display(), "Shutting down listener");
          break;
        }

        event = self.event_rx.recv() => {
          match event {
            Some(Ok(event)) => ingest(&mut pending, event),
            Some(Err(err)) => warn!(path = %self.config.path.display(), error = %err, "Watch error"),
            None => {
              info!(path = %self.config.path.display(), "Event stream closed");
              break;
            }
          }
        }

        _ = tick.tick() => {
          cycle_open = self.dispatch(&mut pending, &job_tx, &in_flight, cycle_open).await;
        }
      }
    }

    for _ in 0..self.config.buffer_size {
      let _ = job_tx.send(Job::shutdown()).await;
    }
    for worker in workers {
      let _ = worker.await;
    }
    debug!(path = %self.config.path.display(), "All workers stopped");
  }

  /// Move settled paths from the debounce buffer onto the job channel,
  /// bounded by the channel's free capacity. Returns the new cycle state.
  async fn dispatch(
    &self,
    pending: &mut HashMap<PathBuf, PendingEvent>,
    job_tx: &mpsc::Sender<Job>,
    in_flight: &AtomicUsize,
    cycle_open: bool,
  ) -> bool {
    let available = job_tx.capacity();

    if pending.is_empty() || available == 0 {
      let drained = pending.is_empty() && in_flight.load(Ordering::SeqCst) == 0;
      if cycle_open && drained {
        info!(path = %self.config.path.display(), "Processing complete");
        let _ = self
          .notifications
          .try_send(format!("Processing for path {} completed.", self.config.path.display()));
        return false;
      }
      return cycle_open;
    }

    let now = Instant::now();
    let settled: Vec<PathBuf> = pending
      .iter()
      .filter(|(_, event)| now.duration_since(event.last_event) >= self.config.delay)
      .map(|(path, _)| path.clone())
      .take(available)
      .collect();

    let mut cycle_open = cycle_open;
    let processors = Arc::new(self.config.processors.clone());
    for path in settled {
      let Some(event) = pending.remove(&path) else { continue };
      info!(path = %path.display(), kind = ?event.kind, "Creating job");
      let job = Job {
        source: path,
        processors: Arc::clone(&processors),
        cleanup_zero_byte: self.config.cleanup_zero_byte,
        ready: true,
      };
      // Counted from dispatch until the worker finishes, so a drained
      // buffer plus a zero count means the cycle is truly complete.
      in_flight.fetch_add(1, Ordering::SeqCst);
      if job_tx.send(job).await.is_err() {
        in_flight.fetch_sub(1, Ordering::SeqCst);
        break;
      }
      cycle_open = true;
    }
    cycle_open
  }
}

/// Fold one notify event into the debounce buffer. Removes drop the entry;
/// everything else stats the path and records the latest event.
fn ingest(pending: &mut HashMap<PathBuf, PendingEvent>, event: Event) {
  match event.kind {
    EventKind::Remove(_) => {
      for path in &event.paths {
        if pending.remove(path).is_some() {
          trace!(path = %path.display(), "Removed pending event");
        }
      }
    }
    EventKind::Access(_) => {}
    kind => {
      for path in event.paths {
        // Vanished paths and directories never become jobs.
        if !path.is_file() {
          continue;
        }
        trace!(path = %path.display(), ?kind, "Buffering event");
        pending.insert(
          path,
          PendingEvent {
            kind,
            last_event: Instant::now(),
          },
        );
      }
    }
  }
}

async fn worker_loop(
  id: usize,
  jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
  index_rx: watch::Receiver<Arc<MimeIndex>>,
  in_flight: Arc<AtomicUsize>,
) {
  loop {
    let job = {
      let mut rx = jobs.lock().await;
      rx.recv().await
    };
    let Some(job) = job else { break };
    if !job.ready {
      debug!(worker = id, "Shutting down worker");
      break;
    }

    process_job(&job, &index_rx).await;
    in_flight.fetch_sub(1, Ordering::SeqCst);
  }
}

/// Classify at pickup and run the pipeline. Partial downloads and
/// unclassifiable paths are dropped here.
async fn process_job(job: &Job, index_rx: &watch::Receiver<Arc<MimeIndex>>) {
  let index = index_rx.borrow().clone();

  if job.cleanup_zero_byte
    && let Ok(metadata) = std::fs::metadata(&job.source)
    && metadata.len() == 0
  {
    info!(path = %job.source.display(), "Deleting path. File is empty");
    if let Err(err) = std::fs::remove_file(&job.source) {
      warn!(path = %job.source.display(), error = %err, "Unable to delete empty file");
    }
    return;
  }

  let Some(details) = index.find_best_match(&job.source.to_string_lossy()) else {
    debug!(path = %job.source.display(), "No classification; dropping");
    return;
  };
  if details.mime_type == PARTIAL_DOWNLOAD {
    trace!(path = %job.source.display(), "Ignoring partial download");
    return;
  }

  info!(path = %job.source.display(), mime_type = %details.mime_type, "Processing path");
  let ctx = PipelineContext {
    index: &index,
    dry_run: None,
  };
  if let Err(err) = handle(&job.source, &details, &job.processors, &ctx).await {
    error!(path = %job.source.display(), error = %err, "Unable to process path");
  }
}
