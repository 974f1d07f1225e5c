//! Background loading of full sample files.
//!
//! The render thread never touches the file system. When a voice starts on a
//! file that is only partially preloaded it posts a [`LoadRequest`] to the
//! [`BackgroundLoader`] and keeps playing the preloaded prefix. The loader
//! thread reads the whole file and publishes it into the voice's
//! [`LoadSlot`]:
//!
//! ```text
//! render thread                    loader thread
//! -------------                    -------------
//! slot.expect(ticket)
//! enqueue(request) --------------> read file
//!                                  slot.publish(ticket, data)
//!                                    cell <- data
//!                                    ready <- true (Release)
//! slot.take(ticket)
//!   ready (Acquire)?
//!   cell.ticket == ticket?
//! ```
//!
//! Every request carries a ticket. A slot only accepts data for the ticket
//! it currently expects, so results that arrive after the voice moved on to
//! another note are discarded.
//!
//! Buffers are wrapped in [`basedrop::Shared`]: when a voice drops one on
//! the render thread the memory is reclaimed later by the collector running
//! on the loader thread.

use crate::oversample::{Oversampling, upsample};
use crate::wav::read_frames;
use crate::{Error, Result};
use basedrop::{Collector, Handle, Shared, SharedCell};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use muestra_core::AudioBuffer;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Loader wake-up interval when the queue is idle.
const IDLE_TIMEOUT: Duration = Duration::from_millis(200);

/// Full sample data tagged with the ticket it was loaded for.
#[derive(Debug, Default)]
pub struct LoadedSample {
    /// Ticket of the request that produced this data.
    pub ticket: u64,
    /// Planar frames, oversampled if requested.
    pub data: AudioBuffer,
}

/// Single-producer handoff cell between the loader and one voice.
pub struct LoadSlot {
    expected: AtomicU64,
    ready: AtomicBool,
    cell: SharedCell<LoadedSample>,
    empty: Shared<LoadedSample>,
}

impl LoadSlot {
    /// Create an empty slot whose buffers are reclaimed through `handle`.
    pub fn new(handle: &Handle) -> Self {
        let empty = Shared::new(handle, LoadedSample::default());
        Self {
            expected: AtomicU64::new(0),
            ready: AtomicBool::new(false),
            cell: SharedCell::new(empty.clone()),
            empty,
        }
    }

    /// Arm the slot for `ticket`. Real-time safe.
    pub fn expect(&self, ticket: u64) {
        self.ready.store(false, Ordering::Release);
        self.expected.store(ticket, Ordering::Release);
    }

    /// Ticket the slot currently accepts.
    pub fn expected(&self) -> u64 {
        self.expected.load(Ordering::Acquire)
    }

    /// Whether the loader has published data since the last [`expect`](Self::expect).
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Publish loaded data. Returns `false` if the slot expects another ticket.
    pub fn publish(&self, sample: Shared<LoadedSample>) -> bool {
        let ticket = sample.ticket;
        if self.expected() != ticket {
            return false;
        }
        self.cell.set(sample);
        self.ready.store(true, Ordering::Release);
        true
    }

    /// Take the published data if it belongs to `ticket`. Real-time safe.
    pub fn take(&self, ticket: u64) -> Option<Shared<LoadedSample>> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        let sample = self.cell.get();
        (sample.ticket == ticket).then_some(sample)
    }

    /// Drop any published data and stop accepting tickets. Real-time safe;
    /// the buffer is reclaimed on the collector thread.
    pub fn clear(&self) {
        self.expected.store(0, Ordering::Release);
        self.ready.store(false, Ordering::Release);
        self.cell.set(self.empty.clone());
    }
}

impl std::fmt::Debug for LoadSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadSlot")
            .field("expected", &self.expected())
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

/// Request for the loader thread to read a whole file.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Slot that receives the data.
    pub slot: Arc<LoadSlot>,
    /// Resolved path of the file.
    pub path: Arc<Path>,
    /// Oversampling to apply after reading.
    pub oversampling: Oversampling,
    /// Ticket the slot was armed with.
    pub ticket: u64,
}

/// Worker thread that reads full files and runs the deferred-drop collector.
pub struct BackgroundLoader {
    sender: Option<Sender<LoadRequest>>,
    handle: Handle,
    thread: Option<JoinHandle<()>>,
    quit: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    dropped: AtomicU64,
}

impl BackgroundLoader {
    /// Start the loader thread with a queue of `capacity` requests.
    pub fn spawn(capacity: usize) -> Result<Self> {
        let (sender, receiver) = bounded::<LoadRequest>(capacity.max(1));
        let (handle_tx, handle_rx) = bounded::<Handle>(1);
        let quit = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));

        let thread = {
            let quit = Arc::clone(&quit);
            let pending = Arc::clone(&pending);
            thread::Builder::new()
                .name("muestra-loader".to_string())
                .spawn(move || {
                    // The collector is not Sync, so it lives on this thread
                    let mut collector = Collector::new();
                    if handle_tx.send(collector.handle()).is_err() {
                        return;
                    }
                    run_loader(&mut collector, &receiver, &quit, &pending);
                })
                .map_err(Error::LoaderSpawn)?
        };

        let handle = handle_rx.recv().map_err(|_| {
            Error::LoaderSpawn(std::io::Error::other("loader thread exited during startup"))
        })?;

        tracing::info!(capacity, "background loader started");

        Ok(Self {
            sender: Some(sender),
            handle,
            thread: Some(thread),
            quit,
            pending,
            dropped: AtomicU64::new(0),
        })
    }

    /// Handle used to allocate buffers reclaimed by this loader's collector.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Post a request without blocking. Real-time safe.
    ///
    /// Returns `false` and counts the request as dropped when the queue is
    /// full.
    pub fn enqueue(&self, request: LoadRequest) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        self.pending.fetch_add(1, Ordering::AcqRel);
        match sender.try_send(request) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Number of requests dropped because the queue was full.
    pub fn dropped_requests(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Requests posted but not yet processed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Block until every posted request has been processed. Not real-time safe.
    pub fn wait_for_background_loading(&self) {
        while self.pending() > 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for BackgroundLoader {
    fn drop(&mut self) {
        self.quit.store(true, Ordering::Release);
        // Disconnecting the queue wakes the thread
        self.sender.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("background loader panicked");
            }
        }
        tracing::info!("background loader stopped");
    }
}

impl std::fmt::Debug for BackgroundLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundLoader")
            .field("pending", &self.pending())
            .field("dropped", &self.dropped_requests())
            .finish_non_exhaustive()
    }
}

fn run_loader(
    collector: &mut Collector,
    receiver: &Receiver<LoadRequest>,
    quit: &AtomicBool,
    pending: &AtomicUsize,
) {
    let handle = collector.handle();
    loop {
        match receiver.recv_timeout(IDLE_TIMEOUT) {
            Ok(request) => {
                if !quit.load(Ordering::Acquire) {
                    process_request(&handle, request);
                }
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        collector.collect();
    }
    drop(handle);
    collector.collect();
}

fn process_request(handle: &Handle, request: LoadRequest) {
    let LoadRequest {
        slot,
        path,
        oversampling,
        ticket,
    } = request;

    if slot.expected() != ticket {
        tracing::debug!(ticket, path = %path.display(), "skipping stale load request");
        return;
    }

    let data = match read_frames(&path, None) {
        Ok(data) => upsample(&data, oversampling),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "background load failed");
            return;
        }
    };

    let frames = data.num_frames();
    let sample = Shared::new(handle, LoadedSample { ticket, data });
    if slot.publish(sample) {
        tracing::debug!(ticket, frames, path = %path.display(), "published full sample");
    } else {
        tracing::debug!(ticket, path = %path.display(), "discarded stale load result");
    }
}
