//! Playlist-facing handle around a player worker
//!
//! A `VideoSource` is one item on a video wall playlist: it owns a worker,
//! starts it (optionally after a delay), and turns the worker's events into a
//! plain frame channel plus a few status flags.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::WorkerClose;
use super::messages::WorkerEvent;
use super::player::{PlayerWorker, WorkerHandle};
use crate::config::PipelineConfig;
use crate::decoder::{DecodedFrame, EngineFactory};
use crate::fetch::SourceFactory;
use crate::pipeline::player::FadeOptions;

static LAST_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct VideoSourceOptions {
    /// Wait this long before starting the worker
    pub delay: Option<Duration>,
    /// Start with the gate open
    pub autoplay: bool,
    pub fade: Option<FadeOptions>,
    /// Position in the owning playlist
    pub index: Option<usize>,
}

#[derive(Debug, Default)]
struct SourceStatus {
    closed: AtomicBool,
    paused: AtomicBool,
    has_started: AtomicBool,
    start_sent: AtomicBool,
    reader_attached: AtomicBool,
    duration_micros: AtomicI64,
}

pub struct VideoSource {
    id: u64,
    uri: String,
    options: VideoSourceOptions,
    handle: WorkerHandle,
    status: Arc<SourceStatus>,
    closing: CancellationToken,
    delay_task: Option<JoinHandle<()>>,
    frames: Option<mpsc::Receiver<DecodedFrame>>,
}

impl VideoSource {
    /// Spawn a worker for `uri` on the current runtime.
    pub fn new(
        uri: impl Into<String>,
        options: VideoSourceOptions,
        config: PipelineConfig,
        sources: SourceFactory,
        engines: EngineFactory,
    ) -> Self {
        let id = LAST_ID.fetch_add(1, Ordering::Relaxed) + 1;
        let uri = uri.into();
        let (handle, events, _worker) = PlayerWorker::spawn(config, sources, engines);

        let status = Arc::new(SourceStatus::default());
        status.paused.store(!options.autoplay, Ordering::Relaxed);
        status.has_started.store(options.autoplay, Ordering::Relaxed);

        let closing = CancellationToken::new();
        let (frame_tx, frames) = mpsc::channel(1);
        tokio::spawn(forward_events(
            id,
            events,
            frame_tx,
            status.clone(),
            closing.clone(),
        ));

        let mut source = Self {
            id,
            uri,
            options,
            handle,
            status,
            closing,
            delay_task: None,
            frames: Some(frames),
        };
        source.schedule_start();
        source
    }

    fn schedule_start(&mut self) {
        let closed = !self.options.autoplay;
        match self.options.delay.filter(|d| !d.is_zero()) {
            Some(delay) => {
                let handle = self.handle.clone();
                let status = self.status.clone();
                let uri = self.uri.clone();
                let fade = self.options.fade.unwrap_or_default();
                self.delay_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if !status.start_sent.swap(true, Ordering::SeqCst) {
                        handle.start(uri, closed, fade);
                    }
                }));
            }
            None => {
                self.send_start(closed);
            }
        }
    }

    /// Send the start command unless it already went out.
    fn send_start(&self, closed: bool) -> bool {
        if self.status.start_sent.swap(true, Ordering::SeqCst) {
            return false;
        }
        let fade = self.options.fade.unwrap_or_default();
        self.handle.start(self.uri.clone(), closed, fade);
        true
    }

    /// Open the gate. A start still waiting on its delay fires right away.
    pub fn play(&self) {
        self.status.has_started.store(true, Ordering::Relaxed);
        self.status.paused.store(false, Ordering::Relaxed);
        if self.send_start(false) {
            if let Some(task) = &self.delay_task {
                task.abort();
            }
        } else {
            self.handle.play();
        }
    }

    pub fn pause(&self) {
        self.handle.pause();
        self.status.paused.store(true, Ordering::Relaxed);
    }

    pub fn disable_fade_out(&self, disabled: bool) {
        self.handle.disable_fade_out(disabled);
    }

    pub fn close(&self) {
        if self.status.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("VideoSource {}: close", self.id);
        if let Some(task) = &self.delay_task {
            task.abort();
        }
        self.closing.cancel();
        self.handle.close();
    }

    /// The frame stream. Frames arriving before this is taken are released.
    pub fn take_frames(&mut self) -> Option<mpsc::Receiver<DecodedFrame>> {
        let frames = self.frames.take();
        if frames.is_some() {
            self.status.reader_attached.store(true, Ordering::SeqCst);
        }
        frames
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn index(&self) -> Option<usize> {
        self.options.index
    }

    pub fn closed(&self) -> bool {
        self.status.closed.load(Ordering::SeqCst)
    }

    pub fn paused(&self) -> bool {
        self.status.paused.load(Ordering::Relaxed)
    }

    pub fn has_started(&self) -> bool {
        self.status.has_started.load(Ordering::Relaxed)
    }

    /// Declared duration; zero until the stream reports one.
    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.status.duration_micros.load(Ordering::Relaxed).max(0) as u64)
    }
}

impl WorkerClose for VideoSource {
    fn close(&mut self) {
        VideoSource::close(self);
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        VideoSource::close(self);
    }
}

async fn forward_events(
    id: u64,
    mut events: mpsc::Receiver<WorkerEvent>,
    frame_tx: mpsc::Sender<DecodedFrame>,
    status: Arc<SourceStatus>,
    closing: CancellationToken,
) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Frame(frame) => {
                let attached = status.reader_attached.load(Ordering::SeqCst);
                if !attached || status.closed.load(Ordering::SeqCst) {
                    frame.release();
                    continue;
                }
                // an undelivered frame is dropped, and so released, either way
                tokio::select! {
                    biased;
                    _ = closing.cancelled() => {}
                    sent = frame_tx.send(frame) => {
                        if sent.is_err() {
                            debug!("VideoSource {}: reader gone", id);
                        }
                    }
                }
            }
            WorkerEvent::Duration(duration) => {
                status.duration_micros.store(duration.micros, Ordering::Relaxed);
            }
            WorkerEvent::Done => {
                status.closed.store(true, Ordering::SeqCst);
            }
            WorkerEvent::Error(e) => {
                warn!("VideoSource {}: {}", id, e);
                status.closed.store(true, Ordering::SeqCst);
            }
        }
    }
}
