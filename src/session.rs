// THEORY:
// A `TrackingSession` runs a `TrackingPipeline` as an actor on the tokio runtime, the
// way a capture loop feeds a tracker in a live application. Three channels connect it
// to the outside world:
//
// 1.  **Frame Slot** (`watch`): a depth-1 mailbox. A producer overwrites whatever frame
//     is still waiting, so a slow tracker always works on the newest frame and capture
//     never blocks. Every offer carries a sequence number; gaps are counted as dropped.
// 2.  **Control** (`mpsc` + `oneshot` replies): clear identities, swap configuration,
//     read statistics, shut down. Commands are only handled between cycles, so none of
//     them can observe a half-updated track table.
// 3.  **Snapshots** (`broadcast`): each finished cycle is published as an
//     `Arc<CycleOutput>`. Readers get an immutable copy and never touch tracker state.

use std::sync::Arc;

use image::DynamicImage;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::{Result, TrackingError};
use crate::pipeline::{CycleOutput, TrackerStats, TrackingPipeline};

const CONTROL_CAPACITY: usize = 16;
const SNAPSHOT_CAPACITY: usize = 16;

#[derive(Clone)]
enum CycleInput {
    Frame(Arc<DynamicImage>),
    Missing,
}

#[derive(Clone, Default)]
struct FrameSlot {
    seq: u64,
    input: Option<CycleInput>,
}

enum Command {
    ClearIds(oneshot::Sender<()>),
    UpdateConfig(PipelineConfig, oneshot::Sender<Result<()>>),
    Stats(oneshot::Sender<TrackerStats>),
    Shutdown,
}

/// Handle for a capture task to offer frames. Cheap to clone and usable from any thread.
#[derive(Clone)]
pub struct FrameProducer {
    slot: Arc<watch::Sender<FrameSlot>>,
}

impl FrameProducer {
    /// Offers a frame, replacing any frame the session has not picked up yet.
    pub fn push(&self, frame: DynamicImage) -> Result<()> {
        self.offer(CycleInput::Frame(Arc::new(frame)))
    }

    /// Reports that capture produced nothing this cycle. Tracks age by one step.
    pub fn report_missing(&self) -> Result<()> {
        self.offer(CycleInput::Missing)
    }

    fn offer(&self, input: CycleInput) -> Result<()> {
        if self.slot.is_closed() {
            return Err(TrackingError::SessionClosed);
        }
        self.slot.send_modify(|slot| {
            slot.seq += 1;
            slot.input = Some(input);
        });
        Ok(())
    }
}

pub struct TrackingSession {
    control: mpsc::Sender<Command>,
    producer: FrameProducer,
    snapshots: broadcast::Sender<Arc<CycleOutput>>,
    task: JoinHandle<TrackingPipeline>,
}

impl TrackingSession {
    /// Validates `config` and starts the session task. Must be called from within a
    /// tokio runtime.
    pub fn spawn(config: PipelineConfig) -> Result<Self> {
        let pipeline = TrackingPipeline::new(config)?;

        let (control, commands) = mpsc::channel(CONTROL_CAPACITY);
        let (slot_tx, frames) = watch::channel(FrameSlot::default());
        let (snapshots, _) = broadcast::channel(SNAPSHOT_CAPACITY);

        let task = tokio::spawn(run(pipeline, commands, frames, snapshots.clone()));
        info!("tracking session started");

        Ok(Self {
            control,
            producer: FrameProducer {
                slot: Arc::new(slot_tx),
            },
            snapshots,
            task,
        })
    }

    pub fn producer(&self) -> FrameProducer {
        self.producer.clone()
    }

    /// Receives every cycle finished after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CycleOutput>> {
        self.snapshots.subscribe()
    }

    pub async fn clear_ids(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::ClearIds(reply)).await?;
        response.await.map_err(|_| TrackingError::SessionClosed)
    }

    /// Swaps the configuration before the next cycle. Rejected configurations return
    /// the validation error and leave the session unchanged.
    pub async fn update_config(&self, config: PipelineConfig) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::UpdateConfig(config, reply)).await?;
        response.await.map_err(|_| TrackingError::SessionClosed)?
    }

    pub async fn stats(&self) -> Result<TrackerStats> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Stats(reply)).await?;
        response.await.map_err(|_| TrackingError::SessionClosed)
    }

    /// Stops the session after the cycle in progress and hands back the pipeline.
    pub async fn shutdown(self) -> Result<TrackingPipeline> {
        let _ = self.control.send(Command::Shutdown).await;
        self.task.await.map_err(|_| TrackingError::SessionClosed)
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.control
            .send(command)
            .await
            .map_err(|_| TrackingError::SessionClosed)
    }
}

async fn run(
    mut pipeline: TrackingPipeline,
    mut commands: mpsc::Receiver<Command>,
    mut frames: watch::Receiver<FrameSlot>,
    snapshots: broadcast::Sender<Arc<CycleOutput>>,
) -> TrackingPipeline {
    let mut last_seq = 0u64;
    let mut dropped = 0u64;
    let mut frames_open = true;

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Command::ClearIds(reply)) => {
                    pipeline.clear_ids();
                    let _ = reply.send(());
                }
                Some(Command::UpdateConfig(config, reply)) => {
                    let _ = reply.send(pipeline.update_config(config));
                }
                Some(Command::Stats(reply)) => {
                    let mut stats = pipeline.stats();
                    stats.dropped_frames = dropped;
                    let _ = reply.send(stats);
                }
                Some(Command::Shutdown) | None => break,
            },

            changed = frames.changed(), if frames_open => {
                if changed.is_err() {
                    frames_open = false;
                    continue;
                }
                let slot = frames.borrow_and_update().clone();
                let Some(input) = slot.input else {
                    continue;
                };
                if slot.seq > last_seq + 1 {
                    let skipped = slot.seq - last_seq - 1;
                    dropped += skipped;
                    debug!(skipped, "stale frames replaced before processing");
                }
                last_seq = slot.seq;

                let output = match input {
                    CycleInput::Frame(frame) => pipeline.process_frame(&frame),
                    CycleInput::Missing => pipeline.skip_frame(),
                };
                // No subscribers is not an error.
                let _ = snapshots.send(Arc::new(output));
            }
        }
    }

    info!(dropped, "tracking session stopped");
    pipeline
}
