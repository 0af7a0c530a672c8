// THEORY:
// The `pipeline` module is the top-level API for the engine and the owner of
// its concurrency discipline. Two execution contexts exist: the caller's
// render/display loop, which calls `tick` once per drawn frame and must never
// block, and a single processing worker, which runs the expensive
// mapper -> extractor -> scorer -> component chain off the render path.
//
// Key architectural principles:
// 1.  **Throttle, Then Gate**: Only every Nth tick is even eligible for
//     processing, and an eligible tick dispatches only if no computation is
//     already in flight. A busy pipeline drops the frame outright; nothing is
//     queued and nothing is interrupted. This bounds staleness under sustained
//     overload at the cost of completeness, a deliberate backpressure policy.
// 2.  **RAII In-Flight Flag**: The exclusivity flag is acquired by
//     compare-and-swap and released by an `InFlightGuard`'s `Drop`, so every
//     exit path (success, per-frame failure, panic in the worker) clears it.
//     A failed frame can never wedge the pipeline.
// 3.  **Snapshot Publication**: Results are published as an atomically
//     replaced `Arc<SegmentationResult>`. Readers on the render path see the
//     previous complete snapshot or the new complete snapshot, never a torn
//     one. The prototype is shared the same way: replaced whole on
//     registration, never mutated in place.
// 4.  **Buffer Reuse**: Frame bytes travel in pooled buffers and the model
//     tensor lives in a scratch `Vec` owned by the worker, so the steady state
//     allocates nothing per tick.

use crate::core_modules::component;
use crate::core_modules::extractor::TensorShape;
use crate::core_modules::patch_grid::{
    self, CHANNEL_MEAN, CHANNEL_STD, MODEL_INPUT_EDGE, PATCH_EDGE, PatchGrid,
};
use crate::core_modules::prototype;
use crate::core_modules::scorer;
use crate::error::SegmentationError;
use image::imageops;
use image::{DynamicImage, RgbImage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

// Re-export key data structures for the public API.
pub use crate::core_modules::component::SegmentationResult;
pub use crate::core_modules::extractor::{ExtractorError, FeatureExtractor};
pub use crate::core_modules::prototype::Prototype;

/// Process every Nth rendered frame; the ticks in between are display-only.
pub const PROCESS_EVERY_NTH_FRAME: u64 = 4;
/// The internal score threshold above which a patch joins a component. This is
/// independent of any user-facing display threshold the overlay consumer
/// applies to the published score grid.
pub const COMPONENT_ACTIVE_THRESHOLD: f32 = 0.7;

const FRAME_POOL_SIZE: usize = 2;

/// Configuration for the engine. The defaults carry the fixed constants; they
/// are recognized as options but not expected to vary per session.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The edge length of one square patch in model-input pixels.
    pub patch_edge: u32,
    /// The model input resolution along the height edge.
    pub input_edge: u32,
    /// Dispatch cadence: only every Nth tick is eligible for processing.
    pub process_every_nth_frame: u64,
    /// The internal component-extraction threshold.
    pub component_threshold: f32,
    /// Per-channel normalization mean.
    pub channel_mean: [f32; 3],
    /// Per-channel normalization standard deviation.
    pub channel_std: [f32; 3],
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            patch_edge: PATCH_EDGE,
            input_edge: MODEL_INPUT_EDGE,
            process_every_nth_frame: PROCESS_EVERY_NTH_FRAME,
            component_threshold: COMPONENT_ACTIVE_THRESHOLD,
            channel_mean: CHANNEL_MEAN,
            channel_std: CHANNEL_STD,
        }
    }
}

/// The frame source's tracking-quality signal, a pre-condition for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingQuality {
    Usable,
    NotUsable,
}

/// Why a tick did not dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Segmentation is toggled off.
    Disabled,
    /// The frame source reported unusable tracking.
    NotTracking,
    /// No prototype has been registered yet.
    NoPrototype,
    /// The tick is not on the Nth-frame cadence.
    NotDue,
    /// A computation is already in flight; the frame is dropped, not queued.
    Busy,
    /// The processing worker has shut down; no further frame will dispatch
    /// until a new pipeline is created. Unlike `Busy`, this is not transient.
    WorkerGone,
}

/// The outcome of one render tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Dispatched,
    Skipped(SkipReason),
}

/// Clears the in-flight flag when dropped. Handed to the processing worker
/// alongside the frame so that every exit path, including a panic while
/// segmenting, releases the pipeline for the next eligible tick.
pub struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// The monotonic tick counter plus the exclusive in-flight flag.
pub struct FrameThrottle {
    counter: u64,
    interval: u64,
    in_flight: Arc<AtomicBool>,
}

impl FrameThrottle {
    pub fn new(interval: u64) -> Self {
        Self {
            counter: 0,
            interval: interval.max(1),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Advances the tick counter. Returns true when this tick is on the
    /// Nth-frame cadence. The counter advances on every tick, dispatched or
    /// not, matching the render loop's own frame count.
    pub fn observe_frame(&mut self) -> bool {
        self.counter += 1;
        self.counter % self.interval == 0
    }

    /// Attempts to claim the in-flight flag. Exactly one caller can hold a
    /// guard at a time; a `None` means a computation is already running and
    /// the frame must be dropped.
    pub fn try_acquire(&self) -> Option<InFlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then(|| InFlightGuard {
                flag: Arc::clone(&self.in_flight),
            })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Center-crops a frame to the display consumer's aspect ratio so the score
/// grid lines up with what is on screen.
pub fn crop_to_aspect(frame: &RgbImage, view_aspect: f32) -> RgbImage {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 || !view_aspect.is_finite() || view_aspect <= 0.0 {
        return frame.clone();
    }

    let image_aspect = width as f32 / height as f32;
    if image_aspect > view_aspect {
        // Frame is wider than the view: trim the sides.
        let new_width = ((height as f32 * view_aspect) as u32).clamp(1, width);
        let x = (width - new_width) / 2;
        imageops::crop_imm(frame, x, 0, new_width, height).to_image()
    } else {
        // Frame is taller than the view, the common portrait case: trim
        // top and bottom.
        let new_height = ((width as f32 / view_aspect) as u32).clamp(1, height);
        let y = (height - new_height) / 2;
        imageops::crop_imm(frame, 0, y, width, new_height).to_image()
    }
}

/// The stateless composition of the per-frame computation:
/// patch grid mapper -> feature extractor -> scorer -> component extractor.
pub struct SegmentationEngine<E> {
    extractor: E,
    config: PipelineConfig,
}

impl<E: FeatureExtractor> SegmentationEngine<E> {
    pub fn new(config: PipelineConfig, extractor: E) -> Self {
        Self { extractor, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one full segmentation pass over `frame`. `tensor_scratch` is the
    /// worker-owned reusable model-input buffer.
    pub fn segment(
        &self,
        frame: &RgbImage,
        prototype: &Prototype,
        tensor_scratch: &mut Vec<f32>,
    ) -> Result<SegmentationResult, SegmentationError> {
        let grid = PatchGrid::from_dimensions(
            frame.width(),
            frame.height(),
            self.config.input_edge,
            self.config.patch_edge,
        )?;

        patch_grid::to_model_tensor(
            frame,
            &grid,
            self.config.channel_mean,
            self.config.channel_std,
            tensor_scratch,
        );

        let shape = TensorShape {
            height: grid.pixel_height(),
            width: grid.pixel_width(),
        };
        let features = self.extractor.extract(tensor_scratch, &shape)?;

        if features.len() != grid.num_patches() * prototype.dim() {
            return Err(ExtractorError::new(format!(
                "extractor returned {} values for {} patches of dim {}",
                features.len(),
                grid.num_patches(),
                prototype.dim()
            ))
            .into());
        }

        let scores = scorer::score_patches(&features, prototype.features());
        Ok(component::extract_largest_component(
            &scores,
            &grid,
            self.config.component_threshold,
        ))
    }

    /// Registration-time entry: builds a prototype through the same mapper the
    /// live path uses.
    pub fn build_prototype(
        &self,
        reference: &DynamicImage,
    ) -> Result<Prototype, SegmentationError> {
        prototype::build_prototype(
            reference,
            &self.extractor,
            self.config.input_edge,
            self.config.patch_edge,
            self.config.channel_mean,
            self.config.channel_std,
        )
    }
}

/// One frame handed to the processing worker. Dropping the task (including on
/// a channel failure) drops the guard and releases the pipeline.
struct FrameTask {
    buffer: Vec<u8>,
    width: u32,
    height: u32,
    view_aspect: f32,
    prototype: Arc<Prototype>,
    guard: InFlightGuard,
}

/// State shared between the render-side handle and the processing worker.
struct SharedState {
    /// The last complete result, replaced as a whole `Arc` on publication.
    latest: Mutex<Option<Arc<SegmentationResult>>>,
    /// Reusable frame byte buffers.
    frame_pool: Mutex<VecDeque<Vec<u8>>>,
}

impl SharedState {
    fn return_buffer(&self, buffer: Vec<u8>) {
        let mut pool = self.frame_pool.lock().unwrap();
        if pool.len() < FRAME_POOL_SIZE {
            pool.push_back(buffer);
        }
    }
}

/// The main, top-level handle for the engine, owned by the render loop.
pub struct FramePipeline<E: FeatureExtractor + 'static> {
    engine: Arc<SegmentationEngine<E>>,
    throttle: FrameThrottle,
    segmenting: bool,
    prototype: Arc<RwLock<Option<Arc<Prototype>>>>,
    shared: Arc<SharedState>,
    task_sender: mpsc::UnboundedSender<FrameTask>,
}

impl<E: FeatureExtractor + 'static> FramePipeline<E> {
    /// Creates the pipeline and spawns its processing worker. Must be called
    /// from within a tokio runtime.
    pub fn new(config: PipelineConfig, extractor: E) -> Self {
        let interval = config.process_every_nth_frame;
        let engine = Arc::new(SegmentationEngine::new(config, extractor));
        let shared = Arc::new(SharedState {
            latest: Mutex::new(None),
            frame_pool: Mutex::new(VecDeque::with_capacity(FRAME_POOL_SIZE)),
        });

        let (task_sender, task_receiver) = mpsc::unbounded_channel::<FrameTask>();
        tokio::spawn(Self::worker(
            Arc::clone(&engine),
            Arc::clone(&shared),
            task_receiver,
        ));

        Self {
            engine,
            throttle: FrameThrottle::new(interval),
            segmenting: false,
            prototype: Arc::new(RwLock::new(None)),
            shared,
            task_sender,
        }
    }

    /// The processing worker: exactly one frame at a time, the tensor scratch
    /// buffer reused across all of them.
    async fn worker(
        engine: Arc<SegmentationEngine<E>>,
        shared: Arc<SharedState>,
        mut task_receiver: mpsc::UnboundedReceiver<FrameTask>,
    ) {
        let mut tensor_scratch: Vec<f32> = Vec::new();

        while let Some(task) = task_receiver.recv().await {
            let FrameTask {
                buffer,
                width,
                height,
                view_aspect,
                prototype,
                guard,
            } = task;

            let Some(frame) = RgbImage::from_raw(width, height, buffer) else {
                log::warn!("dropping frame: buffer does not match {width}x{height}");
                drop(guard);
                continue;
            };

            let cropped = crop_to_aspect(&frame, view_aspect);
            match engine.segment(&cropped, &prototype, &mut tensor_scratch) {
                Ok(result) => {
                    *shared.latest.lock().unwrap() = Some(Arc::new(result));
                }
                Err(err) => {
                    // Fatal for this tick only; the guard below still clears.
                    log::warn!("frame segmentation failed: {err}");
                }
            }

            shared.return_buffer(frame.into_raw());
            drop(guard);
        }
    }

    /// Called by the render loop once per drawn frame. Never blocks: the
    /// outcome is decided from the throttle cadence and the in-flight flag,
    /// and an ineligible frame is dropped, not queued.
    pub fn tick(
        &mut self,
        frame: &RgbImage,
        view_aspect: f32,
        tracking: TrackingQuality,
    ) -> TickOutcome {
        // The counter advances even on skipped ticks.
        let due = self.throttle.observe_frame();

        if !self.segmenting {
            return TickOutcome::Skipped(SkipReason::Disabled);
        }
        if tracking != TrackingQuality::Usable {
            return TickOutcome::Skipped(SkipReason::NotTracking);
        }
        let Some(prototype) = self.prototype.read().unwrap().clone() else {
            return TickOutcome::Skipped(SkipReason::NoPrototype);
        };
        if !due {
            return TickOutcome::Skipped(SkipReason::NotDue);
        }
        let Some(guard) = self.throttle.try_acquire() else {
            return TickOutcome::Skipped(SkipReason::Busy);
        };

        let mut buffer = {
            let mut pool = self.shared.frame_pool.lock().unwrap();
            pool.pop_front().unwrap_or_default()
        };
        buffer.clear();
        buffer.extend_from_slice(frame.as_raw());

        let task = FrameTask {
            buffer,
            width: frame.width(),
            height: frame.height(),
            view_aspect,
            prototype,
            guard,
        };
        if self.task_sender.send(task).is_err() {
            // The task (and its guard) just dropped, so the flag is clear.
            log::warn!("processing worker is gone; frame dropped");
            return TickOutcome::Skipped(SkipReason::WorkerGone);
        }

        TickOutcome::Dispatched
    }

    /// Registers (or replaces) the target object from a reference image with a
    /// foreground alpha channel. Synchronous; errors surface to the caller and
    /// leave any previously registered prototype in place.
    pub fn register_prototype(
        &self,
        reference: &DynamicImage,
    ) -> Result<(), SegmentationError> {
        let built = self.engine.build_prototype(reference)?;
        *self.prototype.write().unwrap() = Some(Arc::new(built));
        Ok(())
    }

    /// Toggles segmentation on or off. While off, ticks are display-only.
    pub fn set_segmenting(&mut self, enabled: bool) {
        self.segmenting = enabled;
    }

    pub fn is_segmenting(&self) -> bool {
        self.segmenting
    }

    pub fn has_prototype(&self) -> bool {
        self.prototype.read().unwrap().is_some()
    }

    /// Whether a computation is currently in flight.
    pub fn is_processing(&self) -> bool {
        self.throttle.is_in_flight()
    }

    /// The last complete published result, if any.
    pub fn latest_result(&self) -> Option<Arc<SegmentationResult>> {
        self.shared.latest.lock().unwrap().clone()
    }

    /// The last-known centroid in patch-grid coordinates.
    pub fn last_centroid(&self) -> Option<(f32, f32)> {
        self.latest_result().and_then(|result| result.centroid)
    }

    /// The last-known patch grid dimensions as `(w_patches, h_patches)`.
    pub fn grid_size(&self) -> Option<(u32, u32)> {
        self.latest_result()
            .map(|result| (result.w_patches, result.h_patches))
    }
}
