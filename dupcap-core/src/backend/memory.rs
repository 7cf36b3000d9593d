//! In-process duplication backend
//!
//! Emulates the duplication service from a script of acquire outcomes, or
//! from a synthetic moving gradient when the script runs dry. A
//! [`MemoryHandle`] shares the backend state so tests (and the CLI's
//! synthetic mode) can queue frames, move the pointer, inject failures and
//! inspect the protocol counters while a session owns the backend.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{
    AcquiredFrame, Backend, Device, Duplication, DuplicationError, FrameInfo, MappedSurface,
    PointerShape,
};
use crate::convert::{ColorConverter, copy_rows, yuv};
use crate::encode::{MemoryEncoder, MemoryEncoderSettings};
use crate::error::{CaptureError, Result};
use crate::formats::yuv420_plane_dims;
use crate::types::{FeatureLevel, OutputInfo, PixelFormat, Point, Rect};

/// A tightly packed image standing in for a GPU texture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    data: Vec<u8>,
}

impl Image {
    /// Wrap BGRA bytes; `data` must hold `width * height * 4` bytes
    pub fn bgra(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let needed = width as usize * height as usize * 4;
        if data.len() != needed {
            return Err(CaptureError::staging(format!(
                "{}x{} BGRA image needs {} bytes, got {}",
                width,
                height,
                needed,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format: PixelFormat::Bgra8,
            data,
        })
    }

    /// BGRA image filled with one color
    pub fn solid(width: u32, height: u32, bgra: [u8; 4]) -> Self {
        Self::from_fn(width, height, |_, _| bgra)
    }

    /// BGRA image computed per pixel
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> [u8; 4]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self {
            width,
            height,
            format: PixelFormat::Bgra8,
            data,
        }
    }

    fn plane(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::R8,
            data: vec![0; width as usize * height as usize],
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel() as usize
    }
}

/// Texture type of the memory backend
pub type MemoryTexture = Arc<Image>;

/// Pointer shape delivered with a scripted frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedShape {
    /// Raw DXGI shape type (1 monochrome, 2 color, 4 masked color)
    pub raw_type: u32,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub hotspot: Point,
    pub data: Vec<u8>,
}

impl ScriptedShape {
    /// A color cursor of the given size filled with one byte value
    pub fn color(width: u32, height: u32, hotspot: Point, fill: u8) -> Self {
        Self {
            raw_type: 2,
            width,
            height,
            pitch: width * 4,
            hotspot,
            data: vec![fill; width as usize * height as usize * 4],
        }
    }
}

/// One acquire result with its cursor side information
#[derive(Debug, Clone, Default)]
pub struct ScriptedFrame {
    /// New desktop image; `None` means the acquire carries no pixels
    pub image: Option<Arc<Image>>,
    /// Reported pointer position and visibility
    pub pointer: Option<(Point, bool)>,
    /// New pointer shape
    pub shape: Option<ScriptedShape>,
}

impl ScriptedFrame {
    /// A frame with new pixels
    pub fn pixels(image: Image) -> Self {
        Self {
            image: Some(Arc::new(image)),
            ..Default::default()
        }
    }

    /// An acquire carrying only a pointer report
    pub fn pointer(position: Point, visible: bool) -> Self {
        Self::default().with_pointer(position, visible)
    }

    /// An acquire carrying nothing
    pub fn spurious() -> Self {
        Self::default()
    }

    pub fn with_pointer(mut self, position: Point, visible: bool) -> Self {
        self.pointer = Some((position, visible));
        self
    }

    pub fn with_shape(mut self, shape: ScriptedShape) -> Self {
        self.shape = Some(shape);
        self
    }
}

/// Scripted outcome of one acquire
#[derive(Debug, Clone)]
pub enum ScriptedAcquire {
    Frame(ScriptedFrame),
    Error(DuplicationError),
}

impl From<ScriptedFrame> for ScriptedAcquire {
    fn from(frame: ScriptedFrame) -> Self {
        Self::Frame(frame)
    }
}

impl From<DuplicationError> for ScriptedAcquire {
    fn from(error: DuplicationError) -> Self {
        Self::Error(error)
    }
}

#[derive(Debug)]
struct MemoryState {
    outputs: Vec<OutputInfo>,
    script: VecDeque<ScriptedAcquire>,
    synthetic: bool,
    synthetic_frame: u32,
    last_image: Arc<Image>,
    pointer: Option<Point>,
    can_capture: bool,
    fail_device: bool,
    fail_priority: bool,
    duplicate_failures: u32,
    release_errors: VecDeque<DuplicationError>,
    encoder_available: bool,
    encoder_settings: MemoryEncoderSettings,
    row_padding: usize,
    pending_shape: Option<ScriptedShape>,
    clock: i64,

    outstanding: bool,
    acquires: u64,
    releases: u64,
    acquire_violations: u64,
    duplicate_attempts: u64,
    gpu_priority: Option<i32>,
    live_devices: i64,
    live_duplications: i64,
    live_staging: i64,
    closed_outputs: u64,
}

impl MemoryState {
    fn new(width: u32, height: u32) -> Self {
        let output = OutputInfo {
            adapter: 0,
            output: 0,
            name: r"\\.\MEMORY1".to_string(),
            adapter_name: "dupcap memory adapter".to_string(),
            vendor_id: 0,
            device_id: 0,
            dedicated_video_memory: 0,
            dedicated_system_memory: 0,
            shared_system_memory: 0,
            desktop: Rect {
                left: 0,
                top: 0,
                right: width as i32,
                bottom: height as i32,
            },
            attached: true,
        };
        Self {
            outputs: vec![output],
            script: VecDeque::new(),
            synthetic: false,
            synthetic_frame: 0,
            last_image: Arc::new(Image::solid(width, height, [0, 0, 0, 255])),
            pointer: None,
            can_capture: true,
            fail_device: false,
            fail_priority: false,
            duplicate_failures: 0,
            release_errors: VecDeque::new(),
            encoder_available: true,
            encoder_settings: MemoryEncoderSettings::default(),
            row_padding: 0,
            pending_shape: None,
            clock: 0,
            outstanding: false,
            acquires: 0,
            releases: 0,
            acquire_violations: 0,
            duplicate_attempts: 0,
            gpu_priority: None,
            live_devices: 0,
            live_duplications: 0,
            live_staging: 0,
            closed_outputs: 0,
        }
    }

    fn next_synthetic(&mut self, width: u32, height: u32) -> ScriptedFrame {
        let t = self.synthetic_frame;
        self.synthetic_frame = self.synthetic_frame.wrapping_add(1);
        let image = Image::from_fn(width, height, |x, y| {
            [
                (x.wrapping_add(t) & 0xff) as u8,
                (y.wrapping_add(t) & 0xff) as u8,
                (t.wrapping_mul(3) & 0xff) as u8,
                255,
            ]
        });
        let pointer = Point::new(
            ((t * 4) % width.max(1)) as i32,
            ((t * 2) % height.max(1)) as i32,
        );
        ScriptedFrame::pixels(image).with_pointer(pointer, true)
    }
}

/// Scripting and inspection handle for a [`MemoryBackend`]
#[derive(Clone)]
pub struct MemoryHandle {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryHandle {
    /// Queue the outcome of a future acquire
    pub fn push(&self, acquire: impl Into<ScriptedAcquire>) {
        self.state.lock().script.push_back(acquire.into());
    }

    /// Acquires still queued
    pub fn pending(&self) -> usize {
        self.state.lock().script.len()
    }

    /// Generate moving gradient frames when the script is empty
    pub fn set_synthetic(&self, enabled: bool) {
        self.state.lock().synthetic = enabled;
    }

    /// Position returned by the pointer poll
    pub fn set_pointer(&self, position: Option<Point>) {
        self.state.lock().pointer = position;
    }

    pub fn set_can_capture(&self, allowed: bool) {
        self.state.lock().can_capture = allowed;
    }

    pub fn set_attached(&self, attached: bool) {
        for output in &mut self.state.lock().outputs {
            output.attached = attached;
        }
    }

    pub fn fail_device_creation(&self, fail: bool) {
        self.state.lock().fail_device = fail;
    }

    pub fn fail_gpu_priority(&self, fail: bool) {
        self.state.lock().fail_priority = fail;
    }

    /// Fail the next `count` duplication attempts
    pub fn fail_duplications(&self, count: u32) {
        self.state.lock().duplicate_failures = count;
    }

    /// Fail the next release with `error`
    pub fn fail_next_release(&self, error: DuplicationError) {
        self.state.lock().release_errors.push_back(error);
    }

    pub fn set_encoder_available(&self, available: bool) {
        self.state.lock().encoder_available = available;
    }

    pub fn set_encoder_settings(&self, settings: MemoryEncoderSettings) {
        self.state.lock().encoder_settings = settings;
    }

    /// Extra bytes at the end of every staging row
    pub fn set_row_padding(&self, padding: usize) {
        self.state.lock().row_padding = padding;
    }

    pub fn acquires(&self) -> u64 {
        self.state.lock().acquires
    }

    pub fn releases(&self) -> u64 {
        self.state.lock().releases
    }

    /// Whether a frame is currently outstanding
    pub fn outstanding(&self) -> bool {
        self.state.lock().outstanding
    }

    /// Acquires attempted while a frame was outstanding
    pub fn acquire_violations(&self) -> u64 {
        self.state.lock().acquire_violations
    }

    pub fn duplicate_attempts(&self) -> u64 {
        self.state.lock().duplicate_attempts
    }

    pub fn gpu_priority(&self) -> Option<i32> {
        self.state.lock().gpu_priority
    }

    /// Devices, duplications and staging surfaces currently alive
    pub fn live_resources(&self) -> (i64, i64, i64) {
        let state = self.state.lock();
        (state.live_devices, state.live_duplications, state.live_staging)
    }

    pub fn closed_outputs(&self) -> u64 {
        self.state.lock().closed_outputs
    }
}

/// Scriptable in-memory backend
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    /// Backend with one attached `width`x`height` output and an empty script
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::new(width, height))),
        }
    }

    /// Backend producing moving gradient frames
    pub fn synthetic(width: u32, height: u32) -> Self {
        let backend = Self::new(width, height);
        backend.state.lock().synthetic = true;
        backend
    }

    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Backend for MemoryBackend {
    type Device = MemoryDevice;
    type Duplication = MemoryDuplication;
    type Converter = MemoryColorConverter;
    type Encoder = MemoryEncoder;

    fn name(&self) -> &'static str {
        "memory"
    }

    fn can_capture(&self) -> bool {
        self.state.lock().can_capture
    }

    fn outputs(&self) -> Result<Vec<OutputInfo>> {
        Ok(self.state.lock().outputs.clone())
    }

    fn open_output(&self, adapter: u32, output: u32) -> Result<OutputInfo> {
        let state = self.state.lock();
        let info = state
            .outputs
            .iter()
            .find(|o| o.adapter == adapter && o.output == output)
            .ok_or(CaptureError::OutputNotFound { adapter, output })?;
        if !info.attached {
            return Err(CaptureError::OutputNotAttached(info.name.clone()));
        }
        Ok(info.clone())
    }

    fn create_device(&self, _output: &OutputInfo) -> Result<MemoryDevice> {
        let mut state = self.state.lock();
        if state.fail_device {
            return Err(CaptureError::device("scripted device creation failure"));
        }
        state.live_devices += 1;
        Ok(MemoryDevice {
            state: Arc::clone(&self.state),
        })
    }

    fn duplicate_output(
        &self,
        _device: &MemoryDevice,
        output: &OutputInfo,
    ) -> std::result::Result<MemoryDuplication, DuplicationError> {
        let mut state = self.state.lock();
        state.duplicate_attempts += 1;
        if state.duplicate_failures > 0 {
            state.duplicate_failures -= 1;
            return Err(DuplicationError::Failed(
                "duplication unavailable (scripted)".into(),
            ));
        }
        state.live_duplications += 1;
        let (width, height) = output.dimensions();
        Ok(MemoryDuplication {
            state: Arc::clone(&self.state),
            width,
            height,
        })
    }

    fn create_converter(
        &self,
        _device: &MemoryDevice,
        width: u32,
        height: u32,
    ) -> Result<MemoryColorConverter> {
        Ok(MemoryColorConverter::new(width, height))
    }

    fn create_encoder(&self, width: u32, height: u32) -> Result<MemoryEncoder> {
        let state = self.state.lock();
        if !state.encoder_available {
            return Err(CaptureError::Unsupported(
                "memory encoder disabled".into(),
            ));
        }
        Ok(MemoryEncoder::new(width, height, state.encoder_settings))
    }

    fn cursor_position(&self) -> Option<Point> {
        self.state.lock().pointer
    }

    fn close_output(&self, output: &OutputInfo) {
        debug!("Closing memory output {}", output.name);
        self.state.lock().closed_outputs += 1;
    }
}

/// Device of the memory backend
pub struct MemoryDevice {
    state: Arc<Mutex<MemoryState>>,
}

impl Drop for MemoryDevice {
    fn drop(&mut self) {
        self.state.lock().live_devices -= 1;
    }
}

/// CPU-readable surface of the memory backend
pub struct MemoryStaging {
    state: Arc<Mutex<MemoryState>>,
    width: u32,
    height: u32,
    format: PixelFormat,
    row_pitch: usize,
    data: Mutex<Vec<u8>>,
}

impl Drop for MemoryStaging {
    fn drop(&mut self) {
        self.state.lock().live_staging -= 1;
    }
}

impl Device for MemoryDevice {
    type Texture = MemoryTexture;
    type Staging = MemoryStaging;

    fn feature_level(&self) -> FeatureLevel {
        FeatureLevel::Level11_1
    }

    fn set_gpu_thread_priority(&self, priority: i32) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_priority {
            return Err(CaptureError::device("scripted priority failure"));
        }
        state.gpu_priority = Some(priority);
        Ok(())
    }

    fn create_staging(&self, width: u32, height: u32, format: PixelFormat) -> Result<MemoryStaging> {
        let mut state = self.state.lock();
        let row_pitch = width as usize * format.bytes_per_pixel() as usize + state.row_padding;
        state.live_staging += 1;
        Ok(MemoryStaging {
            state: Arc::clone(&self.state),
            width,
            height,
            format,
            row_pitch,
            data: Mutex::new(vec![0; row_pitch * height as usize]),
        })
    }

    fn copy_to_staging(&self, source: &MemoryTexture, staging: &MemoryStaging) -> Result<()> {
        if source.width != staging.width
            || source.height != staging.height
            || source.format != staging.format
        {
            return Err(CaptureError::staging(format!(
                "copy of {}x{} {:?} into {}x{} {:?} staging surface",
                source.width,
                source.height,
                source.format,
                staging.width,
                staging.height,
                staging.format
            )));
        }
        let row = source.row_bytes();
        let mut data = staging.data.lock();
        copy_rows(
            &mut data,
            staging.row_pitch,
            source.data(),
            row,
            row,
            source.height as usize,
        )
    }

    fn read_staging<R>(
        &self,
        staging: &MemoryStaging,
        f: impl FnOnce(MappedSurface<'_>) -> Result<R>,
    ) -> Result<R> {
        let data = staging.data.lock();
        f(MappedSurface {
            data: &data,
            row_pitch: staging.row_pitch,
            width: staging.width,
            height: staging.height,
            format: staging.format,
        })
    }
}

/// Duplication interface of the memory backend
pub struct MemoryDuplication {
    state: Arc<Mutex<MemoryState>>,
    width: u32,
    height: u32,
}

impl Drop for MemoryDuplication {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.live_duplications -= 1;
        state.outstanding = false;
        state.pending_shape = None;
    }
}

impl Duplication for MemoryDuplication {
    type Texture = MemoryTexture;

    fn acquire_frame(
        &mut self,
        _timeout: Duration,
    ) -> std::result::Result<AcquiredFrame<MemoryTexture>, DuplicationError> {
        let mut state = self.state.lock();
        if state.outstanding {
            state.acquire_violations += 1;
            return Err(DuplicationError::InvalidCall);
        }

        let next = match state.script.pop_front() {
            Some(next) => next,
            None if state.synthetic => {
                let (width, height) = (self.width, self.height);
                ScriptedAcquire::Frame(state.next_synthetic(width, height))
            }
            None => return Err(DuplicationError::Timeout),
        };
        let frame = match next {
            ScriptedAcquire::Frame(frame) => frame,
            ScriptedAcquire::Error(e) => return Err(e),
        };

        state.clock += 1;
        state.acquires += 1;
        state.outstanding = true;

        let mut info = FrameInfo::default();
        if let Some(image) = &frame.image {
            info.last_present_time = state.clock;
            state.last_image = Arc::clone(image);
        }
        if let Some((position, visible)) = frame.pointer {
            info.last_mouse_update_time = state.clock;
            info.pointer_position = position;
            info.pointer_visible = visible;
            if state.synthetic {
                state.pointer = Some(position);
            }
        }
        if let Some(shape) = &frame.shape {
            info.pointer_shape_size = shape.data.len() as u32;
        }
        state.pending_shape = frame.shape;

        trace!(
            "Memory acquire #{}: present={} mouse={} shape={}",
            state.acquires,
            info.last_present_time,
            info.last_mouse_update_time,
            info.pointer_shape_size
        );
        Ok(AcquiredFrame {
            info,
            texture: Arc::clone(&state.last_image),
        })
    }

    fn release_frame(&mut self) -> std::result::Result<(), DuplicationError> {
        let mut state = self.state.lock();
        if let Some(e) = state.release_errors.pop_front() {
            state.outstanding = false;
            return Err(e);
        }
        if !state.outstanding {
            return Err(DuplicationError::InvalidCall);
        }
        state.outstanding = false;
        state.releases += 1;
        Ok(())
    }

    fn pointer_shape(
        &mut self,
        buffer: &mut [u8],
    ) -> std::result::Result<PointerShape, DuplicationError> {
        let state = self.state.lock();
        let shape = state
            .pending_shape
            .as_ref()
            .ok_or(DuplicationError::InvalidCall)?;
        if buffer.len() < shape.data.len() {
            return Err(DuplicationError::Failed(format!(
                "pointer shape needs {} bytes, buffer holds {}",
                shape.data.len(),
                buffer.len()
            )));
        }
        buffer[..shape.data.len()].copy_from_slice(&shape.data);
        Ok(PointerShape {
            raw_type: shape.raw_type,
            width: shape.width,
            height: shape.height,
            pitch: shape.pitch,
            hotspot: shape.hotspot,
            size: shape.data.len(),
        })
    }
}

/// CPU BT.601 color converter producing three R8 plane images
pub struct MemoryColorConverter {
    width: u32,
    height: u32,
    planes: [MemoryTexture; 3],
}

impl MemoryColorConverter {
    fn new(width: u32, height: u32) -> Self {
        let [(yw, yh), (cw, ch), _] = yuv420_plane_dims(width, height);
        Self {
            width,
            height,
            planes: [
                Arc::new(Image::plane(yw, yh)),
                Arc::new(Image::plane(cw, ch)),
                Arc::new(Image::plane(cw, ch)),
            ],
        }
    }
}

impl ColorConverter<MemoryDevice> for MemoryColorConverter {
    fn convert(
        &mut self,
        _device: &MemoryDevice,
        source: &MemoryTexture,
    ) -> Result<[&MemoryTexture; 3]> {
        if source.width != self.width || source.height != self.height {
            return Err(CaptureError::converter(format!(
                "source is {}x{}, converter expects {}x{}",
                source.width, source.height, self.width, self.height
            )));
        }
        let [y, u, v] = &mut self.planes;
        yuv::bgra_to_i420(
            source.data(),
            source.row_bytes(),
            self.width,
            self.height,
            &mut Arc::make_mut(y).data,
            &mut Arc::make_mut(u).data,
            &mut Arc::make_mut(v).data,
        )?;
        Ok([&self.planes[0], &self.planes[1], &self.planes[2]])
    }
}
