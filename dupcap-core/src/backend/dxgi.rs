//! DXGI Desktop Duplication backend
//!
//! Enumerates adapters and outputs through an `IDXGIFactory1`, creates a
//! Direct3D 11 device on the output's adapter and drives
//! `IDXGIOutputDuplication` for frames and pointer updates.

use std::time::Duration;

use tracing::{debug, trace, warn};
use windows::Win32::Foundation::{GENERIC_READ, HMODULE, POINT, TRUE};
use windows::Win32::Graphics::Direct3D::{D3D_DRIVER_TYPE_UNKNOWN, D3D_FEATURE_LEVEL};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_SHADER_RESOURCE, D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
    D3D11_CREATE_DEVICE_VIDEO_SUPPORT, D3D11_MAP_READ, D3D11_MAPPED_SUBRESOURCE,
    D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE, D3D11_USAGE_DEFAULT,
    D3D11_USAGE_STAGING, D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_INVALID_CALL, DXGI_ERROR_NOT_FOUND,
    DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO, DXGI_OUTDUPL_POINTER_SHAPE_INFO,
    IDXGIAdapter, IDXGIAdapter1, IDXGIDevice, IDXGIFactory1, IDXGIOutput, IDXGIOutput1,
    IDXGIOutputDuplication, IDXGIResource,
};
use windows::Win32::System::StationsAndDesktops::{
    CloseDesktop, DESKTOP_ACCESS_FLAGS, DESKTOP_CONTROL_FLAGS, OpenInputDesktop,
};
use windows::Win32::UI::WindowsAndMessaging::GetCursorPos;
use windows::core::{HRESULT, Interface};

use super::{
    AcquiredFrame, Backend, Device, Duplication, DuplicationError, FrameInfo, MappedSurface,
    PointerShape,
};
use crate::convert::{ColorConverter, yuv};
use crate::error::{CaptureError, Result, ResultExt};
use crate::formats::{self, yuv420_plane_dims};
use crate::types::{FeatureLevel, OutputInfo, PixelFormat, Point, Rect};

#[cfg(feature = "nvenc")]
type DxgiEncoder = crate::encode::NvencEncoder;
#[cfg(not(feature = "nvenc"))]
type DxgiEncoder = crate::encode::UnavailableEncoder;

/// `WAIT_ABANDONED` as reported through an HRESULT
const WAIT_ABANDONED: HRESULT = HRESULT(0x80);

fn wide_to_string(wide: &[u16]) -> String {
    let end = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..end])
}

fn duplication_error(err: windows::core::Error) -> DuplicationError {
    let code = err.code();
    if code == DXGI_ERROR_WAIT_TIMEOUT {
        DuplicationError::Timeout
    } else if code == DXGI_ERROR_ACCESS_LOST {
        DuplicationError::AccessLost
    } else if code == WAIT_ABANDONED {
        DuplicationError::WaitAbandoned
    } else if code == DXGI_ERROR_INVALID_CALL {
        DuplicationError::InvalidCall
    } else {
        DuplicationError::Failed(format!("{} (0x{:08x})", err, code.0))
    }
}

/// Desktop duplication through DXGI and Direct3D 11
pub struct DxgiBackend {
    factory: IDXGIFactory1,
}

impl DxgiBackend {
    pub fn new() -> Result<Self> {
        let factory: IDXGIFactory1 =
            unsafe { CreateDXGIFactory1() }.context("creating DXGI factory")?;
        Ok(Self { factory })
    }

    fn adapter(&self, index: u32) -> Result<Option<IDXGIAdapter1>> {
        match unsafe { self.factory.EnumAdapters1(index) } {
            Ok(adapter) => Ok(Some(adapter)),
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => Ok(None),
            Err(e) => Err(CaptureError::from(e).with_context("enumerating adapters")),
        }
    }

    fn output(adapter: &IDXGIAdapter1, index: u32) -> Result<Option<IDXGIOutput>> {
        match unsafe { adapter.EnumOutputs(index) } {
            Ok(output) => Ok(Some(output)),
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => Ok(None),
            Err(e) => Err(CaptureError::from(e).with_context("enumerating outputs")),
        }
    }

    fn describe(
        adapter_index: u32,
        output_index: u32,
        adapter: &IDXGIAdapter1,
        output: &IDXGIOutput,
    ) -> Result<OutputInfo> {
        let adapter_desc = unsafe { adapter.GetDesc1() }.context("describing adapter")?;
        let output_desc = unsafe { output.GetDesc() }.context("describing output")?;
        let coords = output_desc.DesktopCoordinates;
        Ok(OutputInfo {
            adapter: adapter_index,
            output: output_index,
            name: wide_to_string(&output_desc.DeviceName),
            adapter_name: wide_to_string(&adapter_desc.Description),
            vendor_id: adapter_desc.VendorId,
            device_id: adapter_desc.DeviceId,
            dedicated_video_memory: adapter_desc.DedicatedVideoMemory as u64,
            dedicated_system_memory: adapter_desc.DedicatedSystemMemory as u64,
            shared_system_memory: adapter_desc.SharedSystemMemory as u64,
            desktop: Rect {
                left: coords.left,
                top: coords.top,
                right: coords.right,
                bottom: coords.bottom,
            },
            attached: output_desc.AttachedToDesktop.as_bool(),
        })
    }

    fn lookup(&self, adapter: u32, output: u32) -> Result<(IDXGIAdapter1, IDXGIOutput)> {
        let not_found = || CaptureError::OutputNotFound { adapter, output };
        let dxgi_adapter = self.adapter(adapter)?.ok_or_else(not_found)?;
        let dxgi_output = Self::output(&dxgi_adapter, output)?.ok_or_else(not_found)?;
        Ok((dxgi_adapter, dxgi_output))
    }
}

impl Backend for DxgiBackend {
    type Device = DxgiDevice;
    type Duplication = DxgiDuplication;
    type Converter = DxgiColorConverter;
    type Encoder = DxgiEncoder;

    fn name(&self) -> &'static str {
        "dxgi"
    }

    fn can_capture(&self) -> bool {
        match unsafe {
            OpenInputDesktop(
                DESKTOP_CONTROL_FLAGS(0),
                TRUE,
                DESKTOP_ACCESS_FLAGS(GENERIC_READ.0),
            )
        } {
            Ok(desktop) => {
                if let Err(e) = unsafe { CloseDesktop(desktop) } {
                    warn!("Failed to close input desktop: {}", e);
                }
                true
            }
            Err(e) => {
                debug!("Input desktop not accessible: {}", e);
                false
            }
        }
    }

    fn outputs(&self) -> Result<Vec<OutputInfo>> {
        let mut outputs = Vec::new();
        let mut adapter_index = 0;
        while let Some(adapter) = self.adapter(adapter_index)? {
            let mut output_index = 0;
            while let Some(output) = Self::output(&adapter, output_index)? {
                outputs.push(Self::describe(
                    adapter_index,
                    output_index,
                    &adapter,
                    &output,
                )?);
                output_index += 1;
            }
            adapter_index += 1;
        }
        Ok(outputs)
    }

    fn open_output(&self, adapter: u32, output: u32) -> Result<OutputInfo> {
        let (dxgi_adapter, dxgi_output) = self.lookup(adapter, output)?;
        let info = Self::describe(adapter, output, &dxgi_adapter, &dxgi_output)?;
        if !info.attached {
            return Err(CaptureError::OutputNotAttached(info.name));
        }
        Ok(info)
    }

    fn create_device(&self, output: &OutputInfo) -> Result<DxgiDevice> {
        let (adapter, _) = self.lookup(output.adapter, output.output)?;
        let adapter: IDXGIAdapter = adapter.cast()?;

        let levels: Vec<D3D_FEATURE_LEVEL> = FeatureLevel::PREFERRED
            .iter()
            .map(|level| D3D_FEATURE_LEVEL(level.raw()))
            .collect();
        let mut device = None;
        let mut context = None;
        let mut level = D3D_FEATURE_LEVEL::default();
        unsafe {
            D3D11CreateDevice(
                &adapter,
                D3D_DRIVER_TYPE_UNKNOWN,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_BGRA_SUPPORT | D3D11_CREATE_DEVICE_VIDEO_SUPPORT,
                Some(levels.as_slice()),
                D3D11_SDK_VERSION,
                Some(&mut device),
                Some(&mut level),
                Some(&mut context),
            )
        }
        .context("D3D11CreateDevice")?;

        let device = device.ok_or_else(|| CaptureError::device("D3D11CreateDevice returned no device"))?;
        let context =
            context.ok_or_else(|| CaptureError::device("D3D11CreateDevice returned no context"))?;
        let feature_level = FeatureLevel::from_raw(level.0)
            .ok_or_else(|| CaptureError::device(format!("unexpected feature level 0x{:x}", level.0)))?;

        Ok(DxgiDevice {
            device,
            context,
            feature_level,
        })
    }

    fn duplicate_output(
        &self,
        device: &DxgiDevice,
        output: &OutputInfo,
    ) -> std::result::Result<DxgiDuplication, DuplicationError> {
        let (_, dxgi_output) = self
            .lookup(output.adapter, output.output)
            .map_err(|e| DuplicationError::Failed(e.to_string()))?;
        let output1: IDXGIOutput1 = dxgi_output.cast().map_err(duplication_error)?;
        let duplication =
            unsafe { output1.DuplicateOutput(&device.device) }.map_err(duplication_error)?;
        Ok(DxgiDuplication { duplication })
    }

    fn create_converter(
        &self,
        device: &DxgiDevice,
        width: u32,
        height: u32,
    ) -> Result<DxgiColorConverter> {
        DxgiColorConverter::new(device, width, height)
    }

    fn create_encoder(&self, width: u32, height: u32) -> Result<DxgiEncoder> {
        #[cfg(feature = "nvenc")]
        {
            DxgiEncoder::new(width, height)
        }
        #[cfg(not(feature = "nvenc"))]
        {
            let _ = (width, height);
            DxgiEncoder::new()
        }
    }

    fn cursor_position(&self) -> Option<Point> {
        let mut pos = POINT::default();
        match unsafe { GetCursorPos(&mut pos) } {
            Ok(()) => Some(Point::new(pos.x, pos.y)),
            Err(e) => {
                trace!("GetCursorPos failed: {}", e);
                None
            }
        }
    }
}

/// Direct3D 11 device and its immediate context
pub struct DxgiDevice {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    feature_level: FeatureLevel,
}

/// CPU-readable Direct3D 11 texture
pub struct DxgiStaging {
    texture: ID3D11Texture2D,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl DxgiDevice {
    fn create_texture(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: D3D11_USAGE,
    ) -> Result<ID3D11Texture2D> {
        let staging = usage == D3D11_USAGE_STAGING;
        let desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT(formats::dxgi_format(format)),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: usage,
            BindFlags: if staging {
                0
            } else {
                D3D11_BIND_SHADER_RESOURCE.0 as u32
            },
            CPUAccessFlags: if staging {
                D3D11_CPU_ACCESS_READ.0 as u32
            } else {
                0
            },
            MiscFlags: 0,
        };
        let mut texture = None;
        unsafe { self.device.CreateTexture2D(&desc, None, Some(&mut texture)) }
            .context(format!("creating {}x{} {:?} texture", width, height, format))?;
        texture.ok_or_else(|| CaptureError::staging("CreateTexture2D returned no texture"))
    }
}

impl Device for DxgiDevice {
    type Texture = ID3D11Texture2D;
    type Staging = DxgiStaging;

    fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    fn set_gpu_thread_priority(&self, priority: i32) -> Result<()> {
        let dxgi: IDXGIDevice = self
            .device
            .cast()
            .context("obtaining the IDXGIDevice interface")?;
        unsafe { dxgi.SetGPUThreadPriority(priority) }?;
        Ok(())
    }

    fn create_staging(&self, width: u32, height: u32, format: PixelFormat) -> Result<DxgiStaging> {
        let texture = self.create_texture(width, height, format, D3D11_USAGE_STAGING)?;
        Ok(DxgiStaging {
            texture,
            width,
            height,
            format,
        })
    }

    fn copy_to_staging(&self, source: &ID3D11Texture2D, staging: &DxgiStaging) -> Result<()> {
        unsafe { self.context.CopyResource(&staging.texture, source) };
        Ok(())
    }

    fn read_staging<R>(
        &self,
        staging: &DxgiStaging,
        f: impl FnOnce(MappedSurface<'_>) -> Result<R>,
    ) -> Result<R> {
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            self.context
                .Map(&staging.texture, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
        }
        .map_err(|e| CaptureError::staging(format!("failed to map staging texture: {}", e)))?;

        let row_pitch = mapped.RowPitch as usize;
        let row_bytes = staging.width as usize * staging.format.bytes_per_pixel() as usize;
        let len = match staging.height as usize {
            0 => 0,
            h => row_pitch * (h - 1) + row_bytes,
        };
        // SAFETY: the mapping covers `height` rows of `RowPitch` bytes and stays
        // valid until the Unmap below; the slice does not outlive `f`.
        let data = unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, len) };
        let result = f(MappedSurface {
            data,
            row_pitch,
            width: staging.width,
            height: staging.height,
            format: staging.format,
        });

        unsafe { self.context.Unmap(&staging.texture, 0) };
        result
    }
}

/// `IDXGIOutputDuplication` of one output
pub struct DxgiDuplication {
    duplication: IDXGIOutputDuplication,
}

impl Duplication for DxgiDuplication {
    type Texture = ID3D11Texture2D;

    fn acquire_frame(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<AcquiredFrame<ID3D11Texture2D>, DuplicationError> {
        let timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;
        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        unsafe {
            self.duplication
                .AcquireNextFrame(timeout_ms, &mut info, &mut resource)
        }
        .map_err(duplication_error)?;

        let texture = match resource.map(|r| r.cast::<ID3D11Texture2D>()) {
            Some(Ok(texture)) => texture,
            other => {
                // The frame is ours until released, even without a usable texture
                if let Err(e) = unsafe { self.duplication.ReleaseFrame() } {
                    warn!("Failed to release unusable frame: {}", e);
                }
                let reason = match other {
                    Some(Err(e)) => e.to_string(),
                    _ => "no desktop resource".to_string(),
                };
                return Err(DuplicationError::Failed(format!(
                    "acquired frame has no texture: {}",
                    reason
                )));
            }
        };

        let position = info.PointerPosition.Position;
        Ok(AcquiredFrame {
            info: FrameInfo {
                last_present_time: info.LastPresentTime,
                last_mouse_update_time: info.LastMouseUpdateTime,
                pointer_position: Point::new(position.x, position.y),
                pointer_visible: info.PointerPosition.Visible.as_bool(),
                pointer_shape_size: info.PointerShapeBufferSize,
            },
            texture,
        })
    }

    fn release_frame(&mut self) -> std::result::Result<(), DuplicationError> {
        unsafe { self.duplication.ReleaseFrame() }.map_err(duplication_error)
    }

    fn pointer_shape(
        &mut self,
        buffer: &mut [u8],
    ) -> std::result::Result<PointerShape, DuplicationError> {
        let mut required = 0u32;
        let mut shape = DXGI_OUTDUPL_POINTER_SHAPE_INFO::default();
        unsafe {
            self.duplication.GetFramePointerShape(
                buffer.len() as u32,
                buffer.as_mut_ptr().cast(),
                &mut required,
                &mut shape,
            )
        }
        .map_err(duplication_error)?;

        Ok(PointerShape {
            raw_type: shape.Type,
            width: shape.Width,
            height: shape.Height,
            pitch: shape.Pitch,
            hotspot: Point::new(shape.HotSpot.x, shape.HotSpot.y),
            size: required as usize,
        })
    }
}

/// BT.601 conversion into three R8 plane textures
///
/// The desktop image is read back through a BGRA staging texture, converted
/// on the CPU and uploaded into the plane textures the planar path copies
/// from.
pub struct DxgiColorConverter {
    bgra: DxgiStaging,
    planes: [ID3D11Texture2D; 3],
    buffers: [Vec<u8>; 3],
    dims: [(u32, u32); 3],
    width: u32,
    height: u32,
}

impl DxgiColorConverter {
    fn new(device: &DxgiDevice, width: u32, height: u32) -> Result<Self> {
        let bgra = device
            .create_staging(width, height, PixelFormat::Bgra8)
            .context("creating converter source surface")?;
        let dims = yuv420_plane_dims(width, height);
        let plane = |(w, h): (u32, u32)| {
            device.create_texture(w, h, PixelFormat::R8, D3D11_USAGE_DEFAULT)
        };
        let planes = [plane(dims[0])?, plane(dims[1])?, plane(dims[2])?];
        let buffers = dims.map(|(w, h)| vec![0u8; w as usize * h as usize]);
        Ok(Self {
            bgra,
            planes,
            buffers,
            dims,
            width,
            height,
        })
    }
}

impl ColorConverter<DxgiDevice> for DxgiColorConverter {
    fn convert(
        &mut self,
        device: &DxgiDevice,
        source: &ID3D11Texture2D,
    ) -> Result<[&ID3D11Texture2D; 3]> {
        device.copy_to_staging(source, &self.bgra)?;
        let (width, height) = (self.width, self.height);
        let [y, u, v] = &mut self.buffers;
        device.read_staging(&self.bgra, |mapped| {
            yuv::bgra_to_i420(mapped.data, mapped.row_pitch, width, height, y, u, v)
        })?;

        for ((texture, buffer), (w, _)) in self.planes.iter().zip(&self.buffers).zip(self.dims) {
            unsafe {
                device.context.UpdateSubresource(
                    texture,
                    0,
                    None,
                    buffer.as_ptr().cast(),
                    w,
                    0,
                )
            };
        }
        Ok([&self.planes[0], &self.planes[1], &self.planes[2]])
    }
}
