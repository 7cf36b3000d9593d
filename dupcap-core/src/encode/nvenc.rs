//! NVENC encoder implementation via FFmpeg
//!
//! Provides low-latency H.264 encoding on NVIDIA GPUs from I420 input.

use std::collections::VecDeque;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec::{self, encoder};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::util::frame::video::Video;
use ffmpeg_next::{Dictionary, Rational};
use tracing::{debug, error, info, trace};

use super::{EncoderEvent, VideoEncoder, YuvFrame};
use crate::error::{CaptureError, Result};

const ENCODER_NAME: &str = "h264_nvenc";
const FRAME_RATE: i32 = 60;

/// NVENC hardware encoder
pub struct NvencEncoder {
    /// FFmpeg encoder context
    encoder: encoder::Video,
    /// Input frame buffer
    frame: Video,
    /// Output packet buffer
    packet: ffmpeg::Packet,
    /// Encoded access units waiting for `take_output`
    output: VecDeque<Vec<u8>>,
    /// Frame counter for PTS
    frame_count: i64,
    /// Set when the encoder reported an error
    failed: bool,
}

impl NvencEncoder {
    /// Create a new NVENC encoder
    pub fn new(width: u32, height: u32) -> Result<Self> {
        ffmpeg::init().map_err(|e| CaptureError::encoder(format!("FFmpeg init failed: {}", e)))?;

        info!("Initializing encoder: {}", ENCODER_NAME);

        let codec = encoder::find_by_name(ENCODER_NAME)
            .ok_or_else(|| CaptureError::encoder(format!("Encoder {} not found", ENCODER_NAME)))?;

        let mut encoder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| {
                CaptureError::encoder(format!("Failed to create encoder context: {}", e))
            })?;

        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(Rational::new(1, FRAME_RATE));
        encoder.set_frame_rate(Some(Rational::new(FRAME_RATE, 1)));
        encoder.set_gop(FRAME_RATE as u32);
        encoder.set_max_b_frames(0);

        let mut opts = Dictionary::new();
        opts.set("preset", "p1");
        opts.set("tune", "ll");
        opts.set("zerolatency", "1");
        opts.set("rc", "cbr");
        opts.set("delay", "0");
        opts.set("profile", "high");
        opts.set("level", "auto");

        let encoder = encoder
            .open_with(opts)
            .map_err(|e| CaptureError::encoder(format!("Failed to open encoder: {}", e)))?;

        info!("NVENC encoder opened: {}x{} @ {}fps", width, height, FRAME_RATE);

        Ok(Self {
            encoder,
            frame: Video::new(Pixel::YUV420P, width, height),
            packet: ffmpeg::Packet::empty(),
            output: VecDeque::new(),
            frame_count: 0,
            failed: false,
        })
    }

    /// Copy a packed plane into the FFmpeg frame, honoring its line size
    fn fill_plane(&mut self, index: usize, src: &[u8], width: usize, height: usize) {
        let stride = self.frame.stride(index);
        let dst = self.frame.data_mut(index);
        for (dst_row, src_row) in dst.chunks_mut(stride).zip(src.chunks(width)).take(height) {
            let len = width.min(dst_row.len());
            dst_row[..len].copy_from_slice(&src_row[..len]);
        }
    }

    /// Receive encoded packets from the encoder
    fn receive_packets(&mut self) -> Result<()> {
        loop {
            match self.encoder.receive_packet(&mut self.packet) {
                Ok(()) => {
                    let data = self.packet.data().map(|d| d.to_vec()).unwrap_or_default();
                    trace!(
                        "Encoded packet: pts={:?}, size={}, keyframe={}",
                        self.packet.pts(),
                        data.len(),
                        self.packet.is_key()
                    );
                    self.output.push_back(data);
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    break;
                }
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    return Err(CaptureError::encoder(format!(
                        "Failed to receive packet: {}",
                        e
                    )));
                }
            }
        }
        Ok(())
    }
}

impl VideoEncoder for NvencEncoder {
    fn process(&mut self) -> EncoderEvent {
        if self.failed {
            return EncoderEvent::Error;
        }
        if self.output.is_empty() {
            EncoderEvent::NeedsData
        } else {
            EncoderEvent::HasData
        }
    }

    fn provide_frame(&mut self, input: &YuvFrame<'_>) -> Result<()> {
        let (w, h) = (input.width as usize, input.height as usize);
        self.fill_plane(0, input.y, w, h);
        self.fill_plane(1, input.u, w / 2, h / 2);
        self.fill_plane(2, input.v, w / 2, h / 2);

        self.frame.set_pts(Some(self.frame_count));
        self.frame_count += 1;

        let result = self
            .encoder
            .send_frame(&self.frame)
            .map_err(|e| CaptureError::encoder(format!("Failed to send frame: {}", e)))
            .and_then(|_| self.receive_packets());
        if let Err(e) = &result {
            error!("NVENC: {}", e);
            self.failed = true;
        }
        result
    }

    fn take_output(&mut self, dst: &mut [u8]) -> Result<usize> {
        let unit = self
            .output
            .pop_front()
            .ok_or_else(|| CaptureError::encoder("no encoded output ready"))?;
        if unit.len() > dst.len() {
            let needed = unit.len();
            self.output.push_front(unit);
            return Err(CaptureError::BufferTooSmall {
                needed,
                capacity: dst.len(),
            });
        }
        dst[..unit.len()].copy_from_slice(&unit);
        Ok(unit.len())
    }
}

impl Drop for NvencEncoder {
    fn drop(&mut self) {
        if self.encoder.send_eof().is_ok() && self.receive_packets().is_ok() {
            debug!("NVENC flushed {} trailing packets", self.output.len());
        }
    }
}

/// Check if NVENC H.264 is available
pub fn check_nvenc_available() -> bool {
    ffmpeg::init().ok();
    encoder::find_by_name(ENCODER_NAME).is_some()
}
