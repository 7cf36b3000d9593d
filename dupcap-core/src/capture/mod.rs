//! Frame acquisition and the capture session

mod engine;
mod session;

pub use engine::FrameAcquisition;
pub use session::CaptureSession;
