//! facerec-hw — V4L2 camera capture.
//!
//! Opens a capture device, negotiates YUYV, RGB3 or MJPG and hands out
//! frames converted to RGB.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, PixelFormat};
pub use frame::Frame;
