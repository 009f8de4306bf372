use facerec_hw::{CameraError, Frame, FrameStream};

/// Undecodable buffers tolerated in a row before the stream is given up.
pub const MAX_CONSECUTIVE_DROPS: usize = 30;

/// Anything that hands out captured frames.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

impl FrameSource for FrameStream<'_> {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        FrameStream::next_frame(self)
    }
}

/// Pull the next frame that converted cleanly.
///
/// A corrupt buffer only costs that frame; any other capture error means the
/// device is gone and `None` ends the run.
pub fn next_usable_frame(source: &mut impl FrameSource) -> Option<Frame> {
    for _ in 0..MAX_CONSECUTIVE_DROPS {
        match source.next_frame() {
            Ok(frame) => return Some(frame),
            Err(CameraError::Conversion(e)) => {
                tracing::warn!(error = %e, "dropping undecodable frame");
            }
            Err(e) => {
                tracing::warn!(error = %e, "camera stopped");
                return None;
            }
        }
    }
    tracing::warn!(drops = MAX_CONSECUTIVE_DROPS, "camera keeps producing undecodable frames");
    None
}
