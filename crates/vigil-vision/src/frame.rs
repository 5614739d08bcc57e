//! Captured frames.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbImage;
use vigil_models::{FrameRef, FrameSize};

use crate::error::{MediaError, MediaResult};

/// One RGB frame read from a camera.
///
/// The pixel buffer is reference counted so the same frame can be handed to
/// the detector pool and the event sink without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    /// 1-based index since the monitor started.
    pub index: u64,
    pub captured_at: DateTime<Utc>,
    pub image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self {
            index,
            captured_at: Utc::now(),
            image: Arc::new(image),
        }
    }

    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb24(index: u64, width: u32, height: u32, data: Vec<u8>) -> MediaResult<Self> {
        let expected = rgb24_len(width, height);
        if data.len() != expected {
            return Err(MediaError::InvalidFrame(format!(
                "expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| MediaError::InvalidFrame("buffer does not match dimensions".into()))?;
        Ok(Self::new(index, image))
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width(), self.height())
    }

    /// Reference attached to events raised on this frame.
    pub fn frame_ref(&self) -> FrameRef {
        FrameRef {
            frame_index: self.index,
            width: self.width(),
            height: self.height(),
        }
    }
}

/// Byte length of a packed RGB24 frame.
#[inline]
pub fn rgb24_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgb24_checks_length() {
        let frame = Frame::from_rgb24(3, 4, 2, vec![0; 24]).unwrap();
        assert_eq!(frame.size(), FrameSize::new(4, 2));
        assert_eq!(frame.frame_ref().frame_index, 3);

        assert!(matches!(
            Frame::from_rgb24(1, 4, 2, vec![0; 23]),
            Err(MediaError::InvalidFrame(_))
        ));
    }
}
