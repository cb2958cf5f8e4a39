use std::convert::TryFrom;

use thiserror::Error;

use crate::models::Color;

mod sampler;
pub use sampler::*;

#[derive(Debug, Clone, Error)]
pub enum RawImageError {
    #[error("invalid data ({data} bytes) for the given dimensions ({width} x {height} x {channels} = {expected})")]
    InvalidData {
        data: usize,
        width: usize,
        height: usize,
        channels: usize,
        expected: usize,
    },
}

/// 8-bit RGB pixel buffer of a display snapshot
#[derive(Clone, PartialEq, Eq)]
pub struct RawImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl RawImage {
    pub const CHANNELS: u32 = 3;

    /// Byte offset of pixel (x, y) in an image `width` pixels wide
    fn offset(width: u32, x: u32, y: u32) -> usize {
        (y as usize * width as usize + x as usize) * Self::CHANNELS as usize
    }

    fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * Self::CHANNELS as usize
    }

    /// Build an image by evaluating `f` at every pixel
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> Color) -> Self {
        let mut data = Vec::with_capacity(Self::byte_len(width, height));

        for y in 0..height {
            for x in 0..width {
                let (r, g, b) = f(x, y).into_components();
                data.extend_from_slice(&[r, g, b]);
            }
        }

        Self {
            data,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color_at(&self, x: u32, y: u32) -> Option<Color> {
        if x < self.width && y < self.height {
            // Safety: x (resp. y) is in 0..width (resp. 0..height)
            Some(unsafe { self.color_at_unchecked(x, y) })
        } else {
            None
        }
    }

    /// # Safety
    ///
    /// `x` must be less than the width and `y` less than the height of the image.
    pub unsafe fn color_at_unchecked(&self, x: u32, y: u32) -> Color {
        let idx = Self::offset(self.width, x, y);
        Color::new(
            *self.data.get_unchecked(idx),
            *self.data.get_unchecked(idx + 1),
            *self.data.get_unchecked(idx + 2),
        )
    }
}

impl std::fmt::Debug for RawImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut f = f.debug_struct("RawImage");
        f.field("width", &self.width);
        f.field("height", &self.height);

        if self.data.len() > 32 {
            f.field("data", &format!("[{} bytes]", self.data.len()));
        } else {
            f.field("data", &self.data);
        }

        f.finish()
    }
}

impl TryFrom<(Vec<u8>, u32, u32)> for RawImage {
    type Error = RawImageError;

    fn try_from((data, width, height): (Vec<u8>, u32, u32)) -> Result<Self, Self::Error> {
        let channels = Self::CHANNELS as usize;
        let expected = Self::byte_len(width, height);

        if data.len() != expected {
            return Err(RawImageError::InvalidData {
                data: data.len(),
                width: width as _,
                height: height as _,
                channels,
                expected,
            });
        }

        Ok(Self {
            data,
            width,
            height,
        })
    }
}

impl From<image::RgbImage> for RawImage {
    fn from(image: image::RgbImage) -> Self {
        let (width, height) = image.dimensions();

        Self {
            data: image.into_raw(),
            width,
            height,
        }
    }
}

impl From<image::RgbaImage> for RawImage {
    fn from(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        let mut data = Vec::with_capacity(Self::byte_len(width, height));

        // Drop the alpha channel, screen contents are opaque
        for pixel in image.into_raw().chunks_exact(4) {
            data.extend_from_slice(&pixel[..3]);
        }

        Self {
            data,
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_data_length() {
        assert!(matches!(
            RawImage::try_from((vec![0u8; 10], 2, 2)),
            Err(RawImageError::InvalidData { expected: 12, .. })
        ));
    }

    #[test]
    fn pixel_access() {
        let image = RawImage::from_fn(3, 2, |x, y| Color::new(x as u8, y as u8, 7));

        assert_eq!(image.color_at(2, 1), Some(Color::new(2, 1, 7)));
        assert_eq!(image.color_at(3, 0), None);
        assert_eq!(image.color_at(0, 2), None);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn offsets_past_u32_range() {
        // 70000 x 70000 RGB is over 14 GB, more than u32 can index
        assert_eq!(
            RawImage::offset(70_000, 69_999, 69_999),
            14_699_999_997
        );
        assert_eq!(RawImage::byte_len(70_000, 70_000), 14_700_000_000);
    }

    #[test]
    fn from_rgba_drops_alpha() {
        let rgba = image::RgbaImage::from_raw(2, 1, vec![1, 2, 3, 255, 4, 5, 6, 0])
            .expect("invalid buffer");
        let image = RawImage::from(rgba);

        assert_eq!(image.color_at(0, 0), Some(Color::new(1, 2, 3)));
        assert_eq!(image.color_at(1, 0), Some(Color::new(4, 5, 6)));
    }
}
