//! Borrowed pixel-buffer views handed in by the capture side

use crate::error::{Result, SegmentError};
use image::RgbImage;

/// Memory layout of one pixel in a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 32-bit BGRA, the layout cameras usually deliver
    Bgra8,
    Rgba8,
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }

    /// Byte offsets of the red, green and blue channels within a pixel
    fn rgb_offsets(self) -> [usize; 3] {
        match self {
            PixelFormat::Bgra8 => [2, 1, 0],
            PixelFormat::Rgba8 | PixelFormat::Rgb8 => [0, 1, 2],
        }
    }
}

/// Read-only view over a frame owned by the caller
///
/// The view only lives for the duration of a `process` call; nothing in the
/// segmenter keeps it afterwards.
#[derive(Debug, Clone, Copy)]
pub struct PixelBuffer<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
}

impl<'a> PixelBuffer<'a> {
    /// Wrap raw frame memory
    ///
    /// `stride` is the number of bytes between the starts of two rows and may
    /// include padding. The last row only needs `width * bpp` bytes.
    pub fn new(
        data: &'a [u8],
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(SegmentError::InvalidFrame(format!(
                "frame dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }

        let row_bytes = (width as usize)
            .checked_mul(format.bytes_per_pixel())
            .ok_or_else(|| SegmentError::InvalidFrame(format!("width {} overflows", width)))?;
        if stride < row_bytes {
            return Err(SegmentError::InvalidFrame(format!(
                "stride {} is smaller than a {}-byte row",
                stride, row_bytes
            )));
        }

        let required = stride
            .checked_mul(height as usize - 1)
            .and_then(|padded| padded.checked_add(row_bytes))
            .ok_or_else(|| {
                SegmentError::InvalidFrame(format!(
                    "stride {} over {} rows overflows the address space",
                    stride, height
                ))
            })?;
        if data.len() < required {
            return Err(SegmentError::InvalidFrame(format!(
                "buffer holds {} bytes, {}x{} {:?} needs {}",
                data.len(),
                width,
                height,
                format,
                required
            )));
        }

        Ok(Self {
            data,
            width,
            height,
            stride,
            format,
        })
    }

    /// Tightly packed buffer (stride equals the row size)
    pub fn packed(data: &'a [u8], width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let stride = width as usize * format.bytes_per_pixel();
        Self::new(data, width, height, stride, format)
    }

    /// View over an `image` RGB frame, as produced by the webcam capture
    pub fn from_rgb_image(image: &'a RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::packed(image.as_raw(), width, height, PixelFormat::Rgb8)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    // `new` guarantees every row below `height` lies inside `data`
    fn row(&self, y: u32) -> &'a [u8] {
        let start = y as usize * self.stride;
        let len = self.width as usize * self.format.bytes_per_pixel();
        &self.data[start..start + len]
    }

    /// RGB triple at (x, y), `None` outside the frame
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let px = &self.row(y)[x as usize * bpp..(x as usize + 1) * bpp];
        let [r, g, b] = self.format.rgb_offsets();
        Some([px[r], px[g], px[b]])
    }

    /// Copy into an owned RGB image, dropping alpha and row padding
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        let bpp = self.format.bytes_per_pixel();
        let [ro, go, bo] = self.format.rgb_offsets();
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 3);

        for y in 0..self.height {
            for px in self.row(y).chunks_exact(bpp) {
                out.extend_from_slice(&[px[ro], px[go], px[bo]]);
            }
        }

        RgbImage::from_raw(self.width, self.height, out).ok_or_else(|| {
            SegmentError::InvalidFrame(format!(
                "could not build {}x{} RGB image",
                self.width, self.height
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_dimensions() {
        let data = [0u8; 16];
        let err = PixelBuffer::packed(&data, 0, 4, PixelFormat::Bgra8).unwrap_err();
        assert!(matches!(err, SegmentError::InvalidFrame(_)));
    }

    #[test]
    fn rejects_short_buffer() {
        let data = [0u8; 15];
        assert!(PixelBuffer::packed(&data, 2, 2, PixelFormat::Bgra8).is_err());
        assert!(PixelBuffer::packed(&[0u8; 16], 2, 2, PixelFormat::Bgra8).is_ok());
    }

    #[test]
    fn rejects_stride_narrower_than_row() {
        let data = [0u8; 64];
        assert!(PixelBuffer::new(&data, 4, 2, 12, PixelFormat::Bgra8).is_err());
    }

    #[test]
    fn last_row_does_not_need_padding() {
        // 2 rows of 2 RGB pixels with a 10 byte stride: 10 + 6 bytes
        let data = [0u8; 16];
        assert!(PixelBuffer::new(&data, 2, 2, 10, PixelFormat::Rgb8).is_ok());
    }

    #[test]
    fn bgra_is_swizzled_to_rgb() {
        let data = [10u8, 20, 30, 255, 40, 50, 60, 255];
        let frame = PixelBuffer::packed(&data, 2, 1, PixelFormat::Bgra8).unwrap();
        assert_eq!(frame.rgb_at(0, 0), Some([30, 20, 10]));
        assert_eq!(frame.rgb_at(1, 0), Some([60, 50, 40]));
    }

    #[test]
    fn stride_padding_is_skipped() {
        // 1x2 RGBA frame, each row padded to 8 bytes
        let data = [1u8, 2, 3, 4, 99, 99, 99, 99, 5, 6, 7, 8];
        let frame = PixelBuffer::new(&data, 1, 2, 8, PixelFormat::Rgba8).unwrap();
        let rgb = frame.to_rgb_image().unwrap();
        assert_eq!(rgb.as_raw(), &vec![1, 2, 3, 5, 6, 7]);
    }

    #[test]
    fn wraps_rgb_image_without_copy() {
        let image = RgbImage::from_pixel(3, 2, image::Rgb([7, 8, 9]));
        let frame = PixelBuffer::from_rgb_image(&image).unwrap();
        assert_eq!(frame.dimensions(), (3, 2));
        assert_eq!(frame.stride(), 9);
        assert_eq!(frame.rgb_at(2, 1), Some([7, 8, 9]));
    }

    #[test]
    fn rejects_stride_that_overflows() {
        let data = [0u8; 16];
        let err = PixelBuffer::new(&data, 2, 2, usize::MAX, PixelFormat::Rgb8).unwrap_err();
        assert!(matches!(err, SegmentError::InvalidFrame(_)));

        // Wraps to a small requirement without checked arithmetic
        let err = PixelBuffer::new(&data, 1, 3, usize::MAX / 2 + 1, PixelFormat::Rgb8).unwrap_err();
        assert!(matches!(err, SegmentError::InvalidFrame(_)));
    }

    #[test]
    fn rgb_at_outside_frame_is_none() {
        let data = [0u8; 12];
        let frame = PixelBuffer::packed(&data, 2, 2, PixelFormat::Rgb8).unwrap();
        assert_eq!(frame.rgb_at(1, 1), Some([0, 0, 0]));
        assert_eq!(frame.rgb_at(2, 0), None);
        assert_eq!(frame.rgb_at(0, 2), None);
    }
}
