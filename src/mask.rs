//! Segmentation masks and their visualisation

use crate::error::{Result, SegmentError};
use image::{imageops, GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};

/// Class names of the 21-class PASCAL VOC label set DeepLab is trained on
pub const PASCAL_VOC_CLASSES: [&str; 21] = [
    "background",
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tvmonitor",
];

/// Label of the background class
pub const BACKGROUND: u8 = 0;

/// Per-cell class labels, row-major, one byte per cell
///
/// Owned by whoever called `process`; the segmenter keeps no reference to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    width: u32,
    height: u32,
    labels: Vec<u8>,
}

impl SegmentationMask {
    pub fn new(width: u32, height: u32, labels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if labels.len() != expected {
            return Err(SegmentError::Inference(format!(
                "mask of {}x{} needs {} labels, got {}",
                width,
                height,
                expected,
                labels.len()
            )));
        }

        Ok(Self {
            width,
            height,
            labels,
        })
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

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.labels
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.labels
    }

    pub fn label_at(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.labels.get((y * self.width + x) as usize).copied()
    }

    /// Number of cells per label, indexed by label
    pub fn class_counts(&self) -> [usize; 256] {
        let mut counts = [0usize; 256];
        for &label in &self.labels {
            counts[label as usize] += 1;
        }
        counts
    }

    /// Fraction of cells labelled `class`
    pub fn coverage(&self, class: u8) -> f32 {
        if self.labels.is_empty() {
            return 0.0;
        }
        let hits = self.labels.iter().filter(|&&l| l == class).count();
        hits as f32 / self.labels.len() as f32
    }

    /// Nearest-neighbour rescale; labels are never blended
    pub fn resized(&self, width: u32, height: u32) -> Result<Self> {
        if (width, height) == self.dimensions() {
            return Ok(self.clone());
        }
        if width == 0 || height == 0 {
            return Err(SegmentError::InvalidFrame(format!(
                "cannot resize mask to {}x{}",
                width, height
            )));
        }

        let resized = imageops::resize(
            &self.to_gray_image(),
            width,
            height,
            imageops::FilterType::Nearest,
        );
        Self::new(width, height, resized.into_raw())
    }

    /// Raw labels as a grayscale image (useful for saving to PNG)
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([self.labels[(y * self.width + x) as usize]])
        })
    }

    /// Colour the mask with `palette` as premultiplied RGBA
    ///
    /// `mirror` flips the overlay horizontally, for rear cameras whose preview
    /// is not mirrored.
    pub fn to_overlay(&self, palette: &Palette, mirror: bool) -> RgbaImage {
        let overlay = RgbaImage::from_fn(self.width, self.height, |x, y| {
            let label = self.labels[(y * self.width + x) as usize];
            palette.premultiplied(label)
        });

        if mirror {
            imageops::flip_horizontal(&overlay)
        } else {
            overlay
        }
    }
}

/// Per-class RGBA colours used to draw masks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<Rgba<u8>>,
}

impl Palette {
    pub fn new(colors: Vec<Rgba<u8>>) -> Self {
        Self { colors }
    }

    /// PASCAL VOC colour map, background transparent, classes at `alpha`
    pub fn pascal_voc(alpha: u8) -> Self {
        let colors = (0..PASCAL_VOC_CLASSES.len())
            .map(|class| {
                let [r, g, b] = voc_color(class as u8);
                let a = if class == BACKGROUND as usize { 0 } else { alpha };
                Rgba([r, g, b, a])
            })
            .collect();
        Self { colors }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Colour for `label`; labels past the end of the palette are transparent
    pub fn color(&self, label: u8) -> Rgba<u8> {
        self.colors
            .get(label as usize)
            .copied()
            .unwrap_or(Rgba([0, 0, 0, 0]))
    }

    fn premultiplied(&self, label: u8) -> Rgba<u8> {
        let Rgba([r, g, b, a]) = self.color(label);
        let mul = |c: u8| ((c as u16 * a as u16 + 127) / 255) as u8;
        Rgba([mul(r), mul(g), mul(b), a])
    }
}

impl Default for Palette {
    fn default() -> Self {
        Palette::pascal_voc(160)
    }
}

/// Bit-interleaved PASCAL VOC colour for `label`
fn voc_color(label: u8) -> [u8; 3] {
    let (mut r, mut g, mut b) = (0u8, 0u8, 0u8);
    let mut c = label;
    for shift in (0..8).rev() {
        r |= (c & 1) << shift;
        g |= ((c >> 1) & 1) << shift;
        b |= ((c >> 2) & 1) << shift;
        c >>= 3;
    }
    [r, g, b]
}

/// Blend a premultiplied overlay on top of `frame`, scaling it to fit
pub fn composite(frame: &RgbImage, overlay: &RgbaImage) -> RgbImage {
    let _span = tracing::debug_span!("composite").entered();

    let (width, height) = frame.dimensions();
    let overlay = if overlay.dimensions() != (width, height) {
        imageops::resize(overlay, width, height, imageops::FilterType::Nearest)
    } else {
        overlay.clone()
    };

    RgbImage::from_fn(width, height, |x, y| {
        let Rgb(src) = *frame.get_pixel(x, y);
        let Rgba([r, g, b, a]) = *overlay.get_pixel(x, y);
        let keep = 255 - a as u16;
        let over = |s: u8, c: u8| {
            let v = (s as u16 * keep + 127) / 255 + c as u16;
            v.min(255) as u8
        };
        Rgb([over(src[0], r), over(src[1], g), over(src[2], b)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_2x2() -> SegmentationMask {
        SegmentationMask::new(2, 2, vec![0, 15, 15, 7]).unwrap()
    }

    #[test]
    fn new_checks_label_count() {
        assert!(SegmentationMask::new(2, 2, vec![0; 3]).is_err());
    }

    #[test]
    fn label_lookup_is_row_major() {
        let mask = mask_2x2();
        assert_eq!(mask.label_at(1, 0), Some(15));
        assert_eq!(mask.label_at(1, 1), Some(7));
        assert_eq!(mask.label_at(2, 0), None);
    }

    #[test]
    fn counts_and_coverage() {
        let mask = mask_2x2();
        let counts = mask.class_counts();
        assert_eq!(counts[15], 2);
        assert_eq!(counts[0], 1);
        assert!((mask.coverage(15) - 0.5).abs() < f32::EPSILON);
        assert_eq!(mask.coverage(3), 0.0);
    }

    #[test]
    fn resize_keeps_labels_crisp() {
        let mask = mask_2x2().resized(4, 4).unwrap();
        assert_eq!(mask.dimensions(), (4, 4));
        for &label in mask.as_bytes() {
            assert!([0, 7, 15].contains(&label));
        }
        assert_eq!(mask.label_at(0, 0), Some(0));
        assert_eq!(mask.label_at(3, 3), Some(7));
    }

    #[test]
    fn voc_colors_match_reference_map() {
        assert_eq!(voc_color(0), [0, 0, 0]);
        assert_eq!(voc_color(1), [128, 0, 0]);
        assert_eq!(voc_color(2), [0, 128, 0]);
        assert_eq!(voc_color(15), [192, 128, 128]);
    }

    #[test]
    fn background_is_transparent() {
        let palette = Palette::pascal_voc(200);
        assert_eq!(palette.len(), 21);
        assert_eq!(palette.color(BACKGROUND)[3], 0);
        assert_eq!(palette.color(15)[3], 200);
        assert_eq!(palette.color(250), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn overlay_is_premultiplied_and_mirrorable() {
        let palette = Palette::new(vec![Rgba([0, 0, 0, 0]), Rgba([255, 0, 0, 128])]);
        let mask = SegmentationMask::new(2, 1, vec![1, 0]).unwrap();

        let overlay = mask.to_overlay(&palette, false);
        assert_eq!(*overlay.get_pixel(0, 0), Rgba([128, 0, 0, 128]));
        assert_eq!(*overlay.get_pixel(1, 0), Rgba([0, 0, 0, 0]));

        let mirrored = mask.to_overlay(&palette, true);
        assert_eq!(*mirrored.get_pixel(1, 0), Rgba([128, 0, 0, 128]));
    }

    #[test]
    fn composite_leaves_transparent_pixels_untouched() {
        let frame = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        let overlay = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0]));
        assert_eq!(composite(&frame, &overlay), frame);
    }

    #[test]
    fn composite_opaque_overlay_replaces_frame() {
        let frame = RgbImage::from_pixel(2, 2, Rgb([10, 20, 30]));
        let overlay = RgbaImage::from_pixel(2, 2, Rgba([200, 100, 50, 255]));
        let out = composite(&frame, &overlay);
        assert_eq!(*out.get_pixel(1, 1), Rgb([200, 100, 50]));
    }
}
