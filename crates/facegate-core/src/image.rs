//! Owned image buffers, grayscale conversion, resizing and face crops.

use crate::types::BoundingBox;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("image has zero width or height")]
    Empty,
    #[error("pixel buffer length mismatch: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image codec: {0}")]
    Codec(#[from] ::image::ImageError),
}

/// Channel layout of a [`RawImage`]. All layouts are 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Gray,
    Rgb,
    /// Blue-green-red ordering, as delivered by most capture stacks.
    Bgr,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Gray => 1,
            PixelLayout::Rgb | PixelLayout::Bgr => 3,
        }
    }
}

/// A captured frame, row-major and tightly packed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
    layout: PixelLayout,
}

impl RawImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::Empty);
        }
        let expected = width as usize * height as usize * layout.channels();
        if data.len() != expected {
            return Err(ImageError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            layout,
        })
    }

    /// Decode an image file (any format the `image` crate supports) as RGB.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let rgb = ::image::open(path)?.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::new(rgb.into_raw(), width, height, PixelLayout::Rgb)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Single-channel intensity using BT.601 luma weights.
    ///
    /// Weights are 14-bit fixed point (0.299, 0.587, 0.114) with rounding.
    pub fn to_grayscale(&self) -> Vec<u8> {
        const R_W: u32 = 4899;
        const G_W: u32 = 9617;
        const B_W: u32 = 1868;
        const ROUND: u32 = 1 << 13;

        let luma = |r: u8, g: u8, b: u8| -> u8 {
            ((r as u32 * R_W + g as u32 * G_W + b as u32 * B_W + ROUND) >> 14) as u8
        };

        match self.layout {
            PixelLayout::Gray => self.data.clone(),
            PixelLayout::Rgb => self
                .data
                .chunks_exact(3)
                .map(|px| luma(px[0], px[1], px[2]))
                .collect(),
            PixelLayout::Bgr => self
                .data
                .chunks_exact(3)
                .map(|px| luma(px[2], px[1], px[0]))
                .collect(),
        }
    }
}

/// A face crop: where it came from plus an owned copy of its grayscale pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRegion {
    pub bbox: BoundingBox,
    pixels: Vec<u8>,
}

impl FaceRegion {
    /// Copy `bbox` out of a `width`×`height` grayscale buffer.
    ///
    /// Returns `None` if the box is empty or extends past the image.
    pub fn crop(gray: &[u8], width: u32, height: u32, bbox: BoundingBox) -> Option<Self> {
        if !bbox.fits_within(width, height) || gray.len() < width as usize * height as usize {
            return None;
        }

        let w = width as usize;
        let mut pixels = Vec::with_capacity(bbox.area() as usize);
        for row in bbox.y as usize..(bbox.y + bbox.height) as usize {
            let start = row * w + bbox.x as usize;
            pixels.extend_from_slice(&gray[start..start + bbox.width as usize]);
        }

        Some(Self { bbox, pixels })
    }

    pub fn width(&self) -> u32 {
        self.bbox.width
    }

    pub fn height(&self) -> u32 {
        self.bbox.height
    }

    /// Grayscale pixels, `width * height` bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Interleaved RGB with the intensity replicated into every channel.
    pub fn to_rgb(&self) -> Vec<u8> {
        self.pixels.iter().flat_map(|&p| [p, p, p]).collect()
    }

    /// Encode the crop as a grayscale PNG.
    pub fn encode_png(&self) -> Result<Vec<u8>, ImageError> {
        let buffer = ::image::GrayImage::from_raw(self.bbox.width, self.bbox.height, self.pixels.clone())
            .ok_or(ImageError::InvalidLength {
                expected: self.bbox.area() as usize,
                actual: self.pixels.len(),
            })?;
        let mut out = Cursor::new(Vec::new());
        buffer.write_to(&mut out, ::image::ImageFormat::Png)?;
        Ok(out.into_inner())
    }
}

/// Bilinear resize of a grayscale buffer (half-pixel centres).
pub fn resize_bilinear(src: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let mut resized = vec![0u8; new_w * new_h];
    if width == 0 || height == 0 || new_w == 0 || new_h == 0 {
        return resized;
    }

    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * width + x0] as f32;
            let tr = src[y0 * width + x1] as f32;
            let bl = src[y1 * width + x0] as f32;
            let br = src[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            resized[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    resized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_length() {
        assert!(RawImage::new(vec![0; 12], 2, 2, PixelLayout::Rgb).is_ok());
        assert!(matches!(
            RawImage::new(vec![0; 11], 2, 2, PixelLayout::Rgb),
            Err(ImageError::InvalidLength { expected: 12, actual: 11 })
        ));
        assert!(matches!(
            RawImage::new(vec![], 0, 2, PixelLayout::Gray),
            Err(ImageError::Empty)
        ));
    }

    #[test]
    fn test_grayscale_weights() {
        // pure red, green, blue, white
        let rgb = RawImage::new(
            vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255],
            4,
            1,
            PixelLayout::Rgb,
        )
        .unwrap();
        assert_eq!(rgb.to_grayscale(), vec![76, 150, 29, 255]);
    }

    #[test]
    fn test_bgr_swaps_channels() {
        let bgr = RawImage::new(vec![0, 0, 255], 1, 1, PixelLayout::Bgr).unwrap();
        let rgb = RawImage::new(vec![255, 0, 0], 1, 1, PixelLayout::Rgb).unwrap();
        assert_eq!(bgr.to_grayscale(), rgb.to_grayscale());
    }

    #[test]
    fn test_gray_passthrough() {
        let gray = RawImage::new(vec![1, 2, 3, 4], 2, 2, PixelLayout::Gray).unwrap();
        assert_eq!(gray.to_grayscale(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_crop_copies_region() {
        // 4x3 image with value = index
        let gray: Vec<u8> = (0..12).collect();
        let bbox = BoundingBox { x: 1, y: 1, width: 2, height: 2 };
        let region = FaceRegion::crop(&gray, 4, 3, bbox).unwrap();
        assert_eq!(region.pixels(), &[5, 6, 9, 10]);
        assert_eq!(region.to_rgb(), vec![5, 5, 5, 6, 6, 6, 9, 9, 9, 10, 10, 10]);
    }

    #[test]
    fn test_crop_rejects_out_of_bounds() {
        let gray = vec![0u8; 16];
        assert!(FaceRegion::crop(&gray, 4, 4, BoundingBox { x: 2, y: 0, width: 3, height: 2 }).is_none());
        assert!(FaceRegion::crop(&gray, 4, 4, BoundingBox { x: 0, y: 0, width: 0, height: 2 }).is_none());
    }

    #[test]
    fn test_encode_png_decodes_back() {
        let gray: Vec<u8> = (0..64).map(|i| (i * 4) as u8).collect();
        let region = FaceRegion::crop(&gray, 8, 8, BoundingBox { x: 0, y: 0, width: 8, height: 8 }).unwrap();
        let png = region.encode_png().unwrap();
        let decoded = ::image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (8, 8));
        assert_eq!(decoded.into_raw(), gray);
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let frame = vec![128u8; 100 * 100];
        let resized = resize_bilinear(&frame, 100, 100, 77, 77);
        assert_eq!(resized.len(), 77 * 77);
        assert!(resized.iter().all(|&p| p == 128));
    }

    #[test]
    fn test_resize_identity() {
        let frame: Vec<u8> = (0..25).map(|i| i * 10).collect();
        assert_eq!(resize_bilinear(&frame, 5, 5, 5, 5), frame);
    }
}
