//! Frame types flowing through the pipeline.
//!
//! A [`Frame`] is one decoded source picture in RGB order; a [`MattedFrame`]
//! is the same picture after the matte backend attached an alpha channel.
//! Both carry their 0-based index, which stays contiguous and gap-free from
//! decode through storage.

use image::{Rgba, RgbImage, RgbaImage};

/// One decoded source frame, RGB channel order.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// 0-based position in the decoded sequence.
    pub index: u64,
    /// Pixel data in RGB order.
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// A frame with alpha; alpha 0 is fully transparent.
#[derive(Debug, Clone, PartialEq)]
pub struct MattedFrame {
    /// Index of the source frame this was produced from.
    pub index: u64,
    /// RGBA pixel data with the same dimensions as the source frame.
    pub image: RgbaImage,
}

impl MattedFrame {
    pub fn new(index: u64, image: RgbaImage) -> Self {
        Self { index, image }
    }

    /// A fully transparent frame, substituted when matting a frame fails
    /// under [`MattePolicy::TransparentPlaceholder`](crate::MattePolicy).
    pub fn transparent(index: u64, width: u32, height: u32) -> Self {
        Self {
            index,
            image: RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0])),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
