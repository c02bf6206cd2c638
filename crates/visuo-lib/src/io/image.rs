use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, ImageBuffer, Luma, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::error::Result;
use crate::frame::Frame;

/// Read a grayscale acquisition. Color files are reduced to luma; float
/// TIFFs keep their values, integer formats keep raw counts.
pub fn load_frame(path: &Path) -> Result<Frame> {
    let img = image::open(path)?;
    let (width, height) = (img.width() as usize, img.height() as usize);
    let data: Vec<f32> = match img {
        DynamicImage::ImageLuma8(buf) => buf.into_raw().into_iter().map(f32::from).collect(),
        DynamicImage::ImageLuma16(buf) => buf.into_raw().into_iter().map(f32::from).collect(),
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => img.to_luma32f().into_raw(),
        other => other
            .to_luma16()
            .into_raw()
            .into_iter()
            .map(f32::from)
            .collect(),
    };
    Frame::from_vec(width, height, data)
}

/// Write a frame as 16-bit grayscale, clamping to the u16 range.
pub fn save_frame(frame: &Frame, path: &Path) -> Result<()> {
    let raw: Vec<u16> = frame
        .data
        .iter()
        .map(|&v| if v.is_finite() { v.round().clamp(0.0, 65535.0) as u16 } else { 0 })
        .collect();
    let buf: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_raw(frame.width as u32, frame.height as u32, raw).ok_or_else(|| {
            crate::Error::InputMalformed(format!("{}x{} frame buffer", frame.width, frame.height))
        })?;
    buf.save(path)?;
    Ok(())
}

pub fn save_rgb(img: &RgbImage, path: &Path) -> Result<()> {
    img.save(path)?;
    Ok(())
}

/// Looping GIF with a fixed per-frame delay.
pub fn save_gif(frames: &[RgbImage], delay_ms: u32, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut encoder = GifEncoder::new(BufWriter::new(file));
    encoder.set_repeat(Repeat::Infinite)?;
    for frame in frames {
        let rgba = DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
        let delay = Delay::from_numer_denom_ms(delay_ms, 1);
        encoder.encode_frame(image::Frame::from_parts(rgba, 0, 0, delay))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sixteen_bit_png_round_trips_counts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let frame = Frame::from_fn(5, 4, |x, y| (x * 1000 + y * 7) as f32);
        save_frame(&frame, &path).unwrap();
        let back = load_frame(&path).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn gif_is_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("anim.gif");
        let frames = vec![RgbImage::new(4, 4), RgbImage::from_pixel(4, 4, image::Rgb([255, 0, 0]))];
        save_gif(&frames, 500, &path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
