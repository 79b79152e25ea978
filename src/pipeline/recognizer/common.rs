use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Frame, Landmark, NUM_LANDMARKS};

pub const HANDPOSE_INPUT_SIZE: u32 = 224;
pub const PALM_INPUT_SIZE: u32 = 192;

#[derive(Clone, Debug)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

/// Maps handpose-crop pixel coordinates back onto the source frame.
#[derive(Clone, Debug)]
pub struct CropTransform {
    pub center: (f32, f32),
    pub side: f32,
    pub angle: f32,
    pub output_size: u32,
    pub orig_w: u32,
    pub orig_h: u32,
}

fn check_frame(frame: &Frame) -> Result<()> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.rgba.len() != expected_len {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.rgba.len(),
            expected_len
        ));
    }
    Ok(())
}

pub fn letterbox_geometry(width: u32, height: u32, target_size: u32) -> (u32, u32, LetterboxInfo) {
    let scale = target_size as f32 / (width.max(height).max(1) as f32);
    let new_w = (width as f32 * scale).round().max(1.0) as u32;
    let new_h = (height as f32 * scale).round().max(1.0) as u32;
    let pad_x = ((target_size as i64 - new_w as i64) / 2).max(0);
    let pad_y = ((target_size as i64 - new_h as i64) / 2).max(0);

    let info = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: width,
        orig_h: height,
    };
    (new_w, new_h, info)
}

/// Resizes the frame into a black square of `target_size` and returns an
/// NHWC tensor in [0, 1].
pub fn prepare_frame_with_size(
    frame: &Frame,
    target_size: u32,
) -> Result<(Array4<f32>, LetterboxInfo)> {
    check_frame(frame)?;
    let (new_w, new_h, letterbox) = letterbox_geometry(frame.width, frame.height, target_size);

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let size = target_size as usize;
    let (pad_x, pad_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    let mut canvas = vec![0u8; size * size * 4];
    for px in canvas.chunks_mut(4) {
        px[3] = 255;
    }
    let dst_stride = size * 4;
    let src_stride = new_w as usize * 4;
    for row in 0..(new_h as usize) {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 4;
        let src_offset = row * src_stride;
        canvas[dst_offset..dst_offset + src_stride]
            .copy_from_slice(&resized[src_offset..src_offset + src_stride]);
    }

    let normalized: Vec<f32> = canvas
        .par_chunks_exact(4)
        .flat_map_iter(|px| {
            [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ]
        })
        .collect();
    let input = Array4::<f32>::from_shape_vec((1, size, size, 3), normalized)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    Ok((input, letterbox))
}

pub fn prepare_rotated_crop(
    frame: &Frame,
    center: (f32, f32),
    side: f32,
    angle: f32,
    output_size: u32,
) -> Result<(Array4<f32>, CropTransform)> {
    check_frame(frame)?;
    let transform = CropTransform {
        center,
        side,
        angle,
        output_size,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    let size = output_size as usize;
    let data: Vec<f32> = (0..size * size)
        .into_par_iter()
        .flat_map_iter(|i| {
            let (x, y) = ((i % size) as f32 + 0.5, (i / size) as f32 + 0.5);
            let (src_x, src_y) = transform.unclamped(x, y);
            sample_rgb(frame, src_x, src_y)
        })
        .collect();

    let array = Array4::<f32>::from_shape_vec((1, size, size, 3), data)
        .map_err(|err| anyhow!("failed to build rotated crop tensor: {err}"))?;

    Ok((array, transform))
}

impl CropTransform {
    fn unclamped(&self, x: f32, y: f32) -> (f32, f32) {
        let half = self.output_size as f32 / 2.0;
        let scale = self.side / self.output_size as f32;
        let dx = (x - half) * scale;
        let dy = (y - half) * scale;
        let (sin, cos) = self.angle.sin_cos();
        (
            self.center.0 + dx * cos - dy * sin,
            self.center.1 + dx * sin + dy * cos,
        )
    }

    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        let (ox, oy) = self.unclamped(x, y);
        (
            ox.clamp(0.0, (self.orig_w.saturating_sub(1)) as f32),
            oy.clamp(0.0, (self.orig_h.saturating_sub(1)) as f32),
        )
    }

    /// Crop pixels to landmarks normalized against the source frame.
    pub fn normalize(&self, raw: &[[f32; 3]]) -> Vec<Landmark> {
        let (w, h) = (self.orig_w.max(1) as f32, self.orig_h.max(1) as f32);
        let depth_scale = self.side / self.output_size as f32 / w;
        raw.iter()
            .map(|[x, y, z]| {
                let (px, py) = self.project(*x, *y);
                Landmark::new(px / w, py / h, z * depth_scale)
            })
            .collect()
    }
}

pub fn decode_landmarks(flat: &[f32]) -> Result<Vec<[f32; 3]>> {
    if flat.len() < NUM_LANDMARKS * 3 {
        return Err(anyhow!(
            "unexpected landmarks length: got {}, need {}",
            flat.len(),
            NUM_LANDMARKS * 3
        ));
    }

    Ok(flat
        .chunks_exact(3)
        .take(NUM_LANDMARKS)
        .map(|chunk| [chunk[0], chunk[1], chunk[2]])
        .collect())
}

fn sample_rgb(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    if x.is_nan() || y.is_nan() {
        return [0.0, 0.0, 0.0];
    }
    let x0 = x.floor();
    let y0 = y.floor();

    let (w, h) = (frame.width as i32, frame.height as i32);
    let fetch = |cx: f32, cy: f32| -> [f32; 3] {
        let (ix, iy) = (cx as i32, cy as i32);
        if ix < 0 || iy < 0 || ix >= w || iy >= h {
            return [0.0, 0.0, 0.0];
        }
        let idx = ((iy as u32 * frame.width + ix as u32) as usize) * 4;
        match frame.rgba.get(idx..idx + 3) {
            Some(px) => [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ],
            None => [0.0, 0.0, 0.0],
        }
    };

    let fx = x - x0;
    let fy = y - y0;
    let c00 = fetch(x0, y0);
    let c10 = fetch(x0 + 1.0, y0);
    let c01 = fetch(x0, y0 + 1.0);
    let c11 = fetch(x0 + 1.0, y0 + 1.0);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    std::array::from_fn(|c| lerp(lerp(c00[c], c10[c], fx), lerp(c01[c], c11[c], fx), fy))
}
