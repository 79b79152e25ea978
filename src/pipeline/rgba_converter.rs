use std::convert::TryFrom;

use anyhow::{Result, anyhow};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

/// Layouts a camera driver may hand us. Everything is normalized to RGBA8.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawPixelFormat {
    Nv12,
    Yuyv,
    Mjpeg,
    Rgb,
    Bgr,
    Gray,
}

pub fn convert_raw_frame(
    format: RawPixelFormat,
    data: &[u8],
    width: u32,
    height: u32,
    mirror: bool,
) -> Result<Frame> {
    if width == 0 || height == 0 {
        return Err(anyhow!("camera frame has zero size {width}x{height}"));
    }

    let (mut rgba, width, height) = match format {
        RawPixelFormat::Nv12 => (nv12_to_rgba(data, width, height)?, width, height),
        RawPixelFormat::Yuyv => (yuyv_to_rgba(data, width, height)?, width, height),
        RawPixelFormat::Mjpeg => mjpeg_to_rgba(data, width, height)?,
        RawPixelFormat::Rgb => (rgb_like_to_rgba(data, width, height, false)?, width, height),
        RawPixelFormat::Bgr => (rgb_like_to_rgba(data, width, height, true)?, width, height),
        RawPixelFormat::Gray => (gray_to_rgba(data, width, height)?, width, height),
    };

    let expected_len = width as usize * height as usize * 4;
    if rgba.len() != expected_len {
        return Err(anyhow!(
            "converted frame is {} bytes, expected {expected_len} for {width}x{height}",
            rgba.len()
        ));
    }

    if mirror {
        mirror_horizontal(&mut rgba, width);
    }

    Ok(Frame::new(rgba, width, height))
}

/// Flips each row in place so the preview behaves like a mirror.
pub fn mirror_horizontal(rgba: &mut [u8], width: u32) {
    let stride = width as usize * 4;
    if stride == 0 {
        return;
    }
    rgba.par_chunks_exact_mut(stride).for_each(|row| {
        let pixels = width as usize;
        for x in 0..pixels / 2 {
            let (a, b) = (x * 4, (pixels - 1 - x) * 4);
            for c in 0..4 {
                row.swap(a + c, b + c);
            }
        }
    });
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_plane_len = width as usize * height as usize;
    let uv_plane_len = y_plane_len / 2;

    if data.len() < y_plane_len + uv_plane_len {
        return Err(anyhow!(
            "NV12 buffer too small: got {}, expected {}",
            data.len(),
            y_plane_len + uv_plane_len
        ));
    }

    let mut rgba = vec![0u8; y_plane_len * 4];
    let image = YuvBiPlanarImage {
        y_plane: &data[..y_plane_len],
        y_stride: width,
        uv_plane: &data[y_plane_len..y_plane_len + uv_plane_len],
        uv_stride: width,
        width,
        height,
    };

    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12 to RGBA failed: {err:?}"))?;

    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize * 2;
    if data.len() < expected_len {
        return Err(anyhow!(
            "YUYV buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }

    let mut rgba = vec![0u8; (width as usize * height as usize) * 4];
    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422 to RGBA failed: {err:?}"))?;

    Ok(rgba)
}

/// Decodes to RGBA and returns the encoded size, which wins over the size
/// the driver reported.
fn mjpeg_to_rgba(data: &[u8], width: u32, height: u32) -> Result<(Vec<u8>, u32, u32)> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;

    let (width, height) = match decoder.info() {
        Some(info) => (
            u32::try_from(info.width).map_err(|_| anyhow!("MJPEG width does not fit u32"))?,
            u32::try_from(info.height).map_err(|_| anyhow!("MJPEG height does not fit u32"))?,
        ),
        None => (width, height),
    };

    Ok((rgba, width, height))
}

fn rgb_like_to_rgba(data: &[u8], width: u32, height: u32, swap_rb: bool) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize * 3;
    if data.len() < expected_len {
        return Err(anyhow!(
            "RGB buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }

    let mut rgba = vec![0u8; (width as usize * height as usize) * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_chunks_exact(3))
        .for_each(|(dst, src)| {
            if swap_rb {
                dst[..3].copy_from_slice(&[src[2], src[1], src[0]]);
            } else {
                dst[..3].copy_from_slice(src);
            }
            dst[3] = 255;
        });

    Ok(rgba)
}

fn gray_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize;
    if data.len() < expected_len {
        return Err(anyhow!(
            "GRAY buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }

    let mut rgba = vec![0u8; expected_len * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_iter().copied())
        .for_each(|(dst, value)| {
            dst.copy_from_slice(&[value, value, value, 255]);
        });

    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_is_swapped_to_rgba() {
        let data = [10, 20, 30, 40, 50, 60];
        let frame = convert_raw_frame(RawPixelFormat::Bgr, &data, 2, 1, false).unwrap();
        assert_eq!(frame.rgba, vec![30, 20, 10, 255, 60, 50, 40, 255]);
    }

    #[test]
    fn mirror_flips_each_row() {
        let data = [1, 2, 3, 4, 5, 6];
        let frame = convert_raw_frame(RawPixelFormat::Gray, &data, 3, 2, true).unwrap();
        assert_eq!(frame.pixel(0, 0), Some([3, 3, 3, 255]));
        assert_eq!(frame.pixel(2, 0), Some([1, 1, 1, 255]));
        assert_eq!(frame.pixel(0, 1), Some([6, 6, 6, 255]));
        assert_eq!(frame.pixel(1, 1), Some([5, 5, 5, 255]));
    }

    fn encode_jpeg(width: u32, height: u32) -> Vec<u8> {
        let pixels = vec![128u8; width as usize * height as usize * 3];
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode(&pixels, width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        jpeg
    }

    #[test]
    fn mjpeg_frame_takes_its_encoded_size() {
        let jpeg = encode_jpeg(16, 8);
        for (reported_w, reported_h) in [(8, 8), (32, 16)] {
            let frame =
                convert_raw_frame(RawPixelFormat::Mjpeg, &jpeg, reported_w, reported_h, true)
                    .unwrap();
            assert_eq!((frame.width, frame.height), (16, 8));
            assert_eq!(frame.rgba.len(), 16 * 8 * 4);
        }
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(convert_raw_frame(RawPixelFormat::Rgb, &[0; 5], 2, 1, false).is_err());
        assert!(convert_raw_frame(RawPixelFormat::Yuyv, &[0; 3], 2, 1, false).is_err());
        assert!(convert_raw_frame(RawPixelFormat::Gray, &[], 0, 0, false).is_err());
    }
}
