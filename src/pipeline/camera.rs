use anyhow::Result;

use crate::types::Frame;

/// A frame source owned exclusively by the capture worker.
///
/// Device handles are frequently not `Send`, so cameras are created on the
/// thread that uses them through a [`CameraSource`].
pub trait Camera {
    fn open(&mut self) -> Result<()>;
    /// Reads one frame. Errors are treated as transient by the worker.
    fn read(&mut self) -> Result<Frame>;
    fn close(&mut self);
}

pub trait CameraSource: Send + 'static {
    type Camera: Camera;

    fn create(&self) -> Self::Camera;

    fn describe(&self) -> String {
        "camera".to_string()
    }
}

#[cfg(feature = "camera-nokhwa")]
pub use self::native::{CameraDevice, NokhwaCamera, NokhwaSource, available_cameras};

#[cfg(feature = "camera-nokhwa")]
mod native {
    use anyhow::{Result, anyhow};
    use nokhwa::{
        Buffer,
        pixel_format::RgbFormat,
        query,
        utils::{
            ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat,
            RequestedFormatType,
        },
    };

    use super::{Camera, CameraSource};
    use crate::{
        pipeline::rgba_converter::{self, RawPixelFormat},
        types::Frame,
    };

    // Prefer pixel formats that are widely supported on macOS (the built-in cameras
    // often reject YUYV even though Nokhwa reports it).
    const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
        FrameFormat::RAWRGB,
        FrameFormat::RAWBGR,
        FrameFormat::GRAY,
        FrameFormat::YUYV,
        FrameFormat::NV12,
        FrameFormat::MJPEG,
    ];

    fn requested_formats() -> [RequestedFormat<'static>; 4] {
        [
            RequestedFormat::with_formats(
                RequestedFormatType::AbsoluteHighestFrameRate,
                PREFERRED_PIXEL_FORMATS,
            ),
            RequestedFormat::with_formats(
                RequestedFormatType::AbsoluteHighestResolution,
                PREFERRED_PIXEL_FORMATS,
            ),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
        ]
    }

    #[derive(Clone, Debug)]
    pub struct CameraDevice {
        pub index: u32,
        pub label: String,
    }

    pub fn available_cameras() -> Result<Vec<CameraDevice>> {
        let cameras = query(ApiBackend::Auto)?;
        Ok(cameras
            .into_iter()
            .filter_map(|info| {
                let index = info.index().as_index().ok()?;
                Some(CameraDevice {
                    index,
                    label: format_camera_label(&info),
                })
            })
            .collect())
    }

    fn format_camera_label(info: &CameraInfo) -> String {
        info.human_name()
    }

    #[derive(Clone, Debug)]
    pub struct NokhwaSource {
        pub index: u32,
        pub mirror: bool,
    }

    impl CameraSource for NokhwaSource {
        type Camera = NokhwaCamera;

        fn create(&self) -> NokhwaCamera {
            NokhwaCamera::new(self.index, self.mirror)
        }

        fn describe(&self) -> String {
            format!("camera #{}", self.index)
        }
    }

    pub struct NokhwaCamera {
        index: CameraIndex,
        mirror: bool,
        camera: Option<nokhwa::Camera>,
    }

    impl NokhwaCamera {
        pub fn new(index: u32, mirror: bool) -> Self {
            Self {
                index: CameraIndex::Index(index),
                mirror,
                camera: None,
            }
        }
    }

    fn build_camera(index: &CameraIndex) -> Result<nokhwa::Camera> {
        let mut last_err = None;

        for requested in requested_formats() {
            match nokhwa::Camera::new(index.clone(), requested) {
                Ok(mut camera) => match camera.open_stream() {
                    Ok(()) => return Ok(camera),
                    Err(err) => last_err = Some(err.into()),
                },
                Err(err) => last_err = Some(err.into()),
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
    }

    fn raw_format(format: FrameFormat) -> RawPixelFormat {
        match format {
            FrameFormat::NV12 => RawPixelFormat::Nv12,
            FrameFormat::YUYV => RawPixelFormat::Yuyv,
            FrameFormat::MJPEG => RawPixelFormat::Mjpeg,
            FrameFormat::RAWRGB => RawPixelFormat::Rgb,
            FrameFormat::RAWBGR => RawPixelFormat::Bgr,
            FrameFormat::GRAY => RawPixelFormat::Gray,
        }
    }

    fn convert(buffer: &Buffer, mirror: bool) -> Result<Frame> {
        let resolution = buffer.resolution();
        rgba_converter::convert_raw_frame(
            raw_format(buffer.source_frame_format()),
            buffer.buffer(),
            resolution.width_x,
            resolution.height_y,
            mirror,
        )
    }

    impl Camera for NokhwaCamera {
        fn open(&mut self) -> Result<()> {
            if self.camera.is_some() {
                return Ok(());
            }
            let camera = build_camera(&self.index)?;
            log::info!(
                "opened camera {} at {:?}",
                self.index,
                camera.camera_format()
            );
            self.camera = Some(camera);
            Ok(())
        }

        fn read(&mut self) -> Result<Frame> {
            let camera = self
                .camera
                .as_mut()
                .ok_or_else(|| anyhow!("camera {} is not open", self.index))?;
            let buffer = camera.frame()?;
            convert(&buffer, self.mirror)
        }

        fn close(&mut self) {
            if let Some(mut camera) = self.camera.take() {
                if let Err(err) = camera.stop_stream() {
                    log::warn!("failed to stop camera stream: {err:?}");
                }
            }
        }
    }
}
