pub mod camera;
pub mod capture;
pub mod channel;
pub mod landmarks;
pub mod recognizer;
pub mod rgba_converter;
pub mod skeleton;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::{NokhwaSource, available_cameras};
pub use camera::CameraSource;
pub use capture::{CapturePipeline, StartError, StopOutcome};
pub use recognizer::OrtLandmarkSource;
