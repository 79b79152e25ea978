use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

const MODEL_DIR: &str = "models";
const MODEL_BASE_URL: &str =
    "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    HandposeEstimator,
    PalmDetector,
}

impl ModelKind {
    pub fn label(self) -> &'static str {
        match self {
            ModelKind::HandposeEstimator => "handpose estimator",
            ModelKind::PalmDetector => "palm detector",
        }
    }

    pub fn filename(self) -> &'static str {
        match self {
            ModelKind::HandposeEstimator => "handpose_estimation_mediapipe_2023feb.onnx",
            ModelKind::PalmDetector => "palm_detection_mediapipe_2023feb.onnx",
        }
    }

    pub fn url(self) -> String {
        format!("{MODEL_BASE_URL}/{}", self.filename())
    }

    pub fn default_path(self) -> PathBuf {
        PathBuf::from(MODEL_DIR).join(self.filename())
    }
}

pub fn default_handpose_estimator_model_path() -> PathBuf {
    ModelKind::HandposeEstimator.default_path()
}

pub fn default_palm_detector_model_path() -> PathBuf {
    ModelKind::PalmDetector.default_path()
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModelDownloadEvent {
    AlreadyPresent {
        model: ModelKind,
    },
    Started {
        model: ModelKind,
        total: Option<u64>,
    },
    Progress {
        model: ModelKind,
        downloaded: u64,
        total: Option<u64>,
    },
    Finished {
        model: ModelKind,
    },
}

/// Makes sure `model_path` holds the model, downloading it when absent.
pub fn ensure_model_ready<F>(model: ModelKind, model_path: &Path, mut on_event: F) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    if model_path.exists() {
        on_event(ModelDownloadEvent::AlreadyPresent { model });
        on_event(ModelDownloadEvent::Finished { model });
        return Ok(());
    }

    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create model directory {}", parent.display()))?;
    }

    let mut progress: Option<ProgressBar> = None;
    download_to_path(model, &model.url(), model_path, &mut |event| {
        match &event {
            ModelDownloadEvent::Started { total, .. } => {
                progress = Some(create_progress_bar(*total));
            }
            ModelDownloadEvent::Progress { downloaded, .. } => {
                if let Some(pb) = progress.as_ref() {
                    pb.set_position(*downloaded);
                }
            }
            ModelDownloadEvent::Finished { model } => {
                if let Some(pb) = progress.take() {
                    pb.finish_with_message(format!("{} model ready", model.label()));
                }
            }
            ModelDownloadEvent::AlreadyPresent { .. } => {}
        }
        on_event(event);
    })
    .with_context(|| {
        format!(
            "failed to download {} model to {}",
            model.label(),
            model_path.display()
        )
    })
}

fn download_to_path<F>(
    model: ModelKind,
    url: &str,
    dest: &Path,
    on_event: &mut F,
) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    log::info!(
        "downloading {} model from {url} to {}",
        model.label(),
        dest.display()
    );

    let client = Client::new();
    let mut response = client
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let total_size = response.content_length();
    on_event(ModelDownloadEvent::Started {
        model,
        total: total_size,
    });

    let tmp_path = dest.with_extension("download");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 16 * 1024];
    loop {
        let bytes_read = response
            .read(&mut buffer)
            .context("failed while reading model bytes")?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read])
            .context("failed while writing model to disk")?;
        downloaded += bytes_read as u64;
        on_event(ModelDownloadEvent::Progress {
            model,
            downloaded,
            total: total_size,
        });
    }

    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move temp model {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    on_event(ModelDownloadEvent::Finished { model });
    Ok(())
}

fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} downloading model") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_live_under_models() {
        assert_eq!(
            default_palm_detector_model_path(),
            Path::new("models/palm_detection_mediapipe_2023feb.onnx")
        );
        assert!(ModelKind::HandposeEstimator.url().ends_with("/handpose_estimation_mediapipe_2023feb.onnx"));
    }

    #[test]
    fn present_model_is_not_downloaded() {
        let dir = std::env::temp_dir().join(format!("gesture-robot-models-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(ModelKind::PalmDetector.filename());
        fs::write(&path, b"onnx").unwrap();

        let mut events = Vec::new();
        ensure_model_ready(ModelKind::PalmDetector, &path, |event| events.push(event)).unwrap();
        assert_eq!(
            events,
            vec![
                ModelDownloadEvent::AlreadyPresent {
                    model: ModelKind::PalmDetector
                },
                ModelDownloadEvent::Finished {
                    model: ModelKind::PalmDetector
                },
            ]
        );
        fs::remove_dir_all(&dir).unwrap();
    }
}
