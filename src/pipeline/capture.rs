use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError, bounded};
use thiserror::Error;

use super::{
    camera::{Camera, CameraSource},
    channel::{self, Eviction, LatestReceiver, LatestSender},
    landmarks::LandmarkSource,
    skeleton,
};
use crate::{
    action::ActionResolver,
    config::PipelineConfig,
    types::{AnnotatedFrame, Decision, Frame},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    /// The worker finished and released its devices.
    Joined,
    /// The worker missed the join deadline; it releases its devices when the
    /// current iteration ends.
    Detached,
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("{device} could not be opened: {cause:#}")]
    CameraUnavailable { device: String, cause: anyhow::Error },
    #[error("capture pipeline is already running")]
    AlreadyRunning,
    #[error("previous capture worker is still releasing its devices")]
    WorkerStillRunning,
    #[error("failed to spawn capture worker: {0}")]
    Spawn(#[from] std::io::Error),
}

struct Worker {
    stop: Arc<AtomicBool>,
    // Never sent on; disconnects once the worker thread has released everything.
    done_rx: Receiver<()>,
    handle: thread::JoinHandle<()>,
}

impl Worker {
    fn is_done(&self) -> bool {
        matches!(self.done_rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    fn join(self) {
        if self.handle.join().is_err() {
            log::error!("capture worker panicked");
        }
    }
}

/// Owns the capture worker and the consumer ends of both latest-value channels.
pub struct CapturePipeline {
    config: PipelineConfig,
    resolver: ActionResolver,
    state: PipelineState,
    decision_tx: LatestSender<Decision>,
    decision_rx: LatestReceiver<Decision>,
    frame_tx: LatestSender<AnnotatedFrame>,
    frame_rx: LatestReceiver<AnnotatedFrame>,
    worker: Option<Worker>,
    /// A worker that missed its stop deadline and still owns devices.
    lingering: Option<Worker>,
}

impl CapturePipeline {
    pub fn new(config: PipelineConfig, resolver: ActionResolver) -> Self {
        let (decision_tx, decision_rx) =
            channel::latest(config.decision_capacity, Eviction::OldestWhenFull);
        let (frame_tx, frame_rx) = channel::latest(config.frame_capacity, Eviction::All);

        Self {
            config,
            resolver,
            state: PipelineState::Idle,
            decision_tx,
            decision_rx,
            frame_tx,
            frame_rx,
            worker: None,
            lingering: None,
        }
    }

    /// `Stopping` while a detached worker has not yet released its devices.
    pub fn state(&self) -> PipelineState {
        match self.state {
            PipelineState::Idle if self.lingering.as_ref().is_some_and(|w| !w.is_done()) => {
                PipelineState::Stopping
            }
            state => state,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Spawns the capture worker and waits for it to open the camera. A
    /// camera that fails to open, or does not open within `open_timeout`, is
    /// reported here and leaves the pipeline idle.
    pub fn start<S, L>(&mut self, cameras: S, landmarks: L) -> Result<(), StartError>
    where
        S: CameraSource,
        L: LandmarkSource,
    {
        if self.worker.is_some() {
            return Err(StartError::AlreadyRunning);
        }
        if let Some(lingering) = self.lingering.take() {
            if !lingering.is_done() {
                self.lingering = Some(lingering);
                return Err(StartError::WorkerStillRunning);
            }
            lingering.join();
        }

        let device = cameras.describe();
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = bounded::<()>(0);
        let (opened_tx, opened_rx) = bounded::<anyhow::Result<()>>(1);
        let ctx = WorkerContext {
            stop: stop.clone(),
            resolver: self.resolver.clone(),
            decision_tx: self.decision_tx.clone(),
            frame_tx: self.frame_tx.clone(),
            read_retry: self.config.read_retry(),
        };

        let handle = thread::Builder::new()
            .name("capture-worker".to_string())
            .spawn(move || {
                let _done = done_tx;
                let mut landmarks = landmarks;
                let mut camera = cameras.create();
                if let Err(err) = camera.open() {
                    landmarks.release();
                    let _ = opened_tx.send(Err(err));
                    return;
                }
                let _ = opened_tx.send(Ok(()));

                let mut devices = WorkerDevices { camera, landmarks };
                run_capture_loop(&mut devices, &ctx);
            })?;
        let worker = Worker {
            stop,
            done_rx,
            handle,
        };

        let timeout = self.config.open_timeout();
        let cause = match opened_rx.recv_timeout(timeout) {
            Ok(Ok(())) => {
                log::info!(
                    "capture pipeline started on {device} (policy {:?})",
                    self.resolver.policy()
                );
                self.worker = Some(worker);
                self.state = PipelineState::Running;
                return Ok(());
            }
            Ok(Err(cause)) => {
                worker.join();
                cause
            }
            Err(RecvTimeoutError::Disconnected) => {
                worker.join();
                anyhow::anyhow!("capture worker exited before opening the camera")
            }
            Err(RecvTimeoutError::Timeout) => {
                worker.stop.store(true, Ordering::SeqCst);
                self.lingering = Some(worker);
                anyhow::anyhow!("camera did not open within {timeout:?}")
            }
        };

        log::error!("failed to open {device}: {cause:#}");
        self.state = PipelineState::Idle;
        Err(StartError::CameraUnavailable { device, cause })
    }

    /// Signals the worker and waits at most `join_timeout` for it to release
    /// the landmark model and the camera. Safe to call at any time.
    pub fn stop(&mut self) -> StopOutcome {
        let Some(worker) = self.worker.take() else {
            self.state = PipelineState::Idle;
            return StopOutcome::NotRunning;
        };

        self.state = PipelineState::Stopping;
        worker.stop.store(true, Ordering::SeqCst);

        let timeout = self.config.join_timeout();
        let outcome = match worker.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                worker.join();
                log::info!("capture pipeline stopped");
                StopOutcome::Joined
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("capture worker did not stop within {timeout:?}, detaching it");
                self.lingering = Some(worker);
                StopOutcome::Detached
            }
        };

        self.state = PipelineState::Idle;
        outcome
    }

    /// Newest decision published since the last poll, if any.
    pub fn latest_decision(&self) -> Option<Decision> {
        self.decision_rx.latest()
    }

    /// Newest annotated frame published since the last poll, if any.
    pub fn latest_frame(&self) -> Option<AnnotatedFrame> {
        self.frame_rx.latest()
    }

}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerContext {
    stop: Arc<AtomicBool>,
    resolver: ActionResolver,
    decision_tx: LatestSender<Decision>,
    frame_tx: LatestSender<AnnotatedFrame>,
    read_retry: Duration,
}

/// Releases the landmark model, then the camera, however the worker exits.
struct WorkerDevices<C: Camera, L: LandmarkSource> {
    camera: C,
    landmarks: L,
}

impl<C: Camera, L: LandmarkSource> Drop for WorkerDevices<C, L> {
    fn drop(&mut self) {
        self.landmarks.release();
        self.camera.close();
        log::debug!("capture devices released");
    }
}

fn run_capture_loop<C: Camera, L: LandmarkSource>(
    devices: &mut WorkerDevices<C, L>,
    ctx: &WorkerContext,
) {
    let started = Instant::now();
    let mut processed: u64 = 0;

    while !ctx.stop.load(Ordering::Relaxed) {
        let frame = match devices.camera.read() {
            Ok(frame) => frame,
            Err(err) => {
                log::debug!("camera frame read failed: {err:?}");
                thread::sleep(ctx.read_retry);
                continue;
            }
        };

        process_frame(frame, &mut devices.landmarks, ctx);
        processed += 1;
    }

    let elapsed = started.elapsed().as_secs_f32();
    log::info!(
        "capture worker exiting after {processed} frames ({:.1} fps)",
        if elapsed > 0.0 { processed as f32 / elapsed } else { 0.0 }
    );
}

fn process_frame<L: LandmarkSource>(mut frame: Frame, landmarks: &mut L, ctx: &WorkerContext) {
    let hands = match landmarks.detect(&frame) {
        Ok(result) => result.observations(),
        Err(err) => {
            log::debug!("landmark detection failed, treating as no hands: {err:?}");
            Vec::new()
        }
    };

    // A stopped worker may still be finishing a slow read or inference.
    if ctx.stop.load(Ordering::Relaxed) {
        return;
    }
    let decision = ctx.resolver.decide(&hands, frame.timestamp);
    let action = decision.action;
    ctx.decision_tx.publish(decision);

    let hands_drawn = skeleton::annotate(&mut frame, &hands);
    skeleton::draw_action_badge(&mut frame, action);
    if ctx.stop.load(Ordering::Relaxed) {
        return;
    }
    ctx.frame_tx.publish(AnnotatedFrame { frame, hands_drawn });
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use anyhow::{Result, anyhow};

    use super::*;
    use crate::{
        action::ConfidencePolicy,
        gesture::tests::{fist, hand_with_tips, open},
        pipeline::landmarks::LandmarkResult,
        types::{Action, HandObservation, Handedness},
    };

    #[derive(Default)]
    struct Log {
        events: Mutex<Vec<&'static str>>,
        opens: AtomicUsize,
        reads: AtomicUsize,
        detects: AtomicUsize,
    }

    impl Log {
        fn push(&self, event: &'static str) {
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().clone()
        }
    }

    struct FakeSource {
        log: Arc<Log>,
        openable: bool,
        /// Opens beyond this many fail, counted across every camera created.
        open_limit: Option<usize>,
        open_delay: Duration,
        fail_every: Option<usize>,
        read_delay: Duration,
    }

    impl FakeSource {
        fn new(log: &Arc<Log>) -> Self {
            Self {
                log: log.clone(),
                openable: true,
                open_limit: None,
                open_delay: Duration::ZERO,
                fail_every: None,
                read_delay: Duration::from_millis(1),
            }
        }
    }

    struct FakeCamera {
        log: Arc<Log>,
        openable: bool,
        open_limit: Option<usize>,
        open_delay: Duration,
        fail_every: Option<usize>,
        read_delay: Duration,
    }

    impl CameraSource for FakeSource {
        type Camera = FakeCamera;

        fn create(&self) -> FakeCamera {
            FakeCamera {
                log: self.log.clone(),
                openable: self.openable,
                open_limit: self.open_limit,
                open_delay: self.open_delay,
                fail_every: self.fail_every,
                read_delay: self.read_delay,
            }
        }
    }

    impl Camera for FakeCamera {
        fn open(&mut self) -> Result<()> {
            thread::sleep(self.open_delay);
            self.log.push("camera opened");
            let n = self.log.opens.fetch_add(1, Ordering::SeqCst) + 1;
            if self.openable && self.open_limit.is_none_or(|limit| n <= limit) {
                Ok(())
            } else {
                Err(anyhow!("no such device"))
            }
        }

        fn read(&mut self) -> Result<Frame> {
            thread::sleep(self.read_delay);
            let n = self.log.reads.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every.is_some_and(|every| n % every == 0) {
                return Err(anyhow!("transient read failure"));
            }
            Ok(Frame::blank(64, 48))
        }

        fn close(&mut self) {
            self.log.push("camera closed");
        }
    }

    struct FakeLandmarks {
        log: Arc<Log>,
        hands: Vec<HandObservation>,
        fail_every: Option<usize>,
    }

    impl FakeLandmarks {
        fn new(log: &Arc<Log>, hands: Vec<HandObservation>) -> Self {
            Self {
                log: log.clone(),
                hands,
                fail_every: None,
            }
        }
    }

    impl LandmarkSource for FakeLandmarks {
        fn detect(&mut self, _frame: &Frame) -> Result<LandmarkResult> {
            let n = self.log.detects.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every.is_some_and(|every| n % every == 0) {
                return Err(anyhow!("inference failed"));
            }
            Ok(LandmarkResult {
                hands: self.hands.iter().map(|h| h.landmarks.clone()).collect(),
                labels: self.hands.iter().map(|h| h.side).collect(),
            })
        }

        fn release(&mut self) {
            self.log.push("landmarks released");
        }
    }

    fn pipeline(join_timeout_ms: u64) -> CapturePipeline {
        let config = PipelineConfig {
            open_timeout_ms: 1_000,
            join_timeout_ms,
            read_retry_ms: 1,
            ..PipelineConfig::default()
        };
        CapturePipeline::new(config, ActionResolver::new(ConfidencePolicy::Fixed))
    }

    fn wait_for<T>(mut poll: impl FnMut() -> Option<T>) -> Option<T> {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if let Some(value) = poll() {
                return Some(value);
            }
            thread::sleep(Duration::from_millis(2));
        }
        None
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let mut pipeline = pipeline(100);
        assert_eq!(pipeline.stop(), StopOutcome::NotRunning);
        assert_eq!(pipeline.stop(), StopOutcome::NotRunning);
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(pipeline.latest_decision().is_none());
        assert!(pipeline.latest_frame().is_none());
    }

    #[test]
    fn unavailable_camera_is_reported_by_start() {
        let log = Arc::new(Log::default());
        let mut pipeline = pipeline(100);
        let mut source = FakeSource::new(&log);
        source.openable = false;

        let err = pipeline
            .start(source, FakeLandmarks::new(&log, vec![]))
            .unwrap_err();
        assert!(matches!(err, StartError::CameraUnavailable { .. }));
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(!pipeline.is_running());

        assert_eq!(log.reads.load(Ordering::SeqCst), 0);
        assert_eq!(log.events(), ["camera opened", "landmarks released"]);
        assert!(pipeline.latest_decision().is_none());
        assert_eq!(pipeline.stop(), StopOutcome::NotRunning);
    }

    #[test]
    fn camera_is_opened_once_per_start() {
        let log = Arc::new(Log::default());
        let mut pipeline = pipeline(1_000);
        let mut source = FakeSource::new(&log);
        source.open_limit = Some(1);
        pipeline
            .start(source, FakeLandmarks::new(&log, vec![]))
            .unwrap();
        assert_eq!(log.opens.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.stop(), StopOutcome::Joined);

        // The device is gone now; the second start must say so.
        let mut source = FakeSource::new(&log);
        source.open_limit = Some(1);
        let err = pipeline
            .start(source, FakeLandmarks::new(&log, vec![]))
            .unwrap_err();
        assert!(matches!(err, StartError::CameraUnavailable { .. }));
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(!pipeline.is_running());
    }

    #[test]
    fn slow_camera_open_times_out() {
        let log = Arc::new(Log::default());
        let config = PipelineConfig {
            open_timeout_ms: 20,
            join_timeout_ms: 20,
            read_retry_ms: 1,
            ..PipelineConfig::default()
        };
        let mut pipeline =
            CapturePipeline::new(config, ActionResolver::new(ConfidencePolicy::Fixed));
        let mut source = FakeSource::new(&log);
        source.open_delay = Duration::from_millis(200);

        let err = pipeline
            .start(source, FakeLandmarks::new(&log, vec![]))
            .unwrap_err();
        assert!(matches!(err, StartError::CameraUnavailable { .. }));
        assert_eq!(pipeline.state(), PipelineState::Stopping);
        assert!(matches!(
            pipeline.start(FakeSource::new(&log), FakeLandmarks::new(&log, vec![])),
            Err(StartError::WorkerStillRunning)
        ));

        wait_for(|| (pipeline.state() == PipelineState::Idle).then_some(()))
            .expect("late worker never finished");
        assert_eq!(log.reads.load(Ordering::SeqCst), 0);
        assert!(log.events().contains(&"landmarks released"));
    }

    #[test]
    fn publishes_decision_and_annotated_frame() {
        let log = Arc::new(Log::default());
        let mut pipeline = pipeline(1_000);
        let hands = vec![fist(Handedness::Left), fist(Handedness::Right)];
        pipeline
            .start(FakeSource::new(&log), FakeLandmarks::new(&log, hands))
            .unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);

        let decision = wait_for(|| pipeline.latest_decision()).expect("no decision");
        assert_eq!(decision.action, Action::Boxing);
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(decision.hands_present, 2);

        let frame = wait_for(|| pipeline.latest_frame()).expect("no frame");
        assert_eq!(frame.hands_drawn, 2);
        assert_eq!((frame.frame.width, frame.frame.height), (64, 48));

        assert_eq!(pipeline.stop(), StopOutcome::Joined);
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert_eq!(pipeline.stop(), StopOutcome::NotRunning);

        let events = log.events();
        let tail = &events[events.len() - 2..];
        assert_eq!(tail, ["landmarks released", "camera closed"]);
    }

    #[test]
    fn second_start_is_rejected_while_running() {
        let log = Arc::new(Log::default());
        let mut pipeline = pipeline(1_000);
        pipeline
            .start(FakeSource::new(&log), FakeLandmarks::new(&log, vec![]))
            .unwrap();
        let err = pipeline
            .start(FakeSource::new(&log), FakeLandmarks::new(&log, vec![]))
            .unwrap_err();
        assert!(matches!(err, StartError::AlreadyRunning));
        assert_eq!(pipeline.stop(), StopOutcome::Joined);
    }

    #[test]
    fn bad_frames_never_end_the_worker() {
        let log = Arc::new(Log::default());
        let mut pipeline = pipeline(1_000);
        let mut source = FakeSource::new(&log);
        source.fail_every = Some(2);
        let mut landmarks = FakeLandmarks::new(&log, vec![open(Handedness::Right)]);
        landmarks.fail_every = Some(3);
        pipeline.start(source, landmarks).unwrap();

        let mut actions = Vec::new();
        wait_for(|| {
            if let Some(decision) = pipeline.latest_decision() {
                actions.push(decision.action);
            }
            (log.detects.load(Ordering::SeqCst) >= 30).then_some(())
        })
        .expect("worker stalled");

        assert!(pipeline.is_running());
        assert!(actions.contains(&Action::KickRight));
        assert_eq!(pipeline.stop(), StopOutcome::Joined);
    }

    #[test]
    fn stop_is_bounded_when_worker_is_stuck() {
        let log = Arc::new(Log::default());
        let mut pipeline = pipeline(20);
        let mut source = FakeSource::new(&log);
        source.read_delay = Duration::from_millis(300);
        let hands = vec![fist(Handedness::Left), fist(Handedness::Right)];
        pipeline
            .start(source, FakeLandmarks::new(&log, hands))
            .unwrap();
        // Let the worker enter its first read.
        thread::sleep(Duration::from_millis(10));

        let started = Instant::now();
        assert_eq!(pipeline.stop(), StopOutcome::Detached);
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(pipeline.state(), PipelineState::Stopping);

        // No second producer while the first still holds the camera.
        assert!(matches!(
            pipeline.start(FakeSource::new(&log), FakeLandmarks::new(&log, vec![])),
            Err(StartError::WorkerStillRunning)
        ));
        assert_eq!(log.opens.load(Ordering::SeqCst), 1);

        // The detached worker releases its devices once the read returns,
        // without publishing the frame it was reading.
        wait_for(|| (pipeline.state() == PipelineState::Idle).then_some(()))
            .expect("devices never released");
        assert!(log.events().contains(&"landmarks released"));
        assert!(pipeline.latest_decision().is_none());
        assert!(pipeline.latest_frame().is_none());

        pipeline
            .start(FakeSource::new(&log), FakeLandmarks::new(&log, vec![]))
            .unwrap();
        let decision = wait_for(|| pipeline.latest_decision()).expect("no decision after restart");
        assert_eq!(decision.action, Action::Idle);
        assert_eq!(pipeline.stop(), StopOutcome::Joined);
    }

    #[test]
    fn channels_survive_restart() {
        let log = Arc::new(Log::default());
        let mut pipeline = pipeline(1_000);

        pipeline
            .start(FakeSource::new(&log), FakeLandmarks::new(&log, vec![]))
            .unwrap();
        let first = wait_for(|| pipeline.latest_decision()).expect("no decision");
        assert_eq!(first.action, Action::Idle);
        assert_eq!(first.confidence, 0.0);
        pipeline.stop();
        let _ = pipeline.latest_decision();

        let mixed = hand_with_tips([0.9, 0.1, 0.9, 0.1], Handedness::Left);
        pipeline
            .start(FakeSource::new(&log), FakeLandmarks::new(&log, vec![mixed]))
            .unwrap();
        let second = wait_for(|| pipeline.latest_decision()).expect("no decision after restart");
        assert_eq!(second.action, Action::Idle);
        assert_eq!(second.confidence, 0.3);
        pipeline.stop();
    }
}
