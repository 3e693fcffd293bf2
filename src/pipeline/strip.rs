// Strip pipeline
// One update task per strip plus one sampling task per segment

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ambient_transport::BoxedConnector;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::color::ColorPipeline;
use super::scheduler::{Scheduler, Tick, TickOutcome};
use super::{FailureHook, PipelineError};
use crate::capture::{CaptureError, CaptureRegion, CaptureSession, SharedBackend};
use crate::color::SharedColors;
use crate::config::{Segment, StripConfig};
use crate::device::DeviceChannel;
use crate::sampler::sample_segment;

/// Pause and freeze state a strip starts in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StripFlags {
    pub paused: bool,
    pub frozen: bool,
}

/// Flags shared by every task of one strip, observed once per tick
#[derive(Debug, Default)]
pub struct StripControl {
    paused: AtomicBool,
    frozen: AtomicBool,
    closing: AtomicBool,
    failed: AtomicBool,
}

impl StripControl {
    pub fn new(flags: StripFlags) -> Self {
        Self {
            paused: AtomicBool::new(flags.paused),
            frozen: AtomicBool::new(flags.frozen),
            ..Self::default()
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    pub fn set_frozen(&self, frozen: bool) {
        self.frozen.store(frozen, Ordering::SeqCst);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Mark failed; true only for the first caller
    fn mark_failed(&self) -> bool {
        self.failed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Samples one segment into the strip's raw buffer
struct SegmentJob {
    label: String,
    segment: Segment,
    session: Box<dyn CaptureSession>,
    raw: Arc<SharedColors>,
    control: Arc<StripControl>,
    on_failure: FailureHook,
}

impl Tick for SegmentJob {
    fn tick(&mut self) -> TickOutcome {
        if self.control.is_closing() || self.control.is_failed() {
            return TickOutcome::Stop;
        }
        if self.control.is_paused() || self.control.is_frozen() {
            return TickOutcome::Continue;
        }

        let result = self
            .session
            .sample()
            .and_then(|frame| sample_segment(&frame, &self.segment, &self.raw));

        match result {
            Ok(()) => TickOutcome::Continue,
            Err(e) => {
                if self.control.mark_failed() {
                    error!(strip = %self.label, "Capture failed: {e}");
                    (self.on_failure)(&self.label, &e);
                }
                TickOutcome::Stop
            }
        }
    }
}

/// Smooths the raw buffer and streams it to the controller
struct UpdateJob {
    label: String,
    pipeline: ColorPipeline,
    channel: DeviceChannel,
    raw: Arc<SharedColors>,
    control: Arc<StripControl>,
    /// Channel already closed for the current pause
    blanked: bool,
}

impl Tick for UpdateJob {
    fn tick(&mut self) -> TickOutcome {
        if self.control.is_closing() {
            return TickOutcome::Stop;
        }

        if self.control.is_paused() {
            if !self.blanked {
                if let Err(e) = self.channel.close() {
                    warn!(strip = %self.label, "Closing paused channel: {e}");
                }
                self.blanked = true;
                debug!(strip = %self.label, "Paused");
            }
            return TickOutcome::Continue;
        }
        self.blanked = false;

        if !self.channel.is_connected() {
            let control = self.control.clone();
            if !self.channel.open(|| control.is_closing() || control.is_paused()) {
                return TickOutcome::Continue;
            }
        }

        let len = self.pipeline.len();
        let frame = self.pipeline.process(&self.raw);
        // A failed write leaves the channel faulted; the next tick reconnects
        let _ = self.channel.write(frame, 0, len);
        TickOutcome::Continue
    }
}

impl UpdateJob {
    fn finish(mut self) {
        if let Err(e) = self.channel.close() {
            warn!(strip = %self.label, "Closing channel: {e}");
        }
    }
}

/// A running strip: its buffers, capture sessions and scheduled tasks
pub struct StripPipeline {
    label: String,
    control: Arc<StripControl>,
    cancel: watch::Sender<bool>,
    segments: Vec<JoinHandle<Option<SegmentJob>>>,
    update: JoinHandle<Option<UpdateJob>>,
}

impl StripPipeline {
    /// Set up capture for every segment and schedule all tasks
    ///
    /// If a capture session cannot be set up, the sessions created so far are
    /// freed and nothing is scheduled. `flags` are in place before the first
    /// tick, so a strip opened paused never touches its controller.
    pub fn open(
        label: String,
        strip: &StripConfig,
        backend: &SharedBackend,
        connector: BoxedConnector,
        scheduler: &Scheduler,
        flags: StripFlags,
        on_failure: FailureHook,
    ) -> Result<Self, PipelineError> {
        let mut sessions = Vec::with_capacity(strip.segments.len());
        for (index, segment) in strip.segments.iter().enumerate() {
            match backend.setup(&CaptureRegion::from(segment)) {
                Ok(session) => sessions.push(session),
                Err(source) => {
                    free_sessions(&label, sessions);
                    return Err(PipelineError::Capture {
                        strip: label,
                        segment: index,
                        source,
                    });
                }
            }
        }

        let raw = Arc::new(SharedColors::new(strip.leds));
        let control = Arc::new(StripControl::new(flags));
        let (cancel, cancel_rx) = watch::channel(false);

        let segments = strip
            .segments
            .iter()
            .zip(sessions)
            .enumerate()
            .map(|(index, (segment, session))| {
                let job = SegmentJob {
                    label: label.clone(),
                    segment: segment.clone(),
                    session,
                    raw: raw.clone(),
                    control: control.clone(),
                    on_failure: on_failure.clone(),
                };
                scheduler.spawn_periodic(
                    format!("{label}/segment{index}"),
                    segment.period(),
                    job,
                    cancel_rx.clone(),
                )
            })
            .collect();

        let channel = DeviceChannel::new(connector, strip.leds);
        info!(
            strip = %label,
            address = %channel.address(),
            leds = strip.leds,
            segments = strip.segments.len(),
            ups = strip.ups,
            "Strip opened"
        );
        let update = UpdateJob {
            label: label.clone(),
            pipeline: ColorPipeline::for_strip(strip),
            channel,
            raw,
            control: control.clone(),
            blanked: flags.paused,
        };
        let update = scheduler.spawn_periodic(
            format!("{label}/update"),
            strip.period(),
            update,
            cancel_rx,
        );

        Ok(Self {
            label,
            control,
            cancel,
            segments,
            update,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn control(&self) -> &StripControl {
        &self.control
    }

    /// Cancel all tasks, wait for in-flight ticks, free capture sessions and
    /// blank the strip
    ///
    /// Teardown errors are logged and never stop the rest of the teardown.
    pub async fn close(self) {
        self.control.closing.store(true, Ordering::SeqCst);
        let _ = self.cancel.send(true);

        let mut sessions = Vec::with_capacity(self.segments.len());
        for handle in self.segments {
            match handle.await {
                Ok(Some(job)) => sessions.push(job.session),
                Ok(None) => warn!(strip = %self.label, "Segment task panicked, session lost"),
                Err(e) => warn!(strip = %self.label, "Segment task failed: {e}"),
            }
        }
        let update = match self.update.await {
            Ok(job) => job,
            Err(e) => {
                warn!(strip = %self.label, "Update task failed: {e}");
                None
            }
        };

        let label = self.label;
        let teardown = tokio::task::spawn_blocking(move || {
            free_sessions(&label, sessions);
            if let Some(update) = update {
                update.finish();
            }
            debug!(strip = %label, "Strip closed");
        });
        if let Err(e) = teardown.await {
            error!("Strip teardown panicked: {e}");
        }
    }
}

fn free_sessions(label: &str, sessions: Vec<Box<dyn CaptureSession>>) {
    for session in sessions {
        if let Err(e) = session.free() {
            warn!(strip = %label, "Freeing capture session: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureBackend, PixelFrame, StaticCapture};
    use crate::color::Color;
    use crate::config::InstanceConfig;
    use ambient_transport::{Connector, Link, TransportError};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Sink {
        frames: Mutex<Vec<Vec<u8>>>,
    }

    struct SinkLink(Arc<Sink>);

    impl Link for SinkLink {
        fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            self.0.frames.lock().push(frame.to_vec());
            Ok(())
        }

        fn close(self: Box<Self>) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct SinkConnector(Arc<Sink>);

    impl Connector for SinkConnector {
        fn connect(&mut self) -> Result<Box<dyn Link>, TransportError> {
            Ok(Box::new(SinkLink(self.0.clone())))
        }

        fn address(&self) -> &str {
            "sink"
        }
    }

    /// Backend whose sessions fail on the first sample
    struct Broken;

    struct BrokenSession;

    impl CaptureBackend for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn setup(&self, _: &CaptureRegion) -> Result<Box<dyn CaptureSession>, CaptureError> {
            Ok(Box::new(BrokenSession))
        }
    }

    impl CaptureSession for BrokenSession {
        fn sample(&mut self) -> Result<PixelFrame<'_>, CaptureError> {
            Err(CaptureError::Sample("display went away".into()))
        }

        fn free(self: Box<Self>) -> Result<(), CaptureError> {
            Ok(())
        }
    }

    fn strip() -> StripConfig {
        let json = r#"[{ "type": "pi", "ip": "127.0.0.1", "port": 1, "leds": 4,
            "ups": 100, "maxBrightness": 765, "lerp": 0.0,
            "segments": [{ "offset": 0, "length": 4, "x": 0, "y": 0,
                           "width": 8, "height": 2, "fps": 100, "orientation": true }] }]"#;
        InstanceConfig::load_from_json(json).unwrap().strips.remove(0)
    }

    fn no_failures() -> FailureHook {
        Arc::new(|label: &str, e: &CaptureError| panic!("{label}: unexpected failure {e}"))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_streams_captured_color() {
        let sink = Arc::new(Sink::default());
        let backend: SharedBackend = Arc::new(StaticCapture::new(Color::rgb(0, 40, 80)));
        let scheduler = Scheduler::current(4);

        let pipeline = StripPipeline::open(
            "test#0".into(),
            &strip(),
            &backend,
            Box::new(SinkConnector(sink.clone())),
            &scheduler,
            StripFlags::default(),
            no_failures(),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        pipeline.close().await;

        let frames = sink.frames.lock();
        let expected: Vec<u8> = [0, 40, 80].repeat(4);
        assert!(frames.iter().any(|f| *f == expected), "{frames:?}");
        // Last frame is the blanking frame
        assert_eq!(frames.last().unwrap(), &vec![0; 12]);
        assert_eq!(scheduler.active(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_capture_failure_reported_once() {
        let sink = Arc::new(Sink::default());
        let backend: SharedBackend = Arc::new(Broken);
        let scheduler = Scheduler::current(4);
        let reports = Arc::new(Mutex::new(Vec::new()));
        let hook_reports = reports.clone();
        let hook: FailureHook = Arc::new(move |label: &str, _: &CaptureError| {
            hook_reports.lock().push(label.to_string());
        });

        let pipeline = StripPipeline::open(
            "test#0".into(),
            &strip(),
            &backend,
            Box::new(SinkConnector(sink.clone())),
            &scheduler,
            StripFlags::default(),
            hook,
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pipeline.control().is_failed());
        pipeline.close().await;

        assert_eq!(*reports.lock(), vec!["test#0".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_opened_paused_stays_dark() {
        let sink = Arc::new(Sink::default());
        let backend: SharedBackend = Arc::new(StaticCapture::new(Color::rgb(200, 0, 0)));
        let scheduler = Scheduler::current(4);

        let pipeline = StripPipeline::open(
            "test#0".into(),
            &strip(),
            &backend,
            Box::new(SinkConnector(sink.clone())),
            &scheduler,
            StripFlags {
                paused: true,
                frozen: false,
            },
            no_failures(),
        )
        .unwrap();
        assert!(pipeline.control().is_paused());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(sink.frames.lock().is_empty());

        // Never connected, so closing has nothing to blank
        pipeline.close().await;
        assert!(sink.frames.lock().is_empty());
    }
}
