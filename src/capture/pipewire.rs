// PipeWire screen capture
// Requests a monitor stream through the XDG ScreenCast portal and keeps the
// latest frame in memory; sessions crop their region out of it.

use super::{
    CaptureBackend, CaptureError, CaptureRegion, CaptureSession, PixelFormat, PixelFrame,
};
use ashpd::desktop::screencast::{CursorMode, Screencast, SourceType};
use ashpd::desktop::PersistMode;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Latest full-screen frame delivered by the PipeWire thread
#[derive(Default)]
struct LatestFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    stride: usize,
    format: Option<PixelFormat>,
}

struct Shared {
    frame: Mutex<LatestFrame>,
    running: AtomicBool,
}

/// Screen capture through the ScreenCast portal
///
/// Only the first monitor stream the portal returns is captured, so every
/// region must use display 0.
pub struct PipewireCapture {
    shared: Arc<Shared>,
}

impl PipewireCapture {
    /// Ask the portal for a monitor stream and start receiving frames
    pub async fn start(fps: u32) -> Result<Self, CaptureError> {
        let screencast = Screencast::new()
            .await
            .map_err(|e| CaptureError::Unavailable(format!("screencast portal: {e}")))?;

        let session = screencast
            .create_session()
            .await
            .map_err(|e| CaptureError::Setup(format!("create session: {e}")))?;

        screencast
            .select_sources(
                &session,
                CursorMode::Hidden,
                SourceType::Monitor.into(),
                false,
                None,
                PersistMode::DoNot,
            )
            .await
            .map_err(|e| CaptureError::Setup(format!("select sources: {e}")))?;

        let response = screencast
            .start(&session, None)
            .await
            .map_err(|e| CaptureError::Setup(format!("start screencast: {e}")))?
            .response()
            .map_err(|e| CaptureError::Setup(format!("screencast response: {e}")))?;

        let node_id = response
            .streams()
            .first()
            .map(|s| s.pipe_wire_node_id())
            .ok_or_else(|| CaptureError::Unavailable("no streams returned".into()))?;
        info!(node_id, fps, "PipeWire screencast stream granted");

        let shared = Arc::new(Shared {
            frame: Mutex::new(LatestFrame::default()),
            running: AtomicBool::new(true),
        });

        // pipewire-rs drives its own main loop
        let thread_shared = shared.clone();
        std::thread::Builder::new()
            .name("pipewire-capture".into())
            .spawn(move || {
                if let Err(e) = run_stream(node_id, fps, &thread_shared) {
                    error!("PipeWire capture error: {e}");
                }
                thread_shared.running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| CaptureError::Setup(format!("spawn capture thread: {e}")))?;

        Ok(Self { shared })
    }
}

impl Drop for PipewireCapture {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }
}

impl CaptureBackend for PipewireCapture {
    fn name(&self) -> &str {
        "pipewire"
    }

    fn setup(&self, region: &CaptureRegion) -> Result<Box<dyn CaptureSession>, CaptureError> {
        if region.display != 0 {
            return Err(CaptureError::UnknownDisplay(region.display));
        }
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(CaptureError::Unavailable("capture stream stopped".into()));
        }
        Ok(Box::new(PipewireSession {
            shared: self.shared.clone(),
            region: *region,
            buffer: vec![0; region.width as usize * region.height as usize * 4],
            format: PixelFormat::Bgra,
        }))
    }
}

struct PipewireSession {
    shared: Arc<Shared>,
    region: CaptureRegion,
    buffer: Vec<u8>,
    format: PixelFormat,
}

impl CaptureSession for PipewireSession {
    fn sample(&mut self) -> Result<PixelFrame<'_>, CaptureError> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(CaptureError::Sample("capture stream stopped".into()));
        }

        let frame = self.shared.frame.lock();
        // No frame delivered yet: keep showing the previous crop (black at start)
        if let Some(format) = frame.format {
            let r = self.region;
            if r.x + r.width > frame.width || r.y + r.height > frame.height {
                return Err(CaptureError::Sample(format!(
                    "region {}x{}+{}+{} outside {}x{} screen",
                    r.width, r.height, r.x, r.y, frame.width, frame.height
                )));
            }

            let row_len = r.width as usize * 4;
            for row in 0..r.height as usize {
                let src = (r.y as usize + row) * frame.stride + r.x as usize * 4;
                let dst = row * row_len;
                let Some(src_row) = frame.data.get(src..src + row_len) else {
                    return Err(CaptureError::Malformed(format!(
                        "buffer of {} bytes too short for row {}",
                        frame.data.len(),
                        r.y as usize + row
                    )));
                };
                self.buffer[dst..dst + row_len].copy_from_slice(src_row);
            }
            self.format = format;
        }
        drop(frame);

        Ok(PixelFrame::packed(
            &self.buffer,
            self.region.width,
            self.region.height,
            self.format,
        ))
    }

    fn free(self: Box<Self>) -> Result<(), CaptureError> {
        debug!(region = ?self.region, "PipeWire session released");
        Ok(())
    }
}

/// Run the PipeWire main loop until the backend is dropped (blocking)
fn run_stream(node_id: u32, fps: u32, shared: &Arc<Shared>) -> Result<(), CaptureError> {
    use pipewire as pw;
    use pipewire::context::Context;
    use pipewire::main_loop::MainLoop;
    use pipewire::spa::utils::Direction;
    use pipewire::stream::{Stream, StreamFlags};
    use std::cell::Cell;
    use std::rc::Rc;

    let setup = |what: &str| {
        let what = what.to_string();
        move |e: pw::Error| CaptureError::Setup(format!("{what}: {e:?}"))
    };

    pipewire::init();

    let main_loop = MainLoop::new(None).map_err(setup("main loop"))?;
    let context = Context::new(&main_loop).map_err(setup("context"))?;
    let core = context.connect(None).map_err(setup("connect"))?;

    let props = pipewire::properties::properties! {
        *pipewire::keys::MEDIA_TYPE => "Video",
        *pipewire::keys::MEDIA_CATEGORY => "Capture",
        *pipewire::keys::MEDIA_ROLE => "Screen",
    };
    let stream = Stream::new(&core, "ambient-led-capture", props).map_err(setup("stream"))?;

    // Negotiated format, set from param_changed and read in process
    let negotiated: Rc<Cell<Option<(u32, u32, PixelFormat)>>> = Rc::new(Cell::new(None));
    let negotiated_param = negotiated.clone();
    let process_shared = shared.clone();

    let _listener = stream
        .add_local_listener_with_user_data(())
        .state_changed(|_, _, old, new| {
            debug!("PipeWire stream state {old:?} -> {new:?}");
        })
        .param_changed(move |_, _, id, pod| {
            use pipewire::spa::param::ParamType;
            if id != ParamType::Format.as_raw() {
                return;
            }
            if let Some(pod) = pod {
                match parse_video_format(pod) {
                    Some(format) => {
                        info!(width = format.0, height = format.1, "PipeWire format negotiated");
                        negotiated_param.set(Some(format));
                    }
                    None => warn!("Unsupported PipeWire video format"),
                }
            }
        })
        .process(move |stream, _| {
            let Some((width, height, format)) = negotiated.get() else {
                return;
            };
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };
            let datas = buffer.datas_mut();
            let Some(first) = datas.first_mut() else {
                return;
            };
            let stride = match first.chunk().stride() {
                s if s > 0 => s as usize,
                _ => width as usize * 4,
            };
            if let Some(data) = first.data() {
                let mut latest = process_shared.frame.lock();
                latest.data.clear();
                latest.data.extend_from_slice(data);
                latest.width = width;
                latest.height = height;
                latest.stride = stride;
                latest.format = Some(format);
            }
        })
        .register()
        .map_err(setup("listener"))?;

    let mut params_buffer = vec![0u8; 1024];
    let obj = pw::spa::pod::object!(
        pw::spa::utils::SpaTypes::ObjectParamFormat,
        pw::spa::param::ParamType::EnumFormat,
        pw::spa::pod::property!(
            pw::spa::param::format::FormatProperties::MediaType,
            Id,
            pw::spa::param::format::MediaType::Video
        ),
        pw::spa::pod::property!(
            pw::spa::param::format::FormatProperties::MediaSubtype,
            Id,
            pw::spa::param::format::MediaSubtype::Raw
        ),
        pw::spa::pod::property!(
            pw::spa::param::format::FormatProperties::VideoFormat,
            Choice,
            Enum,
            Id,
            pw::spa::param::video::VideoFormat::BGRx,
            pw::spa::param::video::VideoFormat::BGRx,
            pw::spa::param::video::VideoFormat::RGBx,
            pw::spa::param::video::VideoFormat::RGBA,
            pw::spa::param::video::VideoFormat::BGRA
        ),
        pw::spa::pod::property!(
            pw::spa::param::format::FormatProperties::VideoSize,
            Choice,
            Range,
            Rectangle,
            pw::spa::utils::Rectangle { width: 1920, height: 1080 },
            pw::spa::utils::Rectangle { width: 1, height: 1 },
            pw::spa::utils::Rectangle { width: 8192, height: 8192 }
        ),
        pw::spa::pod::property!(
            pw::spa::param::format::FormatProperties::VideoFramerate,
            Choice,
            Range,
            Fraction,
            pw::spa::utils::Fraction { num: fps, denom: 1 },
            pw::spa::utils::Fraction { num: 0, denom: 1 },
            pw::spa::utils::Fraction { num: 144, denom: 1 }
        )
    );

    let pod = pw::spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(&mut params_buffer),
        &pw::spa::pod::Value::Object(obj),
    )
    .map_err(|e| CaptureError::Setup(format!("serialize params: {e:?}")))?
    .0
    .into_inner();
    let pod = pw::spa::pod::Pod::from_bytes(&pod)
        .ok_or_else(|| CaptureError::Setup("invalid format pod".into()))?;

    stream
        .connect(
            Direction::Input,
            Some(node_id),
            StreamFlags::AUTOCONNECT | StreamFlags::MAP_BUFFERS,
            &mut [pod],
        )
        .map_err(setup("stream connect"))?;

    let loop_ = main_loop.loop_();
    while shared.running.load(Ordering::SeqCst) {
        let n_events = loop_.iterate(Duration::from_millis(50));
        if n_events < 0 {
            return Err(CaptureError::Sample(format!(
                "PipeWire iterate() returned {n_events}"
            )));
        }
    }
    Ok(())
}

/// Size and pixel layout from a SPA format pod
fn parse_video_format(pod: &pipewire::spa::pod::Pod) -> Option<(u32, u32, PixelFormat)> {
    use pipewire::spa::param::video::{VideoFormat, VideoInfoRaw};

    let mut info = VideoInfoRaw::new();
    info.parse(pod).ok()?;
    let size = info.size();
    if size.width == 0 || size.height == 0 {
        return None;
    }
    let format = match info.format() {
        VideoFormat::BGRx | VideoFormat::BGRA => PixelFormat::Bgra,
        VideoFormat::RGBx | VideoFormat::RGBA => PixelFormat::Rgba,
        _ => return None,
    };
    Some((size.width, size.height, format))
}
