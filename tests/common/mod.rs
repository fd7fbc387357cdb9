#![allow(dead_code)]

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cctv_monitor::{
    ActiveRecorder, Alert, CameraSource, CameraStream, CaptureConstraints, Classifier,
    MediaRecorder, RawDetection, RecorderSpec, RecordingBlob, RecordingMeta, RecordingSink,
    RemoteState, SessionService, UploadReceipt,
};

pub fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub struct FakeStream {
    native: Option<(u32, u32)>,
    native_from: Instant,
    frame: Option<Arc<RgbImage>>,
    live: AtomicBool,
    pub releases: AtomicUsize,
    pub stop_calls: AtomicUsize,
}

impl FakeStream {
    pub fn new(native: Option<(u32, u32)>) -> Arc<Self> {
        Self::reporting_after(native, Duration::ZERO)
    }

    /// Stream that only reports its size once `delay` has passed.
    pub fn reporting_after(native: Option<(u32, u32)>, delay: Duration) -> Arc<Self> {
        let frame = native.map(|(w, h)| Arc::new(RgbImage::from_pixel(w, h, Rgb([40, 40, 40]))));
        Arc::new(Self {
            native,
            native_from: Instant::now() + delay,
            frame,
            live: AtomicBool::new(true),
            releases: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
        })
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl CameraStream for FakeStream {
    fn label(&self) -> &str {
        "fake"
    }

    fn native_size(&self) -> Option<(u32, u32)> {
        if Instant::now() < self.native_from {
            return None;
        }
        self.native
    }

    fn current_frame(&self) -> Option<Arc<RgbImage>> {
        self.frame.clone()
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn stop_tracks(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.live.swap(false, Ordering::SeqCst) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Camera that hands out `FakeStream`s. Optionally fails, or blocks in `acquire`
/// until the test opens the gate.
pub struct FakeCamera {
    native: Option<(u32, u32)>,
    native_delay: Duration,
    fail: bool,
    gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    pub streams: Mutex<Vec<Arc<FakeStream>>>,
    pub acquisitions: AtomicUsize,
}

impl FakeCamera {
    pub fn new(native: Option<(u32, u32)>) -> Arc<Self> {
        Arc::new(Self {
            native,
            native_delay: Duration::ZERO,
            fail: false,
            gate: Mutex::new(None),
            streams: Mutex::new(Vec::new()),
            acquisitions: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            native: None,
            native_delay: Duration::ZERO,
            fail: true,
            gate: Mutex::new(None),
            streams: Mutex::new(Vec::new()),
            acquisitions: AtomicUsize::new(0),
        })
    }

    /// Camera whose `acquire` reports on `entered` and then waits for `open`.
    pub fn gated(
        native: Option<(u32, u32)>,
    ) -> (Arc<Self>, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (open_tx, open_rx) = mpsc::channel();
        let camera = Arc::new(Self {
            native,
            native_delay: Duration::ZERO,
            fail: false,
            gate: Mutex::new(Some((entered_tx, open_rx))),
            streams: Mutex::new(Vec::new()),
            acquisitions: AtomicUsize::new(0),
        });
        (camera, entered_rx, open_tx)
    }

    /// Camera whose streams take `delay` to report their size.
    pub fn slow_metadata(native: (u32, u32), delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            native: Some(native),
            native_delay: delay,
            fail: false,
            gate: Mutex::new(None),
            streams: Mutex::new(Vec::new()),
            acquisitions: AtomicUsize::new(0),
        })
    }

    pub fn last_stream(&self) -> Arc<FakeStream> {
        self.streams
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("a stream was acquired")
    }

    pub fn total_releases(&self) -> usize {
        self.streams.lock().unwrap().iter().map(|s| s.releases()).sum()
    }
}

impl CameraSource for FakeCamera {
    fn acquire(&self, _constraints: &CaptureConstraints) -> Result<Arc<dyn CameraStream>> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, open)) = self.gate.lock().unwrap().take() {
            entered.send(()).unwrap();
            open.recv().unwrap();
        }
        if self.fail {
            return Err(anyhow!("permission denied"));
        }
        let stream = FakeStream::reporting_after(self.native, self.native_delay);
        self.streams.lock().unwrap().push(Arc::clone(&stream));
        Ok(stream)
    }
}

#[derive(Default)]
pub struct FakeServices {
    pub fail: bool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub resets: AtomicUsize,
    pub state_polls: AtomicUsize,
    pub state: Mutex<Option<(Vec<Alert>, f64)>>,
}

impl FakeServices {
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    fn outcome(&self) -> Result<()> {
        if self.fail {
            Err(anyhow!("API 503: backend down"))
        } else {
            Ok(())
        }
    }
}

impl SessionService for FakeServices {
    fn start_session(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.outcome()
    }

    fn stop_session(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.outcome()
    }

    fn reset_session(&self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.outcome()
    }

    fn fetch_state(&self) -> Result<RemoteState> {
        self.state_polls.fetch_add(1, Ordering::SeqCst);
        self.outcome()?;
        let mut state = RemoteState::default();
        if let Some((alerts, uptime)) = self.state.lock().unwrap().clone() {
            state.alerts = alerts;
            state.stats.uptime = uptime;
        }
        Ok(state)
    }
}

/// Classifier answering from a script of `(delay, result)` steps; the last step repeats.
pub struct FakeClassifier {
    script: Mutex<VecDeque<(Duration, Result<Vec<RawDetection>, String>)>>,
    last: Mutex<Option<(Duration, Result<Vec<RawDetection>, String>)>>,
    pub calls: AtomicUsize,
    pub images: Mutex<Vec<String>>,
}

impl FakeClassifier {
    pub fn returning(detections: Vec<RawDetection>) -> Arc<Self> {
        Self::scripted(vec![(Duration::ZERO, Ok(detections))])
    }

    pub fn scripted(steps: Vec<(Duration, Result<Vec<RawDetection>, String>)>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            images: Mutex::new(Vec::new()),
        })
    }
}

impl Classifier for FakeClassifier {
    fn name(&self) -> &str {
        "fake-classifier"
    }

    fn detect(&self, image: &str, _confidence: f32) -> Result<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.images.lock().unwrap().push(image.to_string());
        let step = {
            let mut script = self.script.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            match script.pop_front() {
                Some(step) => {
                    *last = Some(step.clone());
                    step
                }
                None => last
                    .clone()
                    .unwrap_or((Duration::ZERO, Ok(Vec::new()))),
            }
        };
        std::thread::sleep(step.0);
        step.1.map_err(|msg| anyhow!(msg))
    }
}

/// What the fake capture has been through.
#[derive(Default)]
pub struct RecorderLog {
    pub starts: AtomicUsize,
    pub frames: AtomicUsize,
    pub releases: AtomicUsize,
    pub specs: Mutex<Vec<RecorderSpec>>,
}

pub struct FakeRecorder {
    supported: Vec<&'static str>,
    /// Emit one chunk every N frames; 0 never emits.
    chunk_every: usize,
    tail: Option<Vec<u8>>,
    pub log: Arc<RecorderLog>,
}

impl FakeRecorder {
    pub fn new(supported: Vec<&'static str>, chunk_every: usize, tail: Option<&[u8]>) -> Arc<Self> {
        Arc::new(Self {
            supported,
            chunk_every,
            tail: tail.map(|t| t.to_vec()),
            log: Arc::new(RecorderLog::default()),
        })
    }

    pub fn webm(chunk_every: usize) -> Arc<Self> {
        Self::new(vec!["video/webm;codecs=vp9", "video/webm"], chunk_every, Some(&b"END"[..]))
    }

    pub fn silent() -> Arc<Self> {
        Self::new(vec!["video/webm"], 0, None)
    }
}

impl MediaRecorder for FakeRecorder {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.supported.contains(&mime_type)
    }

    fn start(&self, spec: &RecorderSpec) -> Result<Box<dyn ActiveRecorder>> {
        self.log.starts.fetch_add(1, Ordering::SeqCst);
        self.log.specs.lock().unwrap().push(spec.clone());
        Ok(Box::new(FakeCapture {
            chunk_every: self.chunk_every,
            tail: self.tail.clone(),
            pending: Vec::new(),
            frames: 0,
            released: false,
            log: Arc::clone(&self.log),
        }))
    }
}

struct FakeCapture {
    chunk_every: usize,
    tail: Option<Vec<u8>>,
    pending: Vec<Vec<u8>>,
    frames: usize,
    released: bool,
    log: Arc<RecorderLog>,
}

impl ActiveRecorder for FakeCapture {
    fn write_frame(&mut self, _frame: &RgbImage) -> Result<()> {
        self.frames += 1;
        self.log.frames.fetch_add(1, Ordering::SeqCst);
        if self.chunk_every > 0 && self.frames % self.chunk_every == 0 {
            self.pending.push(format!("[{}]", self.frames).into_bytes());
        }
        Ok(())
    }

    fn drain_chunks(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.pending)
    }

    fn finish(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut rest = std::mem::take(&mut self.pending);
        rest.extend(self.tail.take());
        Ok(rest)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.log.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
pub struct FakeSink {
    pub fail: bool,
    pub uploads: Mutex<Vec<(RecordingBlob, RecordingMeta)>>,
}

impl FakeSink {
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

impl RecordingSink for FakeSink {
    fn upload(&self, blob: &RecordingBlob, meta: &RecordingMeta) -> Result<UploadReceipt> {
        self.uploads.lock().unwrap().push((blob.clone(), *meta));
        if self.fail {
            return Err(anyhow!("API 500: disk full"));
        }
        Ok(UploadReceipt {
            saved: true,
            filename: format!("recording_1.{}", blob.extension),
            url: None,
            size: blob.bytes.len() as u64,
            started_at: Some(meta.started_at.to_rfc3339()),
            ended_at: Some(meta.ended_at.to_rfc3339()),
        })
    }
}
