//! `ffmpeg` child-process recorder.
//!
//! Raw RGB24 frames go to ffmpeg's stdin; the encoded container stream comes
//! back on stdout and is cut into chunks on a fixed interval by a reader thread.
//! Supported media types follow from the encoders the local ffmpeg build lists.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use super::{ActiveRecorder, MediaRecorder, RecorderSpec};
use crate::frame::fit_to_surface;

pub const DEFAULT_FFMPEG: &str = "ffmpeg";

const READ_BUF: usize = 64 * 1024;

/// Encoders able to produce `mime_type`, in preference order.
pub fn encoders_for(mime_type: &str) -> &'static [&'static str] {
    let mime = mime_type.to_ascii_lowercase();
    if mime.starts_with("video/webm") {
        if mime.contains("vp9") {
            &["libvpx-vp9"]
        } else if mime.contains("vp8") {
            &["libvpx"]
        } else {
            &["libvpx-vp9", "libvpx"]
        }
    } else if mime.starts_with("video/mp4") {
        &["libx264"]
    } else {
        &[]
    }
}

/// Encoder names from `ffmpeg -encoders` output.
pub fn parse_encoders(listing: &str) -> HashSet<String> {
    listing
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let flags = fields.next()?;
            let name = fields.next()?;
            let is_flags = flags.len() == 6
                && flags.starts_with(['V', 'A', 'S'])
                && flags.chars().all(|c| c.is_ascii_uppercase() || c == '.');
            let is_name = name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            (is_flags && is_name).then(|| name.to_string())
        })
        .collect()
}

pub struct FfmpegRecorder {
    program: PathBuf,
    encoders: OnceLock<HashSet<String>>,
}

impl FfmpegRecorder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            encoders: OnceLock::new(),
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    fn encoders(&self) -> &HashSet<String> {
        self.encoders.get_or_init(|| match self.probe_encoders() {
            Ok(found) => {
                log::debug!("ffmpeg offers {} encoders", found.len());
                found
            }
            Err(err) => {
                log::warn!("ffmpeg encoder probe failed: {:#}", err);
                HashSet::new()
            }
        })
    }

    fn probe_encoders(&self) -> Result<HashSet<String>> {
        let output = Command::new(&self.program)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .with_context(|| format!("run {} -encoders", self.program.display()))?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} -encoders exited with {}",
                self.program.display(),
                output.status
            ));
        }
        Ok(parse_encoders(&String::from_utf8_lossy(&output.stdout)))
    }

    fn pick_encoder(&self, mime_type: &str) -> Option<&'static str> {
        let available = self.encoders();
        encoders_for(mime_type)
            .iter()
            .copied()
            .find(|name| available.contains(*name))
    }

    fn command_for(&self, spec: &RecorderSpec, encoder: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", spec.width, spec.height)])
            .args(["-r", &spec.fps.to_string()])
            .args(["-i", "pipe:0", "-an", "-c:v", encoder]);
        if encoder == "libx264" {
            cmd.args(["-preset", "ultrafast", "-pix_fmt", "yuv420p"])
                .args(["-movflags", "frag_keyframe+empty_moov", "-f", "mp4"]);
        } else {
            cmd.args(["-deadline", "realtime", "-cpu-used", "8", "-f", "webm"]);
        }
        cmd.arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        cmd
    }
}

impl Default for FfmpegRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG)
    }
}

impl MediaRecorder for FfmpegRecorder {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.pick_encoder(mime_type).is_some()
    }

    fn start(&self, spec: &RecorderSpec) -> Result<Box<dyn ActiveRecorder>> {
        let encoder = self
            .pick_encoder(&spec.mime_type)
            .ok_or_else(|| anyhow!("ffmpeg cannot encode {}", spec.mime_type))?;
        let mut child = self
            .command_for(spec, encoder)
            .spawn()
            .with_context(|| format!("spawn {}", self.program.display()))?;
        let stdin = child.stdin.take().context("ffmpeg stdin")?;
        let stdout = child.stdout.take().context("ffmpeg stdout")?;

        let pending = Arc::new(Mutex::new(Vec::new()));
        let interval = spec.chunk_interval;
        let sink = Arc::clone(&pending);
        let reader = std::thread::Builder::new()
            .name("ffmpeg-chunker".to_string())
            .spawn(move || cut_chunks(stdout, interval, &sink));
        let reader = match reader {
            Ok(reader) => reader,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err).context("spawn ffmpeg chunk reader");
            }
        };
        log::debug!(
            "ffmpeg capture {}x{} @{} via {}",
            spec.width,
            spec.height,
            spec.fps,
            encoder
        );
        Ok(Box::new(FfmpegCapture {
            child,
            stdin: Some(stdin),
            reader: Some(reader),
            pending,
            width: spec.width,
            height: spec.height,
        }))
    }
}

fn cut_chunks(mut stdout: impl Read, interval: std::time::Duration, pending: &Mutex<Vec<Vec<u8>>>) {
    let mut buf = vec![0u8; READ_BUF];
    let mut current = Vec::new();
    let mut cut_at = Instant::now() + interval;
    loop {
        match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => current.extend_from_slice(&buf[..n]),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                log::warn!("ffmpeg output read failed: {}", err);
                break;
            }
        }
        if Instant::now() >= cut_at && !current.is_empty() {
            pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(std::mem::take(&mut current));
            cut_at = Instant::now() + interval;
        }
    }
    if !current.is_empty() {
        pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(current);
    }
}

struct FfmpegCapture {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
    pending: Arc<Mutex<Vec<Vec<u8>>>>,
    width: u32,
    height: u32,
}

impl FfmpegCapture {
    fn take_pending(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn join_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                log::error!("ffmpeg chunk reader panicked");
            }
        }
    }
}

impl ActiveRecorder for FfmpegCapture {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let stdin = self.stdin.as_mut().context("ffmpeg input already closed")?;
        let written = if frame.dimensions() == (self.width, self.height) {
            stdin.write_all(frame.as_raw())
        } else {
            stdin.write_all(fit_to_surface(frame, self.width, self.height).as_raw())
        };
        written.context("write frame to ffmpeg")
    }

    fn drain_chunks(&mut self) -> Vec<Vec<u8>> {
        self.take_pending()
    }

    fn finish(&mut self) -> Result<Vec<Vec<u8>>> {
        drop(self.stdin.take());
        self.join_reader();
        let status = self.child.wait().context("wait for ffmpeg")?;
        if !status.success() {
            log::warn!("ffmpeg exited with {}", status);
        }
        Ok(self.take_pending())
    }

    fn release(&mut self) {
        drop(self.stdin.take());
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        self.join_reader();
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        self.release();
    }
}
