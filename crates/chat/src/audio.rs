use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Local;
use snafu::ResultExt;
use tokio::task::JoinHandle;
use transgpt_llm::AudioTask;

use crate::error::{
    CaptureError, CreateRecordsDirSnafu, JoinCaptureSnafu, OpenInputSnafu, ReadWavSnafu,
    WriteWavSnafu,
};

pub const DEFAULT_SAMPLE_RATE: u32 = 10_000;
pub const DEFAULT_FRAMES_PER_BUFFER: usize = 2048;

/// Capture format. Samples are always signed 16-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_buffer: usize,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
            frames_per_buffer: DEFAULT_FRAMES_PER_BUFFER,
        }
    }
}

impl AudioFormat {
    pub fn buffer_duration(&self) -> Duration {
        let rate = u64::from(self.sample_rate.max(1));
        Duration::from_micros(self.frames_per_buffer as u64 * 1_000_000 / rate)
    }
}

/// Blocking source of interleaved sample buffers.
pub trait FrameSource: Send {
    /// Returns the next buffer, or `Ok(None)` once the device has nothing more to give.
    fn read_frame(&mut self) -> Result<Option<Vec<i16>>, CaptureError>;
}

/// Opens frame sources on demand, one per recording.
pub trait AudioInput: Send + Sync {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn FrameSource>, CaptureError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub format: AudioFormat,
    pub samples: Vec<i16>,
}

impl AudioClip {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        let per_second = u64::from(self.format.sample_rate.max(1))
            * u64::from(self.format.channels.max(1));
        Duration::from_millis(self.samples.len() as u64 * 1000 / per_second)
    }
}

/// Recording in progress for one session.
pub struct ActiveCapture {
    task: AudioTask,
    stop: Arc<AtomicBool>,
    worker: JoinHandle<AudioClip>,
}

impl ActiveCapture {
    pub fn task(&self) -> AudioTask {
        self.task
    }

    /// Signals the capture loop to stop and waits for the buffered clip.
    pub async fn finish(self) -> Result<AudioClip, CaptureError> {
        self.stop.store(true, Ordering::Release);
        self.worker.await.context(JoinCaptureSnafu {
            stage: "finish-capture",
        })
    }

    /// Stops the loop without waiting for it; used when the owning session goes away.
    pub fn abandon(self) {
        self.stop.store(true, Ordering::Release);
    }
}

pub fn start_capture(
    input: &dyn AudioInput,
    format: AudioFormat,
    task: AudioTask,
) -> Result<ActiveCapture, CaptureError> {
    let mut source = input.open(format)?;
    let stop = Arc::new(AtomicBool::new(false));
    let loop_stop = Arc::clone(&stop);

    let worker = tokio::task::spawn_blocking(move || {
        let mut samples = Vec::new();
        while !loop_stop.load(Ordering::Acquire) {
            match source.read_frame() {
                Ok(Some(frame)) => samples.extend_from_slice(&frame),
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(error = %error, "audio read failed; keeping frames captured so far");
                    break;
                }
            }
        }
        tracing::debug!(sample_count = samples.len(), "capture loop finished");
        AudioClip { format, samples }
    });

    Ok(ActiveCapture { task, stop, worker })
}

pub fn recording_file_name() -> String {
    format!(
        "recorded_audio_{}.wav",
        Local::now().format("%Y%m%d-%H%M%S%3f")
    )
}

/// Writes the clip as 16-bit PCM WAV under `dir`.
pub fn persist_wav(clip: &AudioClip, dir: &Path) -> Result<PathBuf, CaptureError> {
    std::fs::create_dir_all(dir).context(CreateRecordsDirSnafu {
        stage: "persist-wav-create-dir",
        path: dir.to_path_buf(),
    })?;

    let path = dir.join(recording_file_name());
    let spec = hound::WavSpec {
        channels: clip.format.channels,
        sample_rate: clip.format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).context(WriteWavSnafu {
        stage: "persist-wav-create",
        path: path.clone(),
    })?;
    for sample in &clip.samples {
        writer.write_sample(*sample).context(WriteWavSnafu {
            stage: "persist-wav-sample",
            path: path.clone(),
        })?;
    }
    writer.finalize().context(WriteWavSnafu {
        stage: "persist-wav-finalize",
        path: path.clone(),
    })?;

    tracing::info!(path = %path.display(), duration_ms = clip.duration().as_millis() as u64, "recording saved");
    Ok(path)
}

/// Audio input that replays a WAV file at its natural pace.
#[derive(Debug, Clone)]
pub struct WavReplayInput {
    path: PathBuf,
    paced: bool,
}

impl WavReplayInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            paced: true,
        }
    }

    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

impl AudioInput for WavReplayInput {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn FrameSource>, CaptureError> {
        let reader = hound::WavReader::open(&self.path).context(ReadWavSnafu {
            stage: "wav-replay-open",
            path: self.path.clone(),
        })?;
        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            return OpenInputSnafu {
                stage: "wav-replay-format",
                details: format!(
                    "{} is not 16-bit PCM ({} bits, {:?})",
                    self.path.display(),
                    spec.bits_per_sample,
                    spec.sample_format
                ),
            }
            .fail();
        }

        let samples = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context(ReadWavSnafu {
                stage: "wav-replay-read",
                path: self.path.clone(),
            })?;

        let chunk = format.frames_per_buffer.max(1) * usize::from(format.channels.max(1));
        Ok(Box::new(ReplaySource {
            samples,
            position: 0,
            chunk,
            pace: self.paced.then(|| format.buffer_duration()),
        }))
    }
}

struct ReplaySource {
    samples: Vec<i16>,
    position: usize,
    chunk: usize,
    pace: Option<Duration>,
}

impl FrameSource for ReplaySource {
    fn read_frame(&mut self) -> Result<Option<Vec<i16>>, CaptureError> {
        if self.position >= self.samples.len() {
            return Ok(None);
        }
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }
        let end = (self.position + self.chunk).min(self.samples.len());
        let frame = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(Some(frame))
    }
}
