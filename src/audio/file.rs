use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::capture::{CaptureSource, ChannelSource, SampleFrame, SamplePayload, Timebase};

/// A fully decoded audio file: interleaved f32 samples plus stream metadata.
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("opening audio file: {}", path.display());

        let file = File::open(path).context("Failed to open audio file")?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension() {
            if let Some(ext_str) = ext.to_str() {
                hint.with_extension(ext_str);
            }
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .context("Failed to probe audio format")?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .context("No audio tracks found")?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .context("Sample rate not specified")?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("Failed to create decoder")?;

        let mut samples = Vec::new();
        let mut channels: Option<u16> = track.codec_params.channels.map(|ch| ch.count() as u16);

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e).context("Error reading packet"),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    if channels.is_none() {
                        channels = Some(decoded.spec().channels.count() as u16);
                    }
                    append_interleaved_f32(&decoded, &mut samples);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // Decode errors are not fatal; skip the packet.
                    tracing::warn!("decode error: {}", e);
                    continue;
                }
                Err(e) => return Err(e).context("Error decoding packet"),
            }
        }

        let channels = channels.context("Could not determine channel count from audio")?;
        let duration_seconds = samples.len() as f64 / (sample_rate as f64 * channels as f64);

        info!(
            "audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            sample_rate,
            channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate,
            channels,
            samples,
        })
    }
}

/// Convert a decoded buffer to interleaved f32 in [-1, 1].
fn append_interleaved_f32(buffer: &AudioBufferRef, output: &mut Vec<f32>) {
    let num_channels = buffer.spec().channels.count();
    let num_frames = buffer.frames();

    macro_rules! interleave {
        ($buf:expr, $convert:expr) => {
            for frame in 0..num_frames {
                for ch in 0..num_channels {
                    let sample = $buf.chan(ch)[frame];
                    output.push($convert(sample));
                }
            }
        };
    }

    match buffer {
        AudioBufferRef::U8(buf) => interleave!(buf, |s: u8| (s as f32 - 128.0) / 128.0),
        AudioBufferRef::U16(buf) => interleave!(buf, |s: u16| (s as f32 - 32768.0) / 32768.0),
        AudioBufferRef::U24(buf) => {
            interleave!(buf, |s: symphonia::core::sample::u24| {
                (s.inner() as f32 - 8_388_608.0) / 8_388_608.0
            })
        }
        AudioBufferRef::U32(buf) => {
            interleave!(buf, |s: u32| (s as f64 / 2_147_483_648.0 - 1.0) as f32)
        }
        AudioBufferRef::S8(buf) => interleave!(buf, |s: i8| s as f32 / 128.0),
        AudioBufferRef::S16(buf) => interleave!(buf, |s: i16| s as f32 / 32768.0),
        AudioBufferRef::S24(buf) => {
            interleave!(buf, |s: symphonia::core::sample::i24| {
                s.inner() as f32 / 8_388_608.0
            })
        }
        AudioBufferRef::S32(buf) => {
            interleave!(buf, |s: i32| (s as f64 / 2_147_483_648.0) as f32)
        }
        AudioBufferRef::F32(buf) => interleave!(buf, |s: f32| s),
        AudioBufferRef::F64(buf) => interleave!(buf, |s: f64| s as f32),
    }
}

/// Replays a decoded audio file through the live capture path, so recorded
/// meetings can be re-processed offline with the same pipeline.
///
/// Frames are delivered in ~100ms slices, back-to-back (no host ticks beyond
/// the first), at the file's native rate and channel count; the source
/// adapter performs the normalization exactly as it would for live capture.
pub struct FileSource {
    file: Option<AudioFile>,
    source: ChannelSource,
    name: String,
    task: Option<JoinHandle<()>>,
}

impl FileSource {
    pub fn new(file: AudioFile, source: ChannelSource) -> Self {
        let name = format!("file:{}", file.path);
        Self {
            file: Some(file),
            source,
            name,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureSource for FileSource {
    async fn start(&mut self, timebase: Timebase, sink: mpsc::Sender<SampleFrame>) -> Result<()> {
        let file = self
            .file
            .take()
            .context("file source already started")?;
        let source = self.source;

        let slice_len = (file.sample_rate as usize / 10).max(1) * file.channels as usize;
        let first_tick = timebase.now_tick();

        self.task = Some(tokio::spawn(async move {
            let mut first = true;
            for chunk in file.samples.chunks(slice_len) {
                let frame = SampleFrame {
                    source,
                    payload: SamplePayload::F32(chunk.to_vec()),
                    sample_rate: file.sample_rate,
                    channels: file.channels,
                    host_tick: if first { Some(first_tick) } else { None },
                };
                first = false;
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
        }));

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
