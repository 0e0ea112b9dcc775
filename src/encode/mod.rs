//! Stereo encoder sink.
//!
//! Receives interleaved stereo blocks from the mixer over a bounded queue
//! and produces the session's compressed audio artifact: FLAC, 48kHz,
//! 16-bit stereo. FLAC is sample-exact, so presentation timing is carried
//! by stream position alone; the sink cross-checks each block's
//! `output_sample_index` against the frames already accepted and warns on
//! discontinuities (a dropped block upstream).
//!
//! The output file is created eagerly so an unwritable path fails the
//! session at start instead of at the end of an hour-long meeting. Samples
//! are accumulated as they arrive and the container is encoded and written
//! when the input queue closes.

use flacenc::component::BitRepr;
use flacenc::error::Verify;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::audio::StereoBlock;
use crate::error::{Result, SessionError};

/// Totals reported when the sink finishes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncoderSummary {
    /// Stereo frames written to the artifact.
    pub frames_written: u64,
    /// Bytes of the encoded artifact.
    pub bytes_written: u64,
}

pub struct FlacEncoder {
    path: PathBuf,
    file: File,
    sample_rate: u32,
    /// Interleaved 16-bit samples widened to i32 for the encoder.
    samples: Vec<i32>,
    frames_accepted: u64,
}

impl FlacEncoder {
    /// Open the output artifact. Failures here are session-fatal.
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SessionError::EncoderInit(format!(
                        "cannot create output directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let file = File::create(&path).map_err(|e| {
            SessionError::EncoderInit(format!("cannot create {}: {}", path.display(), e))
        })?;

        info!("encoder sink opened: {}", path.display());

        Ok(Self {
            path,
            file,
            sample_rate,
            samples: Vec::new(),
            frames_accepted: 0,
        })
    }

    /// Consume stereo blocks until the mixer closes the queue, then encode
    /// and write the artifact.
    pub async fn run(mut self, mut rx: mpsc::Receiver<StereoBlock>) -> Result<EncoderSummary> {
        while let Some(block) = rx.recv().await {
            self.append(&block);
        }
        self.finish()
    }

    fn append(&mut self, block: &StereoBlock) {
        if block.output_sample_index != self.frames_accepted {
            warn!(
                "output timeline gap: block at frame {}, {} accepted so far",
                block.output_sample_index, self.frames_accepted
            );
        }

        self.samples.reserve(block.samples.len());
        for &sample in &block.samples {
            self.samples
                .push((sample.clamp(-1.0, 1.0) * 32767.0).round() as i32);
        }
        self.frames_accepted = block.output_sample_index + block.frame_count() as u64;
    }

    fn finish(mut self) -> Result<EncoderSummary> {
        let frames_written = (self.samples.len() / 2) as u64;

        let config = flacenc::config::Encoder::default()
            .into_verified()
            .map_err(|_| SessionError::EncoderInit("invalid encoder configuration".to_string()))?;

        let source = flacenc::source::MemSource::from_samples(
            &self.samples,
            2,
            16,
            self.sample_rate as usize,
        );

        let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
            .map_err(|e| SessionError::Encode(format!("{:?}", e)))?;

        let mut sink = flacenc::bitsink::ByteSink::new();
        stream
            .write(&mut sink)
            .map_err(|e| SessionError::Encode(format!("{:?}", e)))?;

        self.file.write_all(sink.as_slice())?;
        self.file.flush()?;

        let bytes_written = sink.as_slice().len() as u64;
        info!(
            "encoder finished: {} frames, {} bytes -> {}",
            frames_written,
            bytes_written,
            self.path.display()
        );

        Ok(EncoderSummary {
            frames_written,
            bytes_written,
        })
    }
}
