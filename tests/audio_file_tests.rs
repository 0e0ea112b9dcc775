// Tests for audio file decoding and file-backed replay.

use confero::{AudioFile, CaptureSource, ChannelSource, FileSource, SamplePayload, Timebase};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Write a mono 16-bit WAV with a short ramp pattern.
fn write_test_wav(dir: &tempfile::TempDir, name: &str, samples: &[i16], channels: u16) -> PathBuf {
    let path = dir.path().join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();

    path
}

#[test]
fn test_open_decodes_mono_wav() {
    let dir = tempfile::tempdir().unwrap();
    let samples: Vec<i16> = (0..4800).map(|i| (i % 1000) as i16).collect();
    let path = write_test_wav(&dir, "mono.wav", &samples, 1);

    let file = AudioFile::open(&path).unwrap();

    assert_eq!(file.sample_rate, 48_000);
    assert_eq!(file.channels, 1);
    assert_eq!(file.samples.len(), 4800);
    assert!((file.duration_seconds - 0.1).abs() < 1e-6);

    // i16 scaling: 500 -> 500/32768
    assert!((file.samples[500] - 500.0 / 32768.0).abs() < 1e-6);
    assert_eq!(file.samples[0], 0.0);
}

#[test]
fn test_open_decodes_stereo_wav_interleaved() {
    let dir = tempfile::tempdir().unwrap();
    // L=1000, R=-1000 for every frame.
    let samples: Vec<i16> = (0..2000).map(|i| if i % 2 == 0 { 1000 } else { -1000 }).collect();
    let path = write_test_wav(&dir, "stereo.wav", &samples, 2);

    let file = AudioFile::open(&path).unwrap();

    assert_eq!(file.channels, 2);
    assert_eq!(file.samples.len(), 2000);
    assert!(file.samples[0] > 0.0);
    assert!(file.samples[1] < 0.0);
}

#[test]
fn test_open_missing_file_fails() {
    assert!(AudioFile::open("/definitely/not/here.wav").is_err());
}

#[tokio::test]
async fn test_file_source_replays_all_samples() {
    let dir = tempfile::tempdir().unwrap();
    let samples: Vec<i16> = vec![512; 12_000];
    let path = write_test_wav(&dir, "replay.wav", &samples, 1);

    let file = AudioFile::open(&path).unwrap();
    let mut source = FileSource::new(file, ChannelSource::System);
    assert!(source.name().starts_with("file:"));

    let (tx, mut rx) = mpsc::channel(64);
    source.start(Timebase::new(1_000_000_000), tx).await.unwrap();

    let mut total = 0usize;
    let mut first_frame = true;
    while let Some(frame) = rx.recv().await {
        assert_eq!(frame.source, ChannelSource::System);
        assert_eq!(frame.sample_rate, 48_000);
        assert_eq!(frame.channels, 1);
        if first_frame {
            assert!(frame.host_tick.is_some(), "first frame anchors the replay");
            first_frame = false;
        } else {
            assert!(frame.host_tick.is_none(), "later frames are back-to-back");
        }
        match frame.payload {
            SamplePayload::F32(chunk) => total += chunk.len(),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    assert_eq!(total, 12_000);
    source.stop().await.unwrap();
}

#[tokio::test]
async fn test_file_source_cannot_start_twice() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_test_wav(&dir, "once.wav", &[0i16; 480], 1);

    let file = AudioFile::open(&path).unwrap();
    let mut source = FileSource::new(file, ChannelSource::Microphone);

    let (tx, mut rx) = mpsc::channel(16);
    source.start(Timebase::new(1_000_000_000), tx).await.unwrap();
    while rx.recv().await.is_some() {}

    let (tx2, _rx2) = mpsc::channel(16);
    assert!(source.start(Timebase::new(1_000_000_000), tx2).await.is_err());
}
