//! Audio decoder using symphonia
//!
//! Turns an audio file into a sequential stream of stereo `SampleFrame` chunks
//! with sample-accurate random access.
//!
//! Seeking asks the container for an accurate seek, then discards the leading
//! frames of the first decoded packet(s) so the next chunk starts exactly at the
//! requested frame. Containers that cannot seek are reopened and decoded
//! forward from the start (decode-and-skip).

use crate::audio::types::{FrameChunk, SampleFrame, SamplePosition, TrackRef};
use crate::error::{Error, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::{Error as SymphoniaError, SeekErrorKind};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;
use tracing::{debug, trace, warn};

/// Stream properties reported once a source is open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpec {
    pub sample_rate: u32,
    /// Channel count of the source (output is always stereo)
    pub channels: u16,
    /// Total frames if the container reports them
    pub total_frames: Option<u64>,
}

/// Result of one decode step
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Frames(FrameChunk),
    EndOfStream,
}

/// A readable, seekable cursor over one audio source
///
/// Each cursor is independent: the playback feeder and the waveform scan each
/// own one.
pub trait FrameSource: Send {
    fn spec(&self) -> SourceSpec;

    /// Position of the next frame `decode_next` will return
    fn position(&self) -> SamplePosition;

    /// Decode the next run of frames
    ///
    /// Transient read failures return `Error::Io` and may be retried.
    fn decode_next(&mut self) -> Result<Decoded>;

    /// Move the cursor so the next chunk starts exactly at `position`
    ///
    /// On failure the cursor is left where it was.
    fn seek(&mut self, position: SamplePosition) -> Result<()>;
}

/// Opens `FrameSource`s for track references
pub trait SourceProvider: Send + Sync {
    fn open(&self, source: &TrackRef) -> Result<Box<dyn FrameSource>>;

    /// Whether a second cursor may be opened on a source that is already open
    ///
    /// When false the waveform is built from the frames the playback feeder
    /// decodes instead of from an independent scan.
    fn supports_concurrent_cursors(&self) -> bool {
        true
    }
}

/// Default provider: files on disk decoded by symphonia
#[derive(Debug, Clone)]
pub struct FileSourceProvider {
    max_consecutive_decode_errors: u32,
}

impl FileSourceProvider {
    pub fn new(max_consecutive_decode_errors: u32) -> Self {
        Self { max_consecutive_decode_errors }
    }
}

impl Default for FileSourceProvider {
    fn default() -> Self {
        Self::new(3)
    }
}

impl SourceProvider for FileSourceProvider {
    fn open(&self, source: &TrackRef) -> Result<Box<dyn FrameSource>> {
        let decoder = SymphoniaDecoder::open(source.path(), self.max_consecutive_decode_errors)?;
        Ok(Box::new(decoder))
    }
}

/// Everything produced by probing a file
struct Probed {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    codec_params: CodecParameters,
    track_id: u32,
    time_base: Option<TimeBase>,
    spec: SourceSpec,
}

fn probe(path: &Path) -> Result<Probed> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| {
            Error::UnsupportedFormat(format!("Failed to probe {}: {}", path.display(), e))
        })?;

    let format = probed.format;

    // First track with a real codec
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::UnsupportedFormat("No audio track found".to_string()))?;

    let codec_params = track.codec_params.clone();
    let track_id = track.id;

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| Error::UnsupportedFormat("Sample rate not found".to_string()))?;
    let channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(2);

    let decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| Error::UnsupportedFormat(format!("Failed to create decoder: {}", e)))?;

    Ok(Probed {
        format,
        decoder,
        time_base: codec_params.time_base,
        spec: SourceSpec {
            sample_rate,
            channels,
            total_frames: codec_params.n_frames,
        },
        codec_params,
        track_id,
    })
}

/// Sequential, seekable symphonia decoder
pub struct SymphoniaDecoder {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    codec_params: CodecParameters,
    track_id: u32,
    time_base: Option<TimeBase>,
    spec: SourceSpec,

    /// Position of the first frame of the next decoded packet
    decode_position: SamplePosition,
    /// Frames still to discard before output resumes (after a seek)
    skip: u64,
    /// Re-derive `decode_position` from the next packet timestamp
    resync: bool,
    finished: bool,

    consecutive_errors: u32,
    max_consecutive_errors: u32,
}

impl SymphoniaDecoder {
    /// Open and probe an audio file
    pub fn open(path: &Path, max_consecutive_errors: u32) -> Result<Self> {
        let probed = probe(path)?;
        debug!(
            path = %path.display(),
            sample_rate = probed.spec.sample_rate,
            channels = probed.spec.channels,
            total_frames = ?probed.spec.total_frames,
            "Opened audio source"
        );
        Ok(Self {
            path: path.to_path_buf(),
            format: probed.format,
            decoder: probed.decoder,
            codec_params: probed.codec_params,
            track_id: probed.track_id,
            time_base: probed.time_base,
            spec: probed.spec,
            decode_position: 0,
            skip: 0,
            resync: false,
            finished: false,
            consecutive_errors: 0,
            max_consecutive_errors,
        })
    }

    fn ts_to_frames(&self, ts: u64) -> u64 {
        match self.time_base {
            Some(tb) if tb.denom != 0 => {
                (ts as u128 * tb.numer as u128 * self.spec.sample_rate as u128 / tb.denom as u128)
                    as u64
            }
            _ => ts,
        }
    }

    fn frames_to_ts(&self, frames: u64) -> u64 {
        match self.time_base {
            Some(tb) if tb.numer != 0 && self.spec.sample_rate != 0 => {
                (frames as u128 * tb.denom as u128
                    / (tb.numer as u128 * self.spec.sample_rate as u128)) as u64
            }
            _ => frames,
        }
    }

    /// Replace the codec instance, e.g. after `ResetRequired`
    fn rebuild_decoder(&mut self) -> Result<()> {
        self.decoder = symphonia::default::get_codecs()
            .make(&self.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::CorruptStream(format!("Decoder reset failed: {}", e)))?;
        Ok(())
    }

    /// Reopen the file and position the cursor by decode-and-skip
    fn reopen_at(&mut self, position: SamplePosition) -> Result<()> {
        let probed = probe(&self.path)?;
        self.format = probed.format;
        self.decoder = probed.decoder;
        self.codec_params = probed.codec_params;
        self.track_id = probed.track_id;
        self.time_base = probed.time_base;
        self.decode_position = 0;
        self.skip = position;
        self.resync = false;
        self.finished = false;
        self.consecutive_errors = 0;
        Ok(())
    }

    /// Position the container and arrange to discard up to `target`
    fn container_seek(&mut self, target: SamplePosition) -> std::result::Result<(), SymphoniaError> {
        let ts = self.frames_to_ts(target);
        let seeked = self.format.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp { ts, track_id: self.track_id },
        )?;
        self.decoder.reset();

        let actual = self.ts_to_frames(seeked.actual_ts);
        if actual > target {
            // Landed past the target: cannot discard backwards
            return Err(SymphoniaError::SeekError(SeekErrorKind::ForwardOnly));
        }
        self.decode_position = actual;
        self.skip = target - actual;
        self.resync = false;
        self.finished = false;
        self.consecutive_errors = 0;
        trace!(target, actual, skip = self.skip, "Container seek");
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
        self.skip = 0;
        debug!(path = %self.path.display(), end = self.decode_position, "Reached end of stream");
    }
}

impl FrameSource for SymphoniaDecoder {
    fn spec(&self) -> SourceSpec {
        self.spec
    }

    fn position(&self) -> SamplePosition {
        self.decode_position + self.skip
    }

    fn decode_next(&mut self) -> Result<Decoded> {
        loop {
            if self.finished {
                return Ok(Decoded::EndOfStream);
            }

            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.finish();
                    return Ok(Decoded::EndOfStream);
                }
                Err(SymphoniaError::IoError(e)) => return Err(Error::Io(e)),
                Err(SymphoniaError::ResetRequired) => {
                    self.rebuild_decoder()?;
                    continue;
                }
                Err(e) => {
                    return Err(Error::CorruptStream(format!("Failed to read packet: {}", e)));
                }
            };

            // Skip packets for other tracks
            if packet.track_id() != self.track_id {
                continue;
            }

            if self.resync {
                self.decode_position = self.ts_to_frames(packet.ts());
                self.resync = false;
            }

            let mut frames = match self.decoder.decode(&packet) {
                Ok(decoded) => buffer_to_frames(decoded),
                Err(SymphoniaError::DecodeError(msg)) => {
                    self.consecutive_errors += 1;
                    warn!(
                        path = %self.path.display(),
                        consecutive = self.consecutive_errors,
                        "Decode error: {}", msg
                    );
                    if self.consecutive_errors > self.max_consecutive_errors {
                        return Err(Error::CorruptStream(format!(
                            "{} consecutive undecodable packets (last: {})",
                            self.consecutive_errors, msg
                        )));
                    }
                    self.resync = true;
                    continue;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.rebuild_decoder()?;
                    continue;
                }
                Err(e) => {
                    return Err(Error::CorruptStream(format!("Decoder failed: {}", e)));
                }
            };
            self.consecutive_errors = 0;

            let mut start = self.decode_position;
            self.decode_position += frames.len() as u64;

            if self.skip > 0 {
                let n = (self.skip as usize).min(frames.len());
                frames.drain(..n);
                self.skip -= n as u64;
                start += n as u64;
            }

            if frames.is_empty() {
                continue;
            }

            return Ok(Decoded::Frames(FrameChunk { start, frames }));
        }
    }

    fn seek(&mut self, position: SamplePosition) -> Result<()> {
        if let Some(total) = self.spec.total_frames {
            if position > total {
                return Err(Error::InvalidPosition { position, length: Some(total) });
            }
        }

        let previous = self.position();
        match self.container_seek(position) {
            Ok(()) => Ok(()),
            Err(SymphoniaError::SeekError(SeekErrorKind::Unseekable))
            | Err(SymphoniaError::SeekError(SeekErrorKind::ForwardOnly)) => {
                debug!(position, "Container cannot seek here, decoding forward from start");
                self.reopen_at(position)
            }
            Err(e) => {
                warn!(position, previous, "Seek failed: {}", e);
                self.reopen_at(previous)?;
                Err(Error::Seek(format!("Seek to {} failed: {}", position, e)))
            }
        }
    }
}

/// Convert a decoded buffer of any sample format to stereo frames
///
/// Mono is duplicated to both channels; extra channels are dropped.
fn buffer_to_frames(decoded: AudioBufferRef<'_>) -> Vec<SampleFrame> {
    let spec = *decoded.spec();
    let channels = spec.channels.count().max(1);
    let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
    sample_buf.copy_interleaved_ref(decoded);

    sample_buf
        .samples()
        .chunks_exact(channels)
        .map(|frame| {
            if channels == 1 {
                SampleFrame::from_mono(frame[0])
            } else {
                SampleFrame::from_stereo(frame[0], frame[1])
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_ramp_wav(path: &Path, frames: u32, channels: u16) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
        for i in 0..frames {
            // Sample value encodes the frame index modulo 30000
            let v = (i % 30_000) as i16;
            for _ in 0..channels {
                writer.write_sample(v).expect("write sample");
            }
        }
        writer.finalize().expect("finalize");
    }

    fn frame_index(frame: &SampleFrame) -> u32 {
        (frame.left * 32768.0).round() as u32
    }

    fn decode_all(source: &mut dyn FrameSource) -> Vec<FrameChunk> {
        let mut chunks = Vec::new();
        while let Decoded::Frames(chunk) = source.decode_next().expect("decode") {
            chunks.push(chunk);
        }
        chunks
    }

    #[test]
    fn test_open_reports_spec() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ramp.wav");
        write_ramp_wav(&path, 10_000, 2);

        let decoder = SymphoniaDecoder::open(&path, 3).expect("open");
        let spec = decoder.spec();
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.total_frames, Some(10_000));
    }

    #[test]
    fn test_sequential_chunks_are_contiguous() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ramp.wav");
        write_ramp_wav(&path, 10_000, 2);

        let mut decoder = SymphoniaDecoder::open(&path, 3).expect("open");
        let chunks = decode_all(&mut decoder);

        let mut expected_start = 0;
        for chunk in &chunks {
            assert_eq!(chunk.start, expected_start);
            expected_start = chunk.end();
        }
        assert_eq!(expected_start, 10_000);
        assert_eq!(decoder.decode_next().expect("eos"), Decoded::EndOfStream);
    }

    #[test]
    fn test_seek_is_sample_accurate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ramp.wav");
        write_ramp_wav(&path, 20_000, 2);

        let mut decoder = SymphoniaDecoder::open(&path, 3).expect("open");
        decoder.seek(12_345).expect("seek");
        assert_eq!(decoder.position(), 12_345);

        match decoder.decode_next().expect("decode") {
            Decoded::Frames(chunk) => {
                assert_eq!(chunk.start, 12_345);
                assert_eq!(frame_index(&chunk.frames[0]), 12_345);
            }
            Decoded::EndOfStream => panic!("unexpected end of stream"),
        }
    }

    #[test]
    fn test_seek_backwards_after_reading() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ramp.wav");
        write_ramp_wav(&path, 20_000, 1);

        let mut decoder = SymphoniaDecoder::open(&path, 3).expect("open");
        let _ = decode_all(&mut decoder);
        decoder.seek(100).expect("seek");

        match decoder.decode_next().expect("decode") {
            Decoded::Frames(chunk) => {
                assert_eq!(chunk.start, 100);
                // Mono is duplicated
                assert_eq!(chunk.frames[0].left, chunk.frames[0].right);
                assert_eq!(frame_index(&chunk.frames[0]), 100);
            }
            Decoded::EndOfStream => panic!("unexpected end of stream"),
        }
    }

    #[test]
    fn test_seek_to_end_yields_end_of_stream() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ramp.wav");
        write_ramp_wav(&path, 5_000, 2);

        let mut decoder = SymphoniaDecoder::open(&path, 3).expect("open");
        decoder.seek(5_000).expect("seek");
        assert_eq!(decoder.decode_next().expect("decode"), Decoded::EndOfStream);
    }

    #[test]
    fn test_seek_past_known_end_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ramp.wav");
        write_ramp_wav(&path, 5_000, 2);

        let mut decoder = SymphoniaDecoder::open(&path, 3).expect("open");
        let result = decoder.seek(5_001);
        assert!(matches!(result, Err(Error::InvalidPosition { position: 5_001, .. })));
        assert_eq!(decoder.position(), 0);
    }

    #[test]
    fn test_open_non_audio_is_unsupported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"definitely not audio, just some text").expect("write");

        let result = SymphoniaDecoder::open(&path, 3);
        assert!(matches!(result, Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_open_missing_file_is_io() {
        let result = SymphoniaDecoder::open(Path::new("/nonexistent/flow/missing.wav"), 3);
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
