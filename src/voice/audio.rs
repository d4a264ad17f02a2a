//! Decoding, resampling and WAV I/O for the playback strategies.

use rodio::{Decoder, Source};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::io::Cursor;
use std::path::Path;

use crate::error::PlaybackError;
use crate::voice::artifact;

const RESAMPLE_CHUNK: usize = 1024;

/// Interleaved f32 samples in -1.0..=1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl PcmBuffer {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f32 {
        self.frames() as f32 / self.sample_rate.max(1) as f32
    }
}

/// Decodes an audio file by sniffing its content; the extension is ignored.
pub fn decode_file(path: &Path) -> Result<PcmBuffer, PlaybackError> {
    // Read in one go so a concurrent rename cannot hand us half a file.
    let bytes = std::fs::read(path)?;
    decode_bytes(bytes)
}

pub fn decode_bytes(bytes: Vec<u8>) -> Result<PcmBuffer, PlaybackError> {
    let decoder = Decoder::new(Cursor::new(bytes))?;
    let channels = decoder.channels();
    let sample_rate = decoder.sample_rate();
    let samples: Vec<f32> = decoder.convert_samples::<f32>().collect();
    if samples.is_empty() || channels == 0 {
        return Err(PlaybackError::Empty);
    }
    Ok(PcmBuffer {
        channels,
        sample_rate,
        samples,
    })
}

/// Resamples to `target_rate`. Returns the input unchanged if the rate
/// already matches.
pub fn resample(pcm: PcmBuffer, target_rate: u32) -> Result<PcmBuffer, PlaybackError> {
    if pcm.sample_rate == target_rate {
        return Ok(pcm);
    }
    let channels = pcm.channels as usize;
    let ratio = target_rate as f64 / pcm.sample_rate as f64;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, channels)
        .map_err(|e| PlaybackError::Resample(e.to_string()))?;

    let planar = deinterleave(&pcm.samples, channels);
    let frames = planar[0].len();
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity((frames as f64 * ratio) as usize + 1); channels];

    let mut pos = 0;
    while frames - pos >= resampler.input_frames_next() {
        let end = pos + resampler.input_frames_next();
        let chunk: Vec<&[f32]> = planar.iter().map(|ch| &ch[pos..end]).collect();
        let produced = resampler
            .process(&chunk, None)
            .map_err(|e| PlaybackError::Resample(e.to_string()))?;
        append_planar(&mut out, produced);
        pos = end;
    }
    if pos < frames {
        let chunk: Vec<&[f32]> = planar.iter().map(|ch| &ch[pos..]).collect();
        let produced = resampler
            .process_partial(Some(chunk.as_slice()), None)
            .map_err(|e| PlaybackError::Resample(e.to_string()))?;
        append_planar(&mut out, produced);
    }
    // Flush the filter tail.
    let produced = resampler
        .process_partial::<&[f32]>(None, None)
        .map_err(|e| PlaybackError::Resample(e.to_string()))?;
    append_planar(&mut out, produced);

    let delay = resampler.output_delay();
    let expected = (frames as f64 * ratio).ceil() as usize;
    for ch in out.iter_mut() {
        let start = delay.min(ch.len());
        ch.drain(..start);
        ch.truncate(expected);
    }

    Ok(PcmBuffer {
        channels: pcm.channels,
        sample_rate: target_rate,
        samples: interleave(&out),
    })
}

/// Writes 16-bit PCM WAV, staged and renamed into place.
pub fn write_wav(path: &Path, pcm: &PcmBuffer) -> Result<(), PlaybackError> {
    let spec = hound::WavSpec {
        channels: pcm.channels,
        sample_rate: pcm.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let staged = artifact::staging_path(path);
    let written = (|| {
        let mut writer = hound::WavWriter::create(&staged, spec)?;
        for &sample in &pcm.samples {
            writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()
    })();
    if let Err(e) = written {
        artifact::remove_quietly(&staged);
        return Err(e.into());
    }
    artifact::commit(&staged, path)?;
    Ok(())
}

pub fn read_wav(path: &Path) -> Result<PcmBuffer, PlaybackError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    if samples.is_empty() {
        return Err(PlaybackError::Empty);
    }
    Ok(PcmBuffer {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        samples,
    })
}

fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let mut planar = vec![Vec::with_capacity(samples.len() / channels + 1); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, &s) in frame.iter().enumerate() {
            planar[ch].push(s);
        }
    }
    planar
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let frames = planar.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * planar.len());
    for i in 0..frames {
        for ch in planar {
            out.push(ch[i]);
        }
    }
    out
}

fn append_planar(out: &mut [Vec<f32>], produced: Vec<Vec<f32>>) {
    for (dst, src) in out.iter_mut().zip(produced) {
        dst.extend(src);
    }
}
