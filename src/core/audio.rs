//! PCM audio formats and edge conversion.
//!
//! The call bridge never reframes or resamples audio itself. Both ends of a
//! call declare the 16-bit little-endian PCM layout they speak, and the
//! forwarding pumps run chunks through a [`PcmConverter`] when the two
//! layouts differ.
//!
//! The remote speech session returns its audio as WAV chunks; [`WavDecoder`]
//! strips the container so only raw samples travel through the output buffer.

use bytes::Bytes;
use std::fmt;
use std::io::Cursor;

/// Sample rate used for the remote speech session (Hz).
pub const SESSION_SAMPLE_RATE: u32 = 16_000;

/// Bytes per 16-bit sample.
const BYTES_PER_SAMPLE: usize = 2;

/// Layout of a 16-bit little-endian PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Samples per second per channel.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Mono stream at the given rate.
    pub const fn mono(sample_rate: u32) -> Self {
        Self::new(sample_rate, 1)
    }

    /// Size of one interleaved frame in bytes.
    pub fn frame_size(&self) -> usize {
        BYTES_PER_SAMPLE * self.channels.max(1) as usize
    }

    /// Duration of `bytes` worth of audio in milliseconds.
    pub fn duration_ms(&self, bytes: usize) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        let frames = (bytes / self.frame_size()) as u64;
        frames * 1000 / self.sample_rate as u64
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::mono(SESSION_SAMPLE_RATE)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
    }
}

// =============================================================================
// PCM Converter
// =============================================================================

/// Streaming converter between two PCM16 layouts.
///
/// Multi-channel input is averaged down to mono, resampled with linear
/// interpolation, then duplicated out to the target channel count. State is
/// carried across chunks, so a stream split at arbitrary byte boundaries
/// converts the same as one contiguous buffer.
#[derive(Debug, Clone)]
pub struct PcmConverter {
    from: AudioFormat,
    to: AudioFormat,
    /// Bytes of an incomplete input frame held for the next chunk.
    carry: Vec<u8>,
    /// Position of the next output sample, in input samples, relative to the
    /// first sample of the upcoming chunk. May be negative (down to -1).
    position: f64,
    /// Last mono sample of the previous chunk.
    previous: Option<i16>,
}

impl PcmConverter {
    pub fn new(from: AudioFormat, to: AudioFormat) -> Self {
        Self {
            from,
            to,
            carry: Vec::new(),
            position: 0.0,
            previous: None,
        }
    }

    /// True when input is passed through untouched.
    pub fn is_passthrough(&self) -> bool {
        self.from == self.to
    }

    pub fn source(&self) -> AudioFormat {
        self.from
    }

    pub fn target(&self) -> AudioFormat {
        self.to
    }

    /// Convert one chunk. May return an empty buffer when the chunk is
    /// smaller than a frame or the resampler needs more input.
    pub fn convert(&mut self, chunk: &[u8]) -> Bytes {
        if self.is_passthrough() {
            return Bytes::copy_from_slice(chunk);
        }

        let mono = self.downmix(chunk);
        let resampled = self.resample(&mono);
        self.upmix(&resampled)
    }

    /// Split complete frames out of `chunk` (plus any carried bytes) and
    /// average them to mono.
    fn downmix(&mut self, chunk: &[u8]) -> Vec<i16> {
        let frame_size = self.from.frame_size();
        let channels = self.from.channels.max(1) as usize;

        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(chunk);

        let usable = input.len() - input.len() % frame_size;
        self.carry = input[usable..].to_vec();

        input[..usable]
            .chunks_exact(frame_size)
            .map(|frame| {
                let sum: i32 = frame
                    .chunks_exact(BYTES_PER_SAMPLE)
                    .map(|s| i16::from_le_bytes([s[0], s[1]]) as i32)
                    .sum();
                (sum / channels as i32) as i16
            })
            .collect()
    }

    fn resample(&mut self, input: &[i16]) -> Vec<i16> {
        if input.is_empty() {
            return Vec::new();
        }
        if self.from.sample_rate == self.to.sample_rate
            || self.from.sample_rate == 0
            || self.to.sample_rate == 0
        {
            self.previous = input.last().copied();
            return input.to_vec();
        }

        let step = self.from.sample_rate as f64 / self.to.sample_rate as f64;
        let last = (input.len() - 1) as f64;
        let previous = self.previous.unwrap_or(input[0]);
        let sample_at = |idx: isize| -> f64 {
            if idx < 0 {
                previous as f64
            } else {
                input[(idx as usize).min(input.len() - 1)] as f64
            }
        };

        let mut output = Vec::with_capacity((input.len() as f64 / step).ceil() as usize + 1);
        let mut position = self.position;
        while position <= last {
            let idx = position.floor();
            let frac = position - idx;
            let s0 = sample_at(idx as isize);
            let s1 = sample_at(idx as isize + 1);
            let value = s0 + (s1 - s0) * frac;
            output.push(value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
            position += step;
        }

        self.position = position - input.len() as f64;
        self.previous = input.last().copied();
        output
    }

    fn upmix(&self, mono: &[i16]) -> Bytes {
        let channels = self.to.channels.max(1) as usize;
        let mut out = Vec::with_capacity(mono.len() * channels * BYTES_PER_SAMPLE);
        for sample in mono {
            for _ in 0..channels {
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
        Bytes::from(out)
    }
}

// =============================================================================
// WAV Decoding
// =============================================================================

/// Streaming decoder for the audio chunks of one session.
///
/// WAV chunks are unwrapped and converted to `target`. The converter is kept
/// between chunks so resampling stays continuous across chunk boundaries; it
/// is only rebuilt when the source layout changes. Chunks without a RIFF
/// header are assumed to already be in `target` layout.
#[derive(Debug, Clone)]
pub struct WavDecoder {
    target: AudioFormat,
    converter: Option<PcmConverter>,
}

impl WavDecoder {
    pub fn new(target: AudioFormat) -> Self {
        Self {
            target,
            converter: None,
        }
    }

    pub fn target(&self) -> AudioFormat {
        self.target
    }

    pub fn decode(&mut self, data: &[u8]) -> Result<Bytes, hound::Error> {
        if !data.starts_with(b"RIFF") {
            return Ok(Bytes::copy_from_slice(data));
        }

        let (source, pcm) = read_wav(data)?;
        if self.converter.as_ref().is_none_or(|c| c.source() != source) {
            self.converter = Some(PcmConverter::new(source, self.target));
        }
        let converter = self
            .converter
            .get_or_insert_with(|| PcmConverter::new(source, self.target));
        Ok(converter.convert(&pcm))
    }
}

/// Read the PCM16 samples and layout out of a WAV container.
fn read_wav(data: &[u8]) -> Result<(AudioFormat, Vec<u8>), hound::Error> {
    let mut reader = hound::WavReader::new(Cursor::new(data))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(hound::Error::FormatError("sample rate is zero"));
    }
    if spec.channels == 0 {
        return Err(hound::Error::FormatError("channel count is zero"));
    }
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(hound::Error::Unsupported);
    }

    let mut pcm = Vec::with_capacity(reader.len() as usize * BYTES_PER_SAMPLE);
    for sample in reader.samples::<i16>() {
        pcm.extend_from_slice(&sample?.to_le_bytes());
    }

    Ok((AudioFormat::new(spec.sample_rate, spec.channels), pcm))
}

/// Decode a single chunk that may be a WAV file into raw PCM16 in `target`
/// layout. Streams should hold a [`WavDecoder`] instead.
pub fn decode_wav_chunk(data: &[u8], target: AudioFormat) -> Result<Bytes, hound::Error> {
    WavDecoder::new(target).decode(data)
}
