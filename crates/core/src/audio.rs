//! µ-law/PCM16 codec conversion and stateful chunk resampling.
//!
//! Telephony carriers speak 8 kHz 8-bit µ-law (G.711); STT/TTS vendors
//! speak 16-bit PCM at whatever rate they prefer. [`CodecTranscoder`]
//! handles the former conversion; [`StreamResampler`] handles the
//! latter, carrying filter state across chunk boundaries so resampling
//! a stream in pieces does not introduce audible clicks at the seams.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// µ-law ⇄ 16-bit linear PCM conversion (ITU-T G.711).
///
/// Stateless: each sample converts independently, so this is a pure
/// set of functions rather than a struct with fields, but it is kept
/// as a zero-sized type so call sites can hold it alongside
/// [`StreamResampler`] with a uniform "codec component" shape.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodecTranscoder;

const MULAW_BIAS: i16 = 0x84;
const MULAW_CLIP: i16 = 32635;

impl CodecTranscoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a buffer of µ-law bytes into little-endian PCM16 bytes.
    pub fn mulaw_to_pcm16(&self, mulaw: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(mulaw.len() * 2);
        for &byte in mulaw {
            let sample = Self::mulaw_byte_to_pcm16(byte);
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    /// Encode little-endian PCM16 bytes into µ-law bytes.
    ///
    /// Returns [`Error::OddPcmLength`] if `pcm` is not an even number
    /// of bytes (each PCM16 sample is two bytes).
    pub fn pcm16_to_mulaw(&self, pcm: &[u8]) -> Result<Vec<u8>> {
        if pcm.len() % 2 != 0 {
            return Err(Error::OddPcmLength(pcm.len()));
        }
        let mut out = Vec::with_capacity(pcm.len() / 2);
        for chunk in pcm.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            out.push(Self::pcm16_sample_to_mulaw(sample));
        }
        Ok(out)
    }

    fn mulaw_byte_to_pcm16(byte: u8) -> i16 {
        let byte = !byte;
        let sign = (byte & 0x80) != 0;
        let exponent = (byte >> 4) & 0x07;
        let mantissa = byte & 0x0F;
        let magnitude = (((mantissa as i16) << 3) + MULAW_BIAS) << exponent;
        let magnitude = magnitude - MULAW_BIAS;
        if sign {
            -magnitude
        } else {
            magnitude
        }
    }

    fn pcm16_sample_to_mulaw(sample: i16) -> u8 {
        let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
        let magnitude = if sample == i16::MIN {
            i16::MAX
        } else {
            sample.abs()
        };
        let magnitude = magnitude.min(MULAW_CLIP) + MULAW_BIAS;

        let mut exponent: u8 = 7;
        for exp in 0..8u8 {
            if magnitude < (1i16 << (exp + 8)) {
                exponent = exp;
                break;
            }
        }
        let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
        let byte = sign | (exponent << 4) | mantissa;
        !byte
    }
}

/// Key identifying one resampling direction: `(input_rate, output_rate)`.
type RateKey = (u32, u32);

/// Per-direction resampler state: leftover un-resampled input samples
/// carried across calls, plus the last output sample for linear
/// continuity at the next chunk boundary.
struct ResamplerState {
    carry_in: Vec<f64>,
    last_out: f64,
    ratio: f64,
}

impl ResamplerState {
    fn new(in_rate: u32, out_rate: u32) -> Self {
        Self {
            carry_in: Vec::new(),
            last_out: 0.0,
            ratio: out_rate as f64 / in_rate as f64,
        }
    }

    /// Process one chunk, appending any newly produced input to the
    /// carry buffer and draining as many output samples as the
    /// currently buffered input supports, leaving a short tail
    /// buffered for the next call so that the filter (here: linear
    /// interpolation continuity) never "forgets" where it left off.
    fn process(&mut self, input: &[f64]) -> Vec<f64> {
        self.carry_in.extend_from_slice(input);

        // Need at least two samples to interpolate between; hold the
        // final sample back as the seed for the next call.
        if self.carry_in.len() < 2 {
            return Vec::new();
        }

        let usable = &self.carry_in[..];
        let in_len = usable.len();
        // Number of output samples fully determined by `usable[..in_len-1]`
        // against `usable[in_len-1]` as the right edge; we keep the
        // last input sample as the seed for next call instead of
        // consuming it, so resampling never runs past data it has
        // actually seen.
        let producible_src_span = (in_len - 1) as f64;
        let out_len = (producible_src_span * self.ratio).floor() as usize;

        let mut output = Vec::with_capacity(out_len);
        for i in 0..out_len {
            let src_pos = i as f64 / self.ratio;
            let idx = src_pos.floor() as usize;
            let frac = src_pos - idx as f64;
            let idx = idx.min(in_len - 2);
            let sample = usable[idx] * (1.0 - frac) + usable[idx + 1] * frac;
            output.push(sample);
        }

        if let Some(&last) = output.last() {
            self.last_out = last;
        }

        // Keep the last sample (and anything past the consumed span,
        // which should be none) as the seed for the next chunk.
        let consumed_src = (out_len as f64 / self.ratio).floor() as usize;
        let keep_from = consumed_src.min(in_len - 1);
        self.carry_in.drain(0..keep_from);

        output
    }
}

/// Converts monaural 16-bit PCM between sample rates, one chunk at a
/// time, preserving filter state per `(in_rate, out_rate)` pair across
/// calls on the same instance.
///
/// Contract (spec §4.1): identity when `in_rate == target_rate`;
/// otherwise deterministic, stateful linear-phase interpolation whose
/// carried-over tail means resampling a stream in two halves produces
/// (within a few samples of slop at the very end) the same bytes as
/// resampling the whole in one call.
#[derive(Default)]
pub struct StreamResampler {
    states: HashMap<RateKey, ResamplerState>,
}

impl StreamResampler {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
        }
    }

    /// Resample a little-endian PCM16 chunk from `in_rate` to
    /// `target_rate`, using (and updating) this instance's persistent
    /// state for that rate pair.
    pub fn resample(&mut self, pcm: &[u8], in_rate: u32, target_rate: u32) -> Result<Vec<u8>> {
        if pcm.len() % 2 != 0 {
            return Err(Error::OddPcmLength(pcm.len()));
        }
        if in_rate == target_rate {
            return Ok(pcm.to_vec());
        }
        if in_rate == 0 || target_rate == 0 {
            return Err(Error::UnsupportedRateConversion {
                from: in_rate,
                to: target_rate,
            });
        }

        let samples: Vec<f64> = pcm
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f64)
            .collect();

        let state = self
            .states
            .entry((in_rate, target_rate))
            .or_insert_with(|| ResamplerState::new(in_rate, target_rate));

        let out_samples = state.process(&samples);

        let mut out = Vec::with_capacity(out_samples.len() * 2);
        for s in out_samples {
            let clamped = s.clamp(i16::MIN as f64, i16::MAX as f64);
            out.extend_from_slice(&(clamped as i16).to_le_bytes());
        }
        Ok(out)
    }

    /// Drop all carried filter state, e.g. when a call ends.
    pub fn reset(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm16_from_i16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn mulaw_round_trip_is_lossy_but_close() {
        let codec = CodecTranscoder::new();
        let original = pcm16_from_i16(&[0, 1000, -1000, 16000, -16000, 32000, -32000]);
        let mulaw = codec.pcm16_to_mulaw(&original).unwrap();
        assert_eq!(mulaw.len(), original.len() / 2);
        let back = codec.mulaw_to_pcm16(&mulaw);
        let back_samples: Vec<i16> = back
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        let orig_samples: Vec<i16> = original
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        for (o, b) in orig_samples.iter().zip(back_samples.iter()) {
            // G.711 is a lossy codec; allow a few percent of full scale.
            let tolerance = (o.unsigned_abs() as i32 / 20).max(64);
            assert!(
                (*o as i32 - *b as i32).abs() <= tolerance,
                "orig={o} back={b} tolerance={tolerance}"
            );
        }
    }

    #[test]
    fn mulaw_silence_round_trips_exactly() {
        let codec = CodecTranscoder::new();
        let original = pcm16_from_i16(&[0, 0, 0, 0]);
        let mulaw = codec.pcm16_to_mulaw(&original).unwrap();
        let back = codec.mulaw_to_pcm16(&mulaw);
        assert_eq!(back, original);
    }

    #[test]
    fn odd_length_pcm_is_rejected() {
        let codec = CodecTranscoder::new();
        assert!(matches!(
            codec.pcm16_to_mulaw(&[0u8; 3]),
            Err(Error::OddPcmLength(3))
        ));
    }

    #[test]
    fn resample_identity_when_rates_match() {
        let mut r = StreamResampler::new();
        let pcm = pcm16_from_i16(&[1, 2, 3, 4, 5]);
        let out = r.resample(&pcm, 8000, 8000).unwrap();
        assert_eq!(out, pcm);
    }

    #[test]
    fn resample_state_preserved_across_chunks() {
        let samples: Vec<i16> = (0..400).map(|i| ((i % 100) * 100) as i16).collect();
        let pcm = pcm16_from_i16(&samples);

        let mut whole = StreamResampler::new();
        let whole_out = whole.resample(&pcm, 8000, 16000).unwrap();

        let mid = pcm.len() / 2 / 2 * 2; // stay on a sample boundary
        let mut split = StreamResampler::new();
        let mut split_out = split.resample(&pcm[..mid], 8000, 16000).unwrap();
        split_out.extend(split.resample(&pcm[mid..], 8000, 16000).unwrap());

        let len_diff = (whole_out.len() as i64 - split_out.len() as i64).unsigned_abs();
        assert!(len_diff <= 4, "len diff {len_diff} exceeds tolerance");

        let common = whole_out.len().min(split_out.len());
        for i in (0..common).step_by(2) {
            let w = i16::from_le_bytes([whole_out[i], whole_out[i + 1]]);
            let s = i16::from_le_bytes([split_out[i], split_out[i + 1]]);
            assert!((w as i32 - s as i32).abs() <= 4, "sample {i}: {w} vs {s}");
        }
    }

    #[test]
    fn resample_output_length_matches_ratio() {
        let samples: Vec<i16> = vec![0; 1600];
        let pcm = pcm16_from_i16(&samples);
        let mut r = StreamResampler::new();
        let out = r.resample(&pcm, 8000, 16000).unwrap();
        let out_samples = out.len() / 2;
        let expected = samples.len() * 2;
        assert!((out_samples as i64 - expected as i64).abs() <= 2);
    }

    #[test]
    fn zero_rate_is_rejected() {
        let mut r = StreamResampler::new();
        let pcm = pcm16_from_i16(&[1, 2, 3]);
        assert!(r.resample(&pcm, 0, 8000).is_err());
    }
}
