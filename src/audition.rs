//! Audition file loading and looped playback
//!
//! Files are decoded up front with Symphonia into interleaved stereo frames;
//! the player then steps through them inside the audio callback with linear
//! interpolation so material at a foreign sample rate plays at pitch.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;

/// One stereo frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoFrame {
    pub left: f32,
    pub right: f32,
}

impl StereoFrame {
    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    pub fn silence() -> Self {
        Self {
            left: 0.0,
            right: 0.0,
        }
    }
}

/// Metadata for a decoded audition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleInfo {
    pub name: String,
    pub path: String,
    pub sample_rate: u32,
    pub channels: u32,
    pub duration_secs: f32,
    pub num_frames: usize,
}

/// A fully decoded audio file, stereo frames at its native rate.
pub struct AudioSample {
    pub info: SampleInfo,
    pub data: Vec<StereoFrame>,
}

impl AudioSample {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let file = File::open(path).map_err(|e| format!("Failed to open file: {}", e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| format!("Failed to probe format: {}", e))?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| "No audio track found".to_string())?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| "Unknown sample rate".to_string())?;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u32)
            .unwrap_or(2);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| format!("Failed to create decoder: {}", e))?;

        let mut frames: Vec<StereoFrame> = Vec::new();
        loop {
            match format.next_packet() {
                Ok(packet) => {
                    if packet.track_id() != track_id {
                        continue;
                    }
                    match decoder.decode(&packet) {
                        Ok(decoded) => append_buffer(&decoded, &mut frames, channels),
                        // Skip corrupt packets, keep what decodes.
                        Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
                        Err(e) => return Err(format!("Decode error: {}", e)),
                    }
                }
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(format!("Format error: {}", e)),
            }
        }

        let duration_secs = frames.len() as f32 / sample_rate as f32;
        log::info!(
            "Loaded '{}': {} frames, {} Hz, {} ch",
            name,
            frames.len(),
            sample_rate,
            channels
        );

        Ok(Self {
            info: SampleInfo {
                name,
                path: path.to_string_lossy().to_string(),
                sample_rate,
                channels,
                duration_secs,
                num_frames: frames.len(),
            },
            data: frames,
        })
    }

    fn frame(&self, position: usize) -> StereoFrame {
        self.data
            .get(position)
            .copied()
            .unwrap_or_else(StereoFrame::silence)
    }
}

fn push_frames<S: Sample + Copy>(
    buf: &AudioBuffer<S>,
    output: &mut Vec<StereoFrame>,
    channels: u32,
    to_f32: impl Fn(S) -> f32,
) {
    for frame in 0..buf.frames() {
        let left = to_f32(buf.chan(0)[frame]);
        let right = if channels > 1 {
            to_f32(buf.chan(1)[frame])
        } else {
            left
        };
        output.push(StereoFrame::new(left, right));
    }
}

fn append_buffer(buf: &AudioBufferRef, output: &mut Vec<StereoFrame>, channels: u32) {
    match buf {
        AudioBufferRef::F32(b) => push_frames(b.as_ref(), output, channels, |s| s),
        AudioBufferRef::F64(b) => push_frames(b.as_ref(), output, channels, |s| s as f32),
        AudioBufferRef::S8(b) => push_frames(b.as_ref(), output, channels, |s| s as f32 / 128.0),
        AudioBufferRef::S16(b) => {
            push_frames(b.as_ref(), output, channels, |s| s as f32 / 32768.0)
        }
        AudioBufferRef::S24(b) => push_frames(b.as_ref(), output, channels, |s| {
            s.inner() as f32 / 8_388_608.0
        }),
        AudioBufferRef::S32(b) => push_frames(b.as_ref(), output, channels, |s| {
            s as f32 / 2_147_483_648.0
        }),
        AudioBufferRef::U8(b) => push_frames(b.as_ref(), output, channels, |s| {
            (s as f32 - 128.0) / 128.0
        }),
        AudioBufferRef::U16(b) => push_frames(b.as_ref(), output, channels, |s| {
            (s as f32 - 32768.0) / 32768.0
        }),
        AudioBufferRef::U24(b) => push_frames(b.as_ref(), output, channels, |s| {
            (s.inner() as f32 - 8_388_608.0) / 8_388_608.0
        }),
        AudioBufferRef::U32(b) => push_frames(b.as_ref(), output, channels, |s| {
            ((s as f64 - 2_147_483_648.0) / 2_147_483_648.0) as f32
        }),
    }
}

/// Looping playback cursor over a loaded sample. Runs inside the audio
/// callback, so it never allocates.
pub struct SamplePlayer {
    sample: Option<AudioSample>,
    position: usize,
    fractional: f32,
    speed_ratio: f32,
    playing: bool,
    looping: bool,
}

impl SamplePlayer {
    pub fn new() -> Self {
        Self {
            sample: None,
            position: 0,
            fractional: 0.0,
            speed_ratio: 1.0,
            playing: false,
            looping: true,
        }
    }

    /// Install a sample, stepping at the ratio between its native rate and
    /// the output stream rate.
    pub fn load(&mut self, sample: AudioSample, output_rate: u32) {
        self.speed_ratio = if output_rate > 0 {
            (sample.info.sample_rate as f32 / output_rate as f32).clamp(0.1, 4.0)
        } else {
            1.0
        };
        self.sample = Some(sample);
        self.position = 0;
        self.fractional = 0.0;
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn stop(&mut self) {
        self.playing = false;
        self.position = 0;
        self.fractional = 0.0;
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn has_sample(&self) -> bool {
        self.sample.is_some()
    }

    /// Next frame at the output rate, linearly interpolated.
    pub fn next_frame(&mut self) -> StereoFrame {
        if !self.playing {
            return StereoFrame::silence();
        }
        let sample = match &self.sample {
            Some(s) => s,
            None => return StereoFrame::silence(),
        };

        if self.position >= sample.data.len() {
            if self.looping {
                self.position = 0;
                self.fractional = 0.0;
            } else {
                self.playing = false;
                return StereoFrame::silence();
            }
        }

        let current = sample.frame(self.position);
        let next = sample.frame(self.position + 1);
        let frac = self.fractional;
        let out = StereoFrame::new(
            current.left * (1.0 - frac) + next.left * frac,
            current.right * (1.0 - frac) + next.right * frac,
        );

        self.fractional += self.speed_ratio;
        while self.fractional >= 1.0 {
            self.fractional -= 1.0;
            self.position += 1;
        }
        out
    }
}

impl Default for SamplePlayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_sample(frames: usize, rate: u32) -> AudioSample {
        AudioSample {
            info: SampleInfo {
                name: "ramp".to_string(),
                path: "ramp.wav".to_string(),
                sample_rate: rate,
                channels: 2,
                duration_secs: frames as f32 / rate as f32,
                num_frames: frames,
            },
            data: (0..frames)
                .map(|i| StereoFrame::new(i as f32, -(i as f32)))
                .collect(),
        }
    }

    #[test]
    fn test_silent_until_play() {
        let mut player = SamplePlayer::new();
        player.load(ramp_sample(8, 44100), 44100);
        assert_eq!(player.next_frame(), StereoFrame::silence());

        player.play();
        assert_eq!(player.next_frame(), StereoFrame::new(0.0, 0.0));
        assert_eq!(player.next_frame(), StereoFrame::new(1.0, -1.0));
    }

    #[test]
    fn test_loops_back_to_start() {
        let mut player = SamplePlayer::new();
        player.load(ramp_sample(4, 44100), 44100);
        player.play();

        for _ in 0..4 {
            player.next_frame();
        }
        assert_eq!(player.next_frame(), StereoFrame::new(0.0, 0.0));
        assert!(player.is_playing());
    }

    #[test]
    fn test_non_looping_stops_at_end() {
        let mut player = SamplePlayer::new();
        player.load(ramp_sample(4, 44100), 44100);
        player.set_looping(false);
        player.play();

        for _ in 0..4 {
            player.next_frame();
        }
        assert_eq!(player.next_frame(), StereoFrame::silence());
        assert!(!player.is_playing());
    }

    #[test]
    fn test_stop_rewinds() {
        let mut player = SamplePlayer::new();
        player.load(ramp_sample(8, 44100), 44100);
        player.play();
        player.next_frame();
        player.next_frame();

        player.stop();
        player.play();
        assert_eq!(player.next_frame(), StereoFrame::new(0.0, 0.0));
    }

    #[test]
    fn test_rate_mismatch_interpolates() {
        // 22050 Hz material through a 44100 Hz stream steps half a frame.
        let mut player = SamplePlayer::new();
        player.load(ramp_sample(8, 22050), 44100);
        player.play();

        assert_eq!(player.next_frame().left, 0.0);
        assert!((player.next_frame().left - 0.5).abs() < 1e-6);
        assert!((player.next_frame().left - 1.0).abs() < 1e-6);
    }
}
