//! Synthetic face video
//!
//! Generates a small RGB video of a flat-shaded face whose skin colour is
//! modulated by a pulse wave with jittered beat-to-beat intervals. Gaussian
//! sensor noise is added before quantisation, so region means follow the
//! pulse continuously instead of stepping between grey levels. Used for
//! end-to-end tests and by `rppg synth`.

use crate::error::ComputeError;
use crate::source::FrameSource;
use crate::types::Frame;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::f64::consts::PI;

pub const FRAME_WIDTH: u32 = 160;
pub const FRAME_HEIGHT: u32 = 120;
pub const FACE_X: u32 = 48;
pub const FACE_Y: u32 = 20;
pub const FACE_WIDTH: u32 = 64;
pub const FACE_HEIGHT: u32 = 80;

const BACKGROUND: [f64; 3] = [40.0, 60.0, 90.0];
const EYE: [f64; 3] = [50.0, 40.0, 40.0];

/// Light skin tone
pub const SKIN_LIGHT: [f64; 3] = [205.0, 150.0, 125.0];
/// Dark skin tone
pub const SKIN_DARK: [f64; 3] = [95.0, 64.0, 50.0];

/// Pulse amplitude per channel (grey levels)
const PULSE_GAIN: [f64; 3] = [1.0, 3.0, 0.5];

/// Deterministic synthetic face video
pub struct SyntheticFaceVideo {
    fps: f64,
    total_frames: usize,
    index: usize,
    rng: StdRng,
    /// Beat onset times (ms)
    beats: Vec<f64>,
    skin: [f64; 3],
    /// Per-pixel noise standard deviation (grey levels)
    noise_sd: f64,
    dropout_every: Option<usize>,
}

impl SyntheticFaceVideo {
    /// `duration_sec` of video at `fps` with a pulse averaging `bpm`.
    ///
    /// Beat intervals jitter by 45 ms (1 sd), pixels carry Gaussian noise of
    /// 2 grey levels (1 sd), and every 20th frame shows no face.
    pub fn new(fps: f64, duration_sec: f64, bpm: f64, seed: u64) -> Self {
        let fps = if fps > 0.0 { fps } else { 30.0 };
        let total_frames = (duration_sec.max(0.0) * fps).round() as usize;
        let mut video = Self {
            fps,
            total_frames,
            index: 0,
            rng: StdRng::seed_from_u64(seed),
            beats: Vec::new(),
            skin: SKIN_LIGHT,
            noise_sd: 2.0,
            dropout_every: Some(20),
        };
        video.beats = video.beat_times(bpm, 45.0, duration_sec);
        video
    }

    /// Replace the beat sequence with a new mean rate and jitter (ms, 1 sd)
    pub fn with_rhythm(mut self, bpm: f64, jitter_ms: f64) -> Self {
        let duration_sec = self.total_frames as f64 / self.fps;
        self.beats = self.beat_times(bpm, jitter_ms, duration_sec);
        self
    }

    /// Per-pixel Gaussian noise standard deviation (grey levels)
    pub fn with_noise(mut self, sd: f64) -> Self {
        self.noise_sd = if sd.is_finite() { sd.max(0.0) } else { 0.0 };
        self
    }

    /// Base skin colour (RGB)
    pub fn with_skin(mut self, rgb: [f64; 3]) -> Self {
        self.skin = rgb;
        self
    }

    /// Drop the face from every `n`th frame; `None` keeps it in all frames
    pub fn with_dropout(mut self, every: Option<usize>) -> Self {
        self.dropout_every = every.filter(|n| *n > 0);
        self
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn beats_ms(&self) -> &[f64] {
        &self.beats
    }

    fn beat_times(&mut self, bpm: f64, jitter_ms: f64, duration_sec: f64) -> Vec<f64> {
        let mean_rr = 60_000.0 / bpm.clamp(20.0, 250.0);
        let end = duration_sec * 1000.0 + 2.0 * mean_rr;
        let mut beats = Vec::new();
        // Random start phase
        let mut t = -self.rng.gen_range(0.0..mean_rr);
        while t < end {
            beats.push(t);
            let z: f64 = self.rng.sample(StandardNormal);
            t += (mean_rr + jitter_ms * z).clamp(0.7 * mean_rr, 1.3 * mean_rr);
        }
        beats
    }

    /// Pulse waveform in [-1, 1]; maximum at each beat
    fn pulse(&self, t_ms: f64) -> f64 {
        let k = self.beats.partition_point(|b| *b <= t_ms);
        if k == 0 || k >= self.beats.len() {
            return 0.0;
        }
        let (start, end) = (self.beats[k - 1], self.beats[k]);
        let phase = (t_ms - start) / (end - start);
        (2.0 * PI * phase).cos()
    }

    /// Slow illumination drift, well below the pulse band
    fn drift(t_ms: f64) -> f64 {
        1.5 * (2.0 * PI * 0.05 * t_ms / 1000.0).sin()
    }

    fn render(&mut self, t_ms: f64, face_visible: bool) -> Vec<u8> {
        let pulse = self.pulse(t_ms);
        let drift = Self::drift(t_ms);

        let eye_rows = (
            FACE_Y as f64 + 0.36 * FACE_HEIGHT as f64,
            FACE_Y as f64 + 0.46 * FACE_HEIGHT as f64,
        );
        let eye_cols = [(0.18, 0.40), (0.60, 0.82)].map(|(a, b)| {
            (
                FACE_X as f64 + a * FACE_WIDTH as f64,
                FACE_X as f64 + b * FACE_WIDTH as f64,
            )
        });

        let mut data = Vec::with_capacity((FRAME_WIDTH * FRAME_HEIGHT * 3) as usize);
        for y in 0..FRAME_HEIGHT {
            for x in 0..FRAME_WIDTH {
                let in_face = face_visible
                    && (FACE_X..FACE_X + FACE_WIDTH).contains(&x)
                    && (FACE_Y..FACE_Y + FACE_HEIGHT).contains(&y);
                let (fx, fy) = (x as f64, y as f64);
                let in_eye = in_face
                    && fy >= eye_rows.0
                    && fy < eye_rows.1
                    && eye_cols.iter().any(|(a, b)| fx >= *a && fx < *b);

                let base = if in_eye {
                    EYE
                } else if in_face {
                    [
                        self.skin[0] + PULSE_GAIN[0] * pulse,
                        self.skin[1] + PULSE_GAIN[1] * pulse,
                        self.skin[2] + PULSE_GAIN[2] * pulse,
                    ]
                } else {
                    BACKGROUND
                };
                for channel in base {
                    let noise = if self.noise_sd > 0.0 {
                        let z: f64 = self.rng.sample(StandardNormal);
                        z * self.noise_sd
                    } else {
                        0.0
                    };
                    data.push((channel + drift + noise).round().clamp(0.0, 255.0) as u8);
                }
            }
        }
        data
    }
}

impl FrameSource for SyntheticFaceVideo {
    fn next_frame(&mut self) -> Result<Option<Frame>, ComputeError> {
        if self.index >= self.total_frames {
            return Ok(None);
        }
        let i = self.index;
        self.index += 1;

        let t_ms = i as f64 * 1000.0 / self.fps;
        let visible = self.dropout_every.map_or(true, |n| i % n != n - 1);
        let data = self.render(t_ms, visible);
        Frame::new(FRAME_WIDTH, FRAME_HEIGHT, t_ms, data).map(Some)
    }

    fn frame_rate(&self) -> Option<f64> {
        Some(self.fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_count_and_dropout() {
        let mut video = SyntheticFaceVideo::new(30.0, 2.0, 72.0, 1).with_noise(0.0);
        assert_eq!(video.total_frames(), 60);

        let mut frames = Vec::new();
        while let Some(frame) = video.next_frame().unwrap() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 60);

        // Face centre is skin except on dropout frames (index 19, 39, 59)
        let cx = FACE_X + FACE_WIDTH / 2;
        let cy = FACE_Y + 10;
        assert!(frames[0].pixel(cx, cy)[0] > 190);
        assert!(frames[19].pixel(cx, cy)[0] < 60);
        assert!(frames[20].pixel(cx, cy)[0] > 190);
    }

    #[test]
    fn test_seed_is_deterministic() {
        let mut a = SyntheticFaceVideo::new(30.0, 1.0, 80.0, 42);
        let mut b = SyntheticFaceVideo::new(30.0, 1.0, 80.0, 42);
        let fa = a.next_frame().unwrap().unwrap();
        let fb = b.next_frame().unwrap().unwrap();
        assert_eq!(fa.as_bytes(), fb.as_bytes());
        assert_eq!(a.beats_ms(), b.beats_ms());
    }

    #[test]
    fn test_beat_intervals_follow_rate() {
        let video = SyntheticFaceVideo::new(30.0, 60.0, 60.0, 9).with_rhythm(60.0, 0.0);
        for pair in video.beats_ms().windows(2) {
            assert!((pair[1] - pair[0] - 1000.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_skin_brightens_on_beat() {
        let mut video = SyntheticFaceVideo::new(30.0, 5.0, 60.0, 5)
            .with_rhythm(60.0, 0.0)
            .with_noise(0.0)
            .with_dropout(None);
        let beat = video.beats_ms()[2];
        let on = video.render(beat, true);
        let off = video.render(beat + 500.0, true);
        let idx = (((FACE_Y + 10) * FRAME_WIDTH + FACE_X + FACE_WIDTH / 2) * 3 + 1) as usize;
        assert!(on[idx] > off[idx]);
    }

    #[test]
    fn test_region_mean_follows_pulse_between_grey_levels() {
        let mut video = SyntheticFaceVideo::new(30.0, 2.0, 75.0, 21)
            .with_rhythm(75.0, 0.0)
            .with_dropout(None);
        // 32 x 15 block of forehead skin
        let (x0, y0) = (FACE_X + 16, FACE_Y + 8);
        let mut t_ms = 0.0;
        while t_ms < 1600.0 {
            let expected = SKIN_LIGHT[1] + PULSE_GAIN[1] * video.pulse(t_ms) + SyntheticFaceVideo::drift(t_ms);
            let data = video.render(t_ms, true);
            let mut sum = 0.0;
            for y in y0..y0 + 15 {
                for x in x0..x0 + 32 {
                    sum += data[((y * FRAME_WIDTH + x) * 3 + 1) as usize] as f64;
                }
            }
            let mean = sum / (32.0 * 15.0);
            assert!((mean - expected).abs() < 0.35, "t {t_ms}: mean {mean} vs {expected}");
            t_ms += 1000.0 / 30.0;
        }
    }

    #[test]
    fn test_dark_skin_tone() {
        let mut video = SyntheticFaceVideo::new(30.0, 1.0, 70.0, 4)
            .with_skin(SKIN_DARK)
            .with_noise(0.0)
            .with_dropout(None);
        let frame = video.next_frame().unwrap().unwrap();
        let [r, g, _] = frame.pixel(FACE_X + FACE_WIDTH / 2, FACE_Y + 10);
        assert!(r < 100 && g < 70, "{r} {g}");
    }
}
