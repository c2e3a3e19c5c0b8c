//! Demo producers used by the binary: a square spinning on a dark backdrop
//! and a silent audio track.

use image::{Rgba, RgbaImage};

use crate::{
    error::ExportResult,
    options::SampleFormat,
    source::{AudioChunk, AudioSource, FrameSource, Surface},
};

pub struct SpinningSquare {
    canvas: RgbaImage,
    /// Radians per second.
    speed: f64,
    background: Rgba<u8>,
    color: Rgba<u8>,
}

impl SpinningSquare {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
            speed: std::f64::consts::PI,
            background: Rgba([18, 18, 24, 255]),
            color: Rgba([240, 120, 40, 255]),
        }
    }

    fn draw(&mut self, time: f64) {
        let (width, height) = self.canvas.dimensions();
        let cx = width as f64 / 2.0;
        let cy = height as f64 / 2.0;
        let half = width.min(height) as f64 / 4.0;
        let (sin, cos) = (-(time * self.speed)).sin_cos();
        for (x, y, pixel) in self.canvas.enumerate_pixels_mut() {
            let dx = x as f64 + 0.5 - cx;
            let dy = y as f64 + 0.5 - cy;
            // rotate the sample point back into the square's frame
            let rx = dx * cos - dy * sin;
            let ry = dx * sin + dy * cos;
            *pixel = if rx.abs() <= half && ry.abs() <= half {
                self.color
            } else {
                self.background
            };
        }
    }
}

impl FrameSource for SpinningSquare {
    fn render_frame(&mut self, time: f64) -> ExportResult<Surface> {
        self.draw(time);
        let (width, height) = self.canvas.dimensions();
        Surface::new(width, height, self.canvas.as_raw().clone())
    }
}

pub struct Silence {
    sample_rate: u32,
    channels: u16,
    format: SampleFormat,
}

impl Silence {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            format: SampleFormat::default(),
        }
    }

    /// Sample layout of the delivered chunks.
    pub fn with_format(mut self, format: SampleFormat) -> Self {
        self.format = format;
        self
    }
}

impl AudioSource for Silence {
    fn render_audio(&mut self, time: f64, max_frames: usize) -> ExportResult<AudioChunk> {
        let offset = (time * self.sample_rate as f64).round() as u64;
        let mut chunk = AudioChunk::silent(offset, max_frames, self.channels, self.sample_rate);
        // zeros read the same in either layout
        chunk.format = self.format;
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_rotates_over_time() {
        let mut scene = SpinningSquare::new(64, 64);
        let start = scene.render_frame(0.0).unwrap();
        let quarter = scene.render_frame(0.25).unwrap();
        let half_turn = scene.render_frame(0.5).unwrap();
        assert_eq!(start.data.len(), 64 * 64 * 4);
        assert_ne!(start.data, quarter.data);
        // a square is symmetric under a quarter turn (pi rad/s * 0.5 s)
        assert_eq!(start.data, half_turn.data);
        // centre is always covered
        let centre = (32 * 64 + 32) * 4;
        assert_eq!(&start.data[centre..centre + 4], &[240, 120, 40, 255]);
    }

    #[test]
    fn silence_fills_requested_frames() {
        let mut silence = Silence::new(48_000, 2);
        let chunk = silence.render_audio(0.5, 1024).unwrap();
        assert_eq!(chunk.offset, 24_000);
        assert_eq!(chunk.frames, 1024);
        assert_eq!(chunk.samples.len(), 2048);
        assert!(chunk.samples.iter().all(|s| *s == 0.0));
        assert_eq!(chunk.format, SampleFormat::F32Interleaved);
        chunk.check().unwrap();
    }

    #[test]
    fn silence_uses_configured_format() {
        let mut silence = Silence::new(44_100, 2).with_format(SampleFormat::F32Planar);
        let chunk = silence.render_audio(0.0, 256).unwrap();
        assert_eq!(chunk.format, SampleFormat::F32Planar);
        assert_eq!(chunk.sample_rate, 44_100);
        assert_eq!(chunk.interleaved().len(), 512);
        chunk.check().unwrap();
    }
}
