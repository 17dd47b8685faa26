//! Frequency-domain view of an image.
//!
//! Generation artifacts show up as periodic structure in the 2-D spectrum, so
//! the FFT-trained checkpoints see the log-magnitude spectrum instead of the
//! RGB pixels.

use image::{Rgb, RgbImage};
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;

/// BT.601 luma, rounded the way 8-bit grayscale conversion does it.
pub fn luma(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    ((u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114 + 500) / 1000) as u8
}

/// Destination index of `i` after moving the zero frequency to the centre.
pub fn fft_shift_index(i: usize, n: usize) -> usize {
    (i + n / 2) % n
}

/// Replaces `image` with its centred log-magnitude spectrum, rescaled to
/// `[0, 255]` and replicated across the three channels.
pub fn magnitude_spectrum(image: &RgbImage, epsilon: f64) -> RgbImage {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return RgbImage::new(width, height);
    }

    let mut rows: Vec<Complex<f64>> = image
        .pixels()
        .map(|p| Complex::new(f64::from(luma(p)), 0.0))
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    // Buffer is row-major, so one call transforms every row.
    planner.plan_fft_forward(w).process(&mut rows);

    let mut columns = vec![Complex::new(0.0, 0.0); w * h];
    for y in 0..h {
        for x in 0..w {
            columns[x * h + y] = rows[y * w + x];
        }
    }
    planner.plan_fft_forward(h).process(&mut columns);

    let mut log_magnitude = vec![0.0f64; w * h];
    for x in 0..w {
        for y in 0..h {
            let value = 20.0 * (columns[x * h + y].norm() + epsilon).ln();
            log_magnitude[fft_shift_index(y, h) * w + fft_shift_index(x, w)] = value;
        }
    }

    let (min, max) = log_magnitude
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;

    RgbImage::from_fn(width, height, |x, y| {
        let value = log_magnitude[y as usize * w + x as usize];
        let scaled = if range > 0.0 {
            (value - min) / range * 255.0
        } else {
            0.0
        };
        let level = scaled as u8;
        Rgb([level, level, level])
    })
}
