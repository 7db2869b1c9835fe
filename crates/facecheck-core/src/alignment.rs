//! Face alignment via 4-DOF similarity transform.
//!
//! Maps the five detected landmarks onto the canonical ArcFace positions and
//! warps the RGB raster into a 112×112 crop.

use crate::types::Raster;
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Forward similarity transform `dst = [[a, -b], [b, a]] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit from `src` to `dst` in closed form.
    ///
    /// Centering both point sets removes the translation, leaving a 2-parameter
    /// linear problem whose normal equations decouple.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let n = src.len() as f32;
        let (msx, msy) = centroid(src);
        let (mdx, mdy) = centroid(dst);

        let mut num_a = 0.0f32;
        let mut num_b = 0.0f32;
        let mut denom = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            num_a += sx * dx + sy * dy;
            num_b += sx * dy - sy * dx;
            denom += sx * sx + sy * sy;
        }

        if denom / n < 1e-12 {
            // All landmarks collapsed onto one point: translate only.
            return Self {
                a: 1.0,
                b: 0.0,
                tx: mdx - msx,
                ty: mdy - msy,
            };
        }

        let a = num_a / denom;
        let b = num_b / denom;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    /// Map an output coordinate back into source space.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let dx = x - self.tx;
        let dy = y - self.ty;
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

fn centroid(points: &[(f32, f32); 5]) -> (f32, f32) {
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
    (sx / n, sy / n)
}

/// Bilinear RGB sample; outside the source reads as black.
fn sample(src: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let fetch = |px: i64, py: i64| -> [f32; 3] {
        if px >= 0 && py >= 0 && (px as u32) < src.width() && (py as u32) < src.height() {
            let p = src.get_pixel(px as u32, py as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let tl = fetch(x0, y0);
    let tr = fetch(x0 + 1, y0);
    let bl = fetch(x0, y0 + 1);
    let br = fetch(x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bottom = bl[c] * (1.0 - fx) + br[c] * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn warp(src: &RgbImage, transform: &Similarity, size: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |ox, oy| {
        match transform.invert_point(ox as f32, oy as f32) {
            Some((sx, sy)) => sample(src, sx, sy),
            None => Rgb([0, 0, 0]),
        }
    })
}

/// Align a detected face to the canonical 112×112 RGB crop expected by ArcFace.
pub fn align_face(raster: &Raster, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112);
    warp(raster.as_image(), &transform, ALIGNED_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_112;
        let t = Similarity::estimate(&pts, &pts);
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3, "tx = {}", t.tx);
        assert!(t.ty.abs() < 1e-3, "ty = {}", t.ty);
    }

    #[test]
    fn test_scaled_transform() {
        // Landmarks at twice the reference scale should shrink by half.
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert!((t.a - 0.5).abs() < 1e-3, "a = {}", t.a);
        assert!(t.b.abs() < 1e-3, "b = {}", t.b);
    }

    #[test]
    fn test_translation_only() {
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x + 10.0, y - 4.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert!((t.a - 1.0).abs() < 1e-4);
        assert!((t.tx + 10.0).abs() < 1e-3, "tx = {}", t.tx);
        assert!((t.ty - 4.0).abs() < 1e-3, "ty = {}", t.ty);
    }

    #[test]
    fn test_collapsed_landmarks_do_not_panic() {
        let src = [(50.0, 50.0); 5];
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert_eq!(t.a, 1.0);
        assert_eq!(t.b, 0.0);
    }

    #[test]
    fn test_align_face_output_size() {
        let raster = Raster::from_rgb(RgbImage::from_pixel(640, 480, Rgb([128, 64, 32])));
        let aligned = align_face(&raster, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        // Reference landmarks on a uniform frame: the crop stays uniform.
        assert_eq!(aligned.get_pixel(56, 56), &Rgb([128, 64, 32]));
    }

    #[test]
    fn test_landmark_roundtrip_keeps_color() {
        let mut img = RgbImage::new(200, 200);
        let src_landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        // Red patch on the left eye.
        for y in 58..63 {
            for x in 78..83 {
                img.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }

        let aligned = align_face(&Raster::from_rgb(img), &src_landmarks);

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as u32;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as u32;
        let max_red = (ref_y - 1..=ref_y + 1)
            .flat_map(|y| (ref_x - 1..=ref_x + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y)[0])
            .max()
            .unwrap_or(0);
        assert!(max_red > 100, "expected red near ({ref_x}, {ref_y}), max={max_red}");
    }
}
