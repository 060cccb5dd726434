//! Warp a detected face onto the canonical ArcFace 112×112 layout.
//!
//! A similarity transform (rotation, uniform scale, translation) is fitted in
//! closed form from the reference landmarks to the detected ones, so every
//! output pixel maps straight to a source position without inverting anything.

use image::{Rgb, RgbImage};

use crate::recognizer::ARCFACE_INPUT_SIZE;

/// InsightFace reference landmarks for a 112×112 crop.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Below this scale the detected landmarks have collapsed to a point.
const MIN_SCALE: f64 = 1e-6;

/// `(x, y) -> (a·x - b·y + tx, b·x + a·y + ty)`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f64,
    b: f64,
    tx: f64,
    ty: f64,
}

impl Similarity {
    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    fn scale(&self) -> f64 {
        self.a.hypot(self.b)
    }
}

/// Least-squares similarity taking `from` onto `to`.
fn estimate(from: &[(f32, f32); 5], to: &[(f32, f32); 5]) -> Option<Similarity> {
    let n = from.len() as f64;
    let mean = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts
            .iter()
            .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + f64::from(x), sy + f64::from(y)));
        (sx / n, sy / n)
    };
    let (fx, fy) = mean(from);
    let (tx, ty) = mean(to);

    let (mut dot, mut cross, mut norm) = (0.0, 0.0, 0.0);
    for (&(px, py), &(qx, qy)) in from.iter().zip(to.iter()) {
        let (px, py) = (f64::from(px) - fx, f64::from(py) - fy);
        let (qx, qy) = (f64::from(qx) - tx, f64::from(qy) - ty);
        dot += px * qx + py * qy;
        cross += px * qy - py * qx;
        norm += px * px + py * py;
    }
    if norm <= f64::EPSILON {
        return None;
    }

    let a = dot / norm;
    let b = cross / norm;
    let t = Similarity {
        a,
        b,
        tx: tx - (a * fx - b * fy),
        ty: ty - (b * fx + a * fy),
    };
    let finite = t.a.is_finite() && t.b.is_finite() && t.tx.is_finite() && t.ty.is_finite();
    (finite && t.scale() >= MIN_SCALE).then_some(t)
}

/// Aligned 112×112 face for the given landmarks, or `None` when they are degenerate.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> Option<RgbImage> {
    let to_source = estimate(&REFERENCE_LANDMARKS, landmarks)?;
    Some(RgbImage::from_fn(ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, |u, v| {
        let (x, y) = to_source.apply(f64::from(u), f64::from(v));
        bilinear(image, x as f32, y as f32)
    }))
}

/// Bilinear sample; pixels outside the frame read as black.
fn bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);

    let at = |px: i64, py: i64| -> [f32; 3] {
        if px < 0 || py < 0 || px >= w || py >= h {
            return [0.0; 3];
        }
        let p = image.get_pixel(px as u32, py as u32).0;
        [p[0] as f32, p[1] as f32, p[2] as f32]
    };

    let corners = [
        (at(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (at(x0 + 1, y0), fx * (1.0 - fy)),
        (at(x0, y0 + 1), (1.0 - fx) * fy),
        (at(x0 + 1, y0 + 1), fx * fy),
    ];
    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let v: f32 = corners.iter().map(|(p, weight)| p[c] * weight).sum();
        *value = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-4
    }

    fn mapped(f: impl Fn((f32, f32)) -> (f32, f32)) -> [(f32, f32); 5] {
        REFERENCE_LANDMARKS.map(f)
    }

    #[test]
    fn test_estimate_identity() {
        let t = estimate(&REFERENCE_LANDMARKS, &REFERENCE_LANDMARKS).unwrap();
        assert!(close(t.a, 1.0) && close(t.b, 0.0));
        assert!(close(t.tx, 0.0) && close(t.ty, 0.0));
    }

    #[test]
    fn test_estimate_scale_and_shift() {
        let to = mapped(|(x, y)| (x * 0.5 + 10.0, y * 0.5 + 20.0));
        let t = estimate(&REFERENCE_LANDMARKS, &to).unwrap();
        assert!(close(t.a, 0.5) && close(t.b, 0.0));
        assert!(close(t.tx, 10.0) && close(t.ty, 20.0));
    }

    #[test]
    fn test_estimate_quarter_turn() {
        let to = mapped(|(x, y)| (-y, x));
        let t = estimate(&REFERENCE_LANDMARKS, &to).unwrap();
        assert!(close(t.a, 0.0) && close(t.b, 1.0));
        let (x, y) = t.apply(3.0, 4.0);
        assert!(close(x, -4.0) && close(y, 3.0));
    }

    #[test]
    fn test_collapsed_landmarks_are_rejected() {
        let image = RgbImage::new(64, 64);
        assert!(align_face(&image, &[(5.0, 5.0); 5]).is_none());
        assert!(align_face(&image, &[(f32::NAN, 0.0); 5]).is_none());
    }

    #[test]
    fn test_identity_alignment_copies_pixels() {
        let image = RgbImage::from_fn(112, 112, |x, y| Rgb([x as u8, y as u8, (x + y) as u8]));
        let aligned = align_face(&image, &REFERENCE_LANDMARKS).unwrap();
        assert_eq!(aligned.dimensions(), (ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE));
        assert_eq!(aligned.get_pixel(0, 0), image.get_pixel(0, 0));
        assert_eq!(aligned.get_pixel(56, 72), image.get_pixel(56, 72));
        assert_eq!(aligned.get_pixel(100, 30), image.get_pixel(100, 30));
    }

    #[test]
    fn test_larger_face_is_scaled_down_onto_reference() {
        // Face drawn at twice the reference size, bright patch over the nose.
        let mut image = RgbImage::new(224, 224);
        for y in 137..151 {
            for x in 106..119 {
                image.put_pixel(x, y, Rgb([250, 250, 250]));
            }
        }
        let landmarks = mapped(|(x, y)| (x * 2.0, y * 2.0));

        let aligned = align_face(&image, &landmarks).unwrap();
        assert_eq!(aligned.get_pixel(56, 72).0, [250, 250, 250]);
        assert_eq!(aligned.get_pixel(10, 10).0, [0, 0, 0]);
    }

    #[test]
    fn test_bilinear_outside_is_black() {
        let image = RgbImage::from_pixel(4, 4, Rgb([200, 100, 50]));
        assert_eq!(bilinear(&image, -5.0, 1.0).0, [0, 0, 0]);
        assert_eq!(bilinear(&image, 1.5, 1.5).0, [200, 100, 50]);
        // Half a pixel past the edge blends with black.
        assert_eq!(bilinear(&image, 3.5, 1.0).0, [100, 50, 25]);
    }
}
