//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a face crop so its five landmarks land on the InsightFace
//! reference positions of a 112×112 ArcFace input.

use crate::frame::Frame;

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Least-squares similarity transform taking `src` onto `dst`.
///
/// Returns `[a, -b, tx, b, a, ty]`:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
/// Closed form on centred points: `a = Σ(s·d) / Σ|s|²`,
/// `b = Σ(s × d) / Σ|s|²`, translation from the centroids.
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    let n = src.len() as f32;
    let centroid = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (sx_mean, sy_mean) = centroid(src);
    let (dx_mean, dy_mean) = centroid(dst);

    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    let mut src_norm = 0.0f32;
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (sx - sx_mean, sy - sy_mean);
        let (dx, dy) = (dx - dx_mean, dy - dy_mean);
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
        src_norm += sx * sx + sy * sy;
    }

    if src_norm < 1e-12 {
        // Collapsed landmarks: fall back to a pure translation.
        return [1.0, 0.0, dx_mean - sx_mean, 0.0, 1.0, dy_mean - sy_mean];
    }

    let a = dot / src_norm;
    let b = cross / src_norm;
    let tx = dx_mean - (a * sx_mean - b * sy_mean);
    let ty = dy_mean - (b * sx_mean + a * sy_mean);

    [a, -b, tx, b, a, ty]
}

/// Apply a similarity warp to an RGB frame, producing an `out_size` square.
///
/// Bilinear sampling; pixels mapped from outside the source are black.
fn warp_affine(frame: &Frame, matrix: &[f32; 6], out_size: u32) -> Frame {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);
    let out = out_size as usize;
    let mut data = vec![0u8; out * out * 3];

    // Inverse of [[a, -b], [b, a]] is [[a, b], [-b, a]] / (a² + b²).
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return Frame::new(data, out_size, out_size, frame.sequence);
    }
    let ia = a / det;
    let ib = b / det;

    let (w, h) = (frame.width as i64, frame.height as i64);
    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < w && y >= 0 && y < h {
            frame.data[(y * w + x) as usize * 3 + c] as f32
        } else {
            0.0
        }
    };

    for oy in 0..out {
        for ox in 0..out {
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor() as i64;
            let y0 = sy.floor() as i64;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            for c in 0..3 {
                let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1, c) * fx * fy;
                data[(oy * out + ox) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    Frame::new(data, out_size, out_size, frame.sequence)
}

/// Align a face crop to the canonical 112×112 ArcFace input.
///
/// `landmarks` are in the crop's own pixel coordinates.
pub fn align_face(crop: &Frame, landmarks: &[(f32, f32); 5]) -> Frame {
    let matrix = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS_112);
    warp_affine(crop, &matrix, ALIGNED_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_112;
        let m = estimate_similarity_transform(&pts, &pts);
        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a2 = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn test_scaled_transform() {
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112);
        assert!((m[0] - 0.5).abs() < 1e-3, "a = {}, expected 0.5", m[0]);
        assert!(m[3].abs() < 1e-3, "b = {}", m[3]);
    }

    #[test]
    fn test_translated_transform() {
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x + 30.0, y - 12.0));
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112);
        assert!((m[0] - 1.0).abs() < 1e-4);
        assert!((m[2] + 30.0).abs() < 1e-3, "tx = {}", m[2]);
        assert!((m[5] - 12.0).abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn test_collapsed_landmarks_do_not_panic() {
        let src = [(10.0, 10.0); 5];
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112);
        assert!(m.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_align_face_output_size() {
        let crop = Frame::filled(200, 240, [128, 64, 32], 0);
        let aligned = align_face(&crop, &REFERENCE_LANDMARKS_112);
        assert_eq!((aligned.width, aligned.height), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert_eq!(aligned.data.len(), (ALIGNED_SIZE * ALIGNED_SIZE * 3) as usize);
        // Reference landmarks map onto themselves: interior keeps source colour.
        assert_eq!(aligned.pixel(56, 56), Some([128, 64, 32]));
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        // Paint a bright patch at the left eye; after alignment it should sit
        // near the reference left-eye position.
        let mut crop = Frame::filled(200, 200, [0, 0, 0], 0);
        let landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for dy in -2..=2 {
            for dx in -2..=2 {
                crop.put_pixel(80 + dx, 60 + dy, [255, 255, 255]);
            }
        }

        let aligned = align_face(&crop, &landmarks);

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as u32;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as u32;
        let mut max_val = 0u8;
        for y in ref_y - 1..=ref_y + 1 {
            for x in ref_x - 1..=ref_x + 1 {
                max_val = max_val.max(aligned.pixel(x, y).unwrap()[0]);
            }
        }
        assert!(max_val > 100, "expected bright patch near ({ref_x}, {ref_y}), max={max_val}");
    }
}
