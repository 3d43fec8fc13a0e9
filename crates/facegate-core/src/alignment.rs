//! Face alignment onto the descriptor network's 150x150 input chip.
//!
//! A least-squares similarity transform (scale, rotation, translation) maps
//! five detected landmarks onto fixed chip positions; the crop is then
//! resampled through the inverse transform.

/// Five-point landmarks: left eye, right eye, nose tip, left and right mouth corner.
pub type Landmarks = [(f32, f32); 5];

/// Edge length of the aligned chip.
pub const CHIP_SIZE: usize = 150;

/// Landmark positions in a 150x150 chip with 25% padding around the face.
const CHIP_LANDMARKS: Landmarks = [
    (54.0, 63.0),
    (96.0, 63.0),
    (75.0, 86.0),
    (59.0, 108.0),
    (91.0, 108.0),
];

/// 2x3 similarity matrix `[a, -b, tx, b, a, ty]`.
type Similarity = [f32; 6];

/// Closed-form least-squares similarity from `src` to `dst`.
///
/// Degenerate input (all source points coincide) yields `None`.
fn estimate_similarity(src: &Landmarks, dst: &Landmarks) -> Option<Similarity> {
    let n = src.len() as f32;
    let mean = |pts: &Landmarks| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (msx, msy) = mean(src);
    let (mdx, mdy) = mean(dst);

    let mut norm = 0.0f32;
    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (sx - msx, sy - msy);
        let (dx, dy) = (dx - mdx, dy - mdy);
        norm += sx * sx + sy * sy;
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
    }
    if norm < 1e-6 {
        return None;
    }

    let a = dot / norm;
    let b = cross / norm;
    let tx = mdx - (a * msx - b * msy);
    let ty = mdy - (b * msx + a * msy);
    Some([a, -b, tx, b, a, ty])
}

/// Resample `gray` through the inverse of `m` into a `size`x`size` chip.
///
/// Bilinear; samples outside the source repeat the nearest edge pixel.
fn warp(gray: &[u8], width: usize, height: usize, m: &Similarity, size: usize) -> Vec<u8> {
    let (a, b, tx, ty) = (m[0], m[3], m[2], m[5]);
    let det = a * a + b * b;
    let mut out = vec![0u8; size * size];
    if det < 1e-12 || width == 0 || height == 0 {
        return out;
    }

    let px = |x: i32, y: i32| -> f32 {
        let x = x.clamp(0, width as i32 - 1) as usize;
        let y = y.clamp(0, height as i32 - 1) as usize;
        gray[y * width + x] as f32
    };

    for oy in 0..size {
        for ox in 0..size {
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = (a * dx + b * dy) / det;
            let sy = (a * dy - b * dx) / det;

            let x0 = sx.floor();
            let y0 = sy.floor();
            let fx = sx - x0;
            let fy = sy - y0;
            let (x0, y0) = (x0 as i32, y0 as i32);

            let v = px(x0, y0) * (1.0 - fx) * (1.0 - fy)
                + px(x0 + 1, y0) * fx * (1.0 - fy)
                + px(x0, y0 + 1) * (1.0 - fx) * fy
                + px(x0 + 1, y0 + 1) * fx * fy;
            out[oy * size + ox] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Align a grayscale face crop to a [`CHIP_SIZE`]x[`CHIP_SIZE`] chip.
///
/// Returns `None` when the landmarks are degenerate.
pub fn align_face(gray: &[u8], width: u32, height: u32, landmarks: &Landmarks) -> Option<Vec<u8>> {
    let m = estimate_similarity(landmarks, &CHIP_LANDMARKS)?;
    Some(warp(gray, width as usize, height as usize, &m, CHIP_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_similarity() {
        let m = estimate_similarity(&CHIP_LANDMARKS, &CHIP_LANDMARKS).unwrap();
        let expected = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        for (got, want) in m.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-3, "{m:?}");
        }
    }

    #[test]
    fn test_half_scale_rotated_source() {
        // Source is the chip layout doubled and rotated 90 degrees.
        let src: Landmarks = CHIP_LANDMARKS.map(|(x, y)| (-2.0 * y + 400.0, 2.0 * x + 10.0));
        let m = estimate_similarity(&src, &CHIP_LANDMARKS).unwrap();
        let scale = (m[0] * m[0] + m[3] * m[3]).sqrt();
        assert!((scale - 0.5).abs() < 1e-3, "scale {scale}");

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(CHIP_LANDMARKS.iter()) {
            let x = m[0] * sx + m[1] * sy + m[2];
            let y = m[3] * sx + m[4] * sy + m[5];
            assert!((x - dx).abs() < 0.05 && (y - dy).abs() < 0.05);
        }
    }

    #[test]
    fn test_degenerate_landmarks() {
        let src: Landmarks = [(10.0, 10.0); 5];
        assert!(estimate_similarity(&src, &CHIP_LANDMARKS).is_none());
        assert!(align_face(&[0u8; 400], 20, 20, &src).is_none());
    }

    #[test]
    fn test_chip_size_and_uniform_fill() {
        let landmarks: Landmarks = CHIP_LANDMARKS.map(|(x, y)| (x * 0.5, y * 0.5));
        let chip = align_face(&vec![90u8; 80 * 80], 80, 80, &landmarks).unwrap();
        assert_eq!(chip.len(), CHIP_SIZE * CHIP_SIZE);
        assert!(chip.iter().all(|&p| p == 90));
    }

    #[test]
    fn test_landmark_lands_on_chip_position() {
        let (w, h) = (200usize, 200usize);
        let landmarks: Landmarks = [(80.0, 60.0), (120.0, 60.0), (100.0, 85.0), (85.0, 110.0), (115.0, 110.0)];
        let mut frame = vec![0u8; w * h];
        for y in 57..=63 {
            for x in 77..=83 {
                frame[y * w + x] = 255;
            }
        }

        let chip = align_face(&frame, w as u32, h as u32, &landmarks).unwrap();
        let (cx, cy) = (CHIP_LANDMARKS[0].0 as usize, CHIP_LANDMARKS[0].1 as usize);
        let peak = (cy - 2..=cy + 2)
            .flat_map(|y| (cx - 2..=cx + 2).map(move |x| (x, y)))
            .map(|(x, y)| chip[y * CHIP_SIZE + x])
            .max()
            .unwrap();
        assert!(peak > 100, "left eye patch should land near ({cx}, {cy}), max {peak}");
    }
}
