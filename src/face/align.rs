//! Face alignment and blob preparation for recognition models.
//!
//! Faces with five landmarks are warped onto the canonical ArcFace template
//! with a least-squares similarity transform; faces without landmarks are
//! used as cropped. Either way the result is normalized into an NCHW blob.

use image::RgbImage;

use super::detection::Point;

/// Canonical 5-point layout (eyes, nose, mouth corners) of a 112x112 face.
const ARCFACE_TEMPLATE: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

const TEMPLATE_SIZE: f32 = 112.0;

/// Preprocessed model input for a single face: `channels x height x width`
/// floats in channel-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl Blob {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Normalize an RGB image into a blob with `(v - 127.5) / 128`.
pub fn to_blob(face: &RgbImage) -> Blob {
    let (width, height) = face.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in face.enumerate_pixels() {
        let offset = (y * width + x) as usize;
        for c in 0..3 {
            data[c * plane + offset] = (pixel[c] as f32 - 127.5) / 128.0;
        }
    }

    Blob {
        channels: 3,
        height: height as usize,
        width: width as usize,
        data,
    }
}

/// Similarity transform `q = [a -b; b a] p + (tx, ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares estimate mapping `src` onto `dst`.
    ///
    /// Returns `None` for fewer than two points or degenerate (coincident)
    /// source points.
    pub fn estimate(src: &[Point], dst: &[Point]) -> Option<Self> {
        let n = src.len().min(dst.len());
        if n < 2 {
            return None;
        }

        let mean = |points: &[Point]| {
            let (sx, sy) = points[..n]
                .iter()
                .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
            Point::new(sx / n as f32, sy / n as f32)
        };
        let src_mean = mean(src);
        let dst_mean = mean(dst);

        let mut norm = 0.0f32;
        let mut a = 0.0f32;
        let mut b = 0.0f32;
        for (p, q) in src[..n].iter().zip(&dst[..n]) {
            let (px, py) = (p.x - src_mean.x, p.y - src_mean.y);
            let (qx, qy) = (q.x - dst_mean.x, q.y - dst_mean.y);
            norm += px * px + py * py;
            a += px * qx + py * qy;
            b += px * qy - py * qx;
        }
        if norm < f32::EPSILON {
            return None;
        }
        let (a, b) = (a / norm, b / norm);

        Some(Self {
            a,
            b,
            tx: dst_mean.x - (a * src_mean.x - b * src_mean.y),
            ty: dst_mean.y - (b * src_mean.x + a * src_mean.y),
        })
    }

    pub fn invert(&self, q: Point) -> Option<Point> {
        let det = self.a * self.a + self.b * self.b;
        if det < f32::EPSILON {
            return None;
        }
        let (x, y) = (q.x - self.tx, q.y - self.ty);
        Some(Point::new(
            (self.a * x + self.b * y) / det,
            (-self.b * x + self.a * y) / det,
        ))
    }
}

/// Warp `face` so its landmarks land on the ArcFace template scaled to
/// `size` x `size`. Falls back to the unaligned face when there are not
/// exactly five landmarks or the transform is degenerate.
pub fn align(face: &RgbImage, landmarks: &[Point], size: u32) -> RgbImage {
    if landmarks.len() != ARCFACE_TEMPLATE.len() {
        return face.clone();
    }

    let scale = size as f32 / TEMPLATE_SIZE;
    let template: Vec<Point> = ARCFACE_TEMPLATE
        .iter()
        .map(|&(x, y)| Point::new(x * scale, y * scale))
        .collect();

    let Some(transform) = Similarity::estimate(landmarks, &template) else {
        return face.clone();
    };

    RgbImage::from_fn(size, size, |x, y| {
        transform
            .invert(Point::new(x as f32, y as f32))
            .map(|src| sample_bilinear(face, src))
            .unwrap_or(image::Rgb([0, 0, 0]))
    })
}

fn sample_bilinear(image: &RgbImage, p: Point) -> image::Rgb<u8> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || p.x < 0.0 || p.y < 0.0 {
        return image::Rgb([0, 0, 0]);
    }
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    if p.x > max_x || p.y > max_y {
        return image::Rgb([0, 0, 0]);
    }

    let x0 = p.x.floor() as u32;
    let y0 = p.y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = p.x - x0 as f32;
    let fy = p.y - y0 as f32;

    let tl = image.get_pixel(x0, y0);
    let tr = image.get_pixel(x1, y0);
    let bl = image.get_pixel(x0, y1);
    let br = image.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = tl[c] as f32 * (1.0 - fx) + tr[c] as f32 * fx;
        let bottom = bl[c] as f32 * (1.0 - fx) + br[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    image::Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_points(size: u32) -> Vec<Point> {
        let scale = size as f32 / TEMPLATE_SIZE;
        ARCFACE_TEMPLATE
            .iter()
            .map(|&(x, y)| Point::new(x * scale, y * scale))
            .collect()
    }

    #[test]
    fn test_to_blob_layout_and_normalization() {
        let mut face = RgbImage::new(2, 1);
        face.put_pixel(0, 0, image::Rgb([255, 0, 128]));
        face.put_pixel(1, 0, image::Rgb([0, 255, 128]));

        let blob = to_blob(&face);

        assert_eq!((blob.channels, blob.height, blob.width), (3, 1, 2));
        assert_eq!(blob.len(), 6);
        // channel-major: R plane, then G, then B
        assert!((blob.data[0] - 127.5 / 128.0).abs() < 1e-6);
        assert!((blob.data[1] + 127.5 / 128.0).abs() < 1e-6);
        assert!((blob.data[2] + 127.5 / 128.0).abs() < 1e-6);
        assert!((blob.data[4] - 0.5 / 128.0).abs() < 1e-6);
    }

    #[test]
    fn test_estimate_recovers_known_transform() {
        let known = Similarity {
            a: 0.8,
            b: 0.3,
            tx: 4.0,
            ty: -2.0,
        };
        let src = template_points(112);
        let dst: Vec<Point> = src
            .iter()
            .map(|p| {
                Point::new(
                    known.a * p.x - known.b * p.y + known.tx,
                    known.b * p.x + known.a * p.y + known.ty,
                )
            })
            .collect();

        let estimated = Similarity::estimate(&src, &dst).unwrap();

        assert!((estimated.a - known.a).abs() < 1e-4);
        assert!((estimated.b - known.b).abs() < 1e-4);
        assert!((estimated.tx - known.tx).abs() < 1e-2);
        assert!((estimated.ty - known.ty).abs() < 1e-2);

        let back = estimated.invert(dst[2]).unwrap();
        assert!((back.x - src[2].x).abs() < 1e-2);
        assert!((back.y - src[2].y).abs() < 1e-2);
    }

    #[test]
    fn test_estimate_degenerate_points() {
        let same = vec![Point::new(3.0, 3.0); 5];
        assert!(Similarity::estimate(&same, &template_points(112)).is_none());
        assert!(Similarity::estimate(&same[..1], &template_points(112)[..1]).is_none());
    }

    #[test]
    fn test_align_on_template_is_identity() {
        let face = RgbImage::from_fn(112, 112, |x, y| image::Rgb([x as u8, y as u8, 7]));

        let aligned = align(&face, &template_points(112), 112);

        assert_eq!(aligned.dimensions(), (112, 112));
        assert_eq!(aligned.get_pixel(56, 56), face.get_pixel(56, 56));
        assert_eq!(aligned.get_pixel(10, 100), face.get_pixel(10, 100));
    }

    #[test]
    fn test_align_without_landmarks_keeps_face() {
        let face = RgbImage::from_pixel(112, 112, image::Rgb([9, 9, 9]));
        assert_eq!(align(&face, &[], 112), face);
    }
}
