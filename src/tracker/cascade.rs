//! Skin-colour multi-scale cascade face detector
//!
//! Used when the crate is built without OpenCV, or when no Haar cascade file
//! is available. Each frame is reduced to a skin mask and a luminance plane
//! with integral images, then scanned with face-shaped windows
//! (height = 5/4 width) at growing scales. A window is a hit when it passes
//! three stages:
//!
//! 1. enough skin-coloured pixels
//! 2. enough luminance contrast relative to the window brightness
//! 3. an eye band darker than both the forehead band above and the cheek
//!    band below it (a Haar-like feature), again relative to brightness
//!
//! Skin is classified by chrominance (YCbCr) with only a low luma floor, so
//! darker skin and dim lighting pass stage 1. Stages 2 and 3 are ratios for
//! the same reason.
//!
//! Overlapping hits are grouped, the largest group is averaged, and the
//! result is tightened with skin projection profiles before the regions are
//! cut out.

use super::{FaceBox, RegionDetector};
use crate::config::{CascadeConfig, RegionLayout};
use crate::types::{FaceRois, Frame, Roi};

/// Frames wider than this are subsampled before scanning
const ANALYSIS_WIDTH: u32 = 320;

/// Overlap needed for two hits to join the same group
const GROUP_IOU: f64 = 0.3;

/// Bands as fractions of window height: (top, bottom)
const FOREHEAD_BAND: (f64, f64) = (0.08, 0.28);
const EYE_BAND: (f64, f64) = (0.30, 0.50);
const CHEEK_BAND: (f64, f64) = (0.55, 0.75);

/// Chrominance box for skin (BT.601 full-range YCbCr)
const SKIN_CR: (f64, f64) = (135.0, 180.0);
const SKIN_CB: (f64, f64) = (80.0, 130.0);
/// Pixels darker than this carry no usable chrominance
const SKIN_MIN_LUMA: f64 = 30.0;

struct IntegralImage {
    width: usize,
    sum: Vec<f64>,
}

impl IntegralImage {
    fn new(values: &[f64], width: usize, height: usize) -> Self {
        let stride = width + 1;
        let mut sum = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            let mut row = 0.0;
            for x in 0..width {
                row += values[y * width + x];
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
            }
        }
        Self { width, sum }
    }

    /// Sum over `[x0, x1) x [y0, y1)`
    fn rect(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
        let s = self.width + 1;
        self.sum[y1 * s + x1] - self.sum[y0 * s + x1] - self.sum[y1 * s + x0] + self.sum[y0 * s + x0]
    }
}

/// Downsampled planes of one frame
struct Planes {
    width: usize,
    height: usize,
    /// Subsampling step relative to the source frame
    step: u32,
    skin: IntegralImage,
    luma: IntegralImage,
    luma_sq: IntegralImage,
    skin_mask: Vec<bool>,
}

fn luma([r, g, b]: [u8; 3]) -> f64 {
    0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64
}

fn is_skin(px: [u8; 3]) -> bool {
    let [r, g, b] = px.map(|c| c as f64);
    let cr = 128.0 + 0.5 * r - 0.418688 * g - 0.081312 * b;
    let cb = 128.0 - 0.168736 * r - 0.331264 * g + 0.5 * b;
    luma(px) >= SKIN_MIN_LUMA
        && (SKIN_CR.0..=SKIN_CR.1).contains(&cr)
        && (SKIN_CB.0..=SKIN_CB.1).contains(&cb)
}

impl Planes {
    fn new(frame: &Frame) -> Self {
        let step = frame.width.div_ceil(ANALYSIS_WIDTH).max(1);
        let width = (frame.width / step) as usize;
        let height = (frame.height / step) as usize;
        let n = width * height;
        let mut skin = Vec::with_capacity(n);
        let mut luma = Vec::with_capacity(n);
        let mut luma_sq = Vec::with_capacity(n);
        let mut skin_mask = Vec::with_capacity(n);
        for y in 0..height {
            for x in 0..width {
                let px = frame.pixel(x as u32 * step, y as u32 * step);
                let l = self::luma(px);
                let s = is_skin(px);
                skin_mask.push(s);
                skin.push(if s { 1.0 } else { 0.0 });
                luma.push(l);
                luma_sq.push(l * l);
            }
        }
        Self {
            width,
            height,
            step,
            skin: IntegralImage::new(&skin, width, height),
            luma: IntegralImage::new(&luma, width, height),
            luma_sq: IntegralImage::new(&luma_sq, width, height),
            skin_mask,
        }
    }
}

/// One window that passed every stage
#[derive(Debug, Clone, Copy)]
struct Hit {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    eye_contrast: f64,
}

impl Hit {
    fn iou(&self, other: &Hit) -> f64 {
        let ix = (self.x + self.w).min(other.x + other.w) - self.x.max(other.x);
        let iy = (self.y + self.h).min(other.y + other.h) - self.y.max(other.y);
        if ix <= 0.0 || iy <= 0.0 {
            return 0.0;
        }
        let inter = ix * iy;
        inter / (self.w * self.h + other.w * other.h - inter)
    }
}

/// Sliding-window skin-colour cascade detector
pub struct SkinCascadeDetector {
    config: CascadeConfig,
    layout: RegionLayout,
}

impl SkinCascadeDetector {
    pub fn new(config: CascadeConfig, layout: RegionLayout) -> Self {
        Self { config, layout }
    }

    /// Face bounding box in source-frame pixels, with a confidence
    pub fn detect_face(&self, frame: &Frame) -> Option<(FaceBox, f64)> {
        let planes = Planes::new(frame);
        let hits = self.scan(&planes);
        if hits.is_empty() {
            return None;
        }

        let group = best_group(&hits);
        if group.len() < self.config.min_neighbors {
            return None;
        }
        let n = group.len() as f64;
        let avg = |f: fn(&Hit) -> f64| group.iter().map(|h| f(h)).sum::<f64>() / n;
        let (x, y, w, h) = (avg(|h| h.x), avg(|h| h.y), avg(|h| h.w), avg(|h| h.h));
        let eye_contrast = avg(|h| h.eye_contrast);

        let (x, y, w, h) = refine(&planes, x, y, w, h);

        let support = n / (n + 2.0);
        let contrast = (eye_contrast / (3.0 * self.config.min_eye_contrast)).min(1.0);
        let confidence = 0.5 * support + 0.5 * contrast;

        let step = planes.step as f64;
        Some((
            FaceBox {
                x: x * step,
                y: y * step,
                width: w * step,
                height: h * step,
            },
            confidence,
        ))
    }

    fn scan(&self, planes: &Planes) -> Vec<Hit> {
        let cfg = &self.config;
        let mut hits = Vec::new();
        let mut size = cfg.min_face_size.max(8) as f64;

        loop {
            let w = size.round() as usize;
            let h = (size * 1.25).round() as usize;
            if w > planes.width || h > planes.height {
                break;
            }
            let stride = ((w as f64 * cfg.step_fraction) as usize).max(2);
            let mut y = 0;
            while y + h <= planes.height {
                let mut x = 0;
                while x + w <= planes.width {
                    if let Some(eye_contrast) = self.evaluate(planes, x, y, w, h) {
                        hits.push(Hit {
                            x: x as f64,
                            y: y as f64,
                            w: w as f64,
                            h: h as f64,
                            eye_contrast,
                        });
                    }
                    x += stride;
                }
                y += stride;
            }
            let next = size * cfg.scale_factor;
            size = if next.round() <= size.round() { size + 1.0 } else { next };
        }
        hits
    }

    /// Run the three stages on one window; returns the relative eye-band contrast on success
    fn evaluate(&self, planes: &Planes, x: usize, y: usize, w: usize, h: usize) -> Option<f64> {
        let cfg = &self.config;
        let area = (w * h) as f64;

        let skin_ratio = planes.skin.rect(x, y, x + w, y + h) / area;
        if skin_ratio < cfg.min_skin_ratio {
            return None;
        }

        let mean = planes.luma.rect(x, y, x + w, y + h) / area;
        if mean <= 0.0 {
            return None;
        }
        let var = planes.luma_sq.rect(x, y, x + w, y + h) / area - mean * mean;
        if var.max(0.0).sqrt() / mean < cfg.min_contrast {
            return None;
        }

        let band = |(top, bottom): (f64, f64)| {
            let y0 = y + (h as f64 * top) as usize;
            let y1 = (y + (h as f64 * bottom) as usize).max(y0 + 1);
            planes.luma.rect(x, y0, x + w, y1) / (w * (y1 - y0)) as f64
        };
        let eye = band(EYE_BAND);
        let contrast = (band(FOREHEAD_BAND) - eye).min(band(CHEEK_BAND) - eye) / mean;
        (contrast >= cfg.min_eye_contrast).then_some(contrast)
    }
}

/// Group hits transitively by overlap and return the largest group
/// (ties broken by the larger mean window).
fn best_group(hits: &[Hit]) -> Vec<Hit> {
    let mut labels: Vec<usize> = (0..hits.len()).collect();
    fn root(labels: &mut [usize], mut i: usize) -> usize {
        while labels[i] != i {
            labels[i] = labels[labels[i]];
            i = labels[i];
        }
        i
    }
    for i in 0..hits.len() {
        for j in (i + 1)..hits.len() {
            if hits[i].iou(&hits[j]) >= GROUP_IOU {
                let (a, b) = (root(&mut labels, i), root(&mut labels, j));
                if a != b {
                    labels[b] = a;
                }
            }
        }
    }

    let mut groups: std::collections::HashMap<usize, Vec<Hit>> = std::collections::HashMap::new();
    for i in 0..hits.len() {
        let r = root(&mut labels, i);
        groups.entry(r).or_default().push(hits[i]);
    }

    let mean_area = |g: &Vec<Hit>| g.iter().map(|h| h.w * h.h).sum::<f64>() / g.len() as f64;
    groups
        .into_values()
        .max_by(|a, b| {
            a.len()
                .cmp(&b.len())
                .then(mean_area(a).total_cmp(&mean_area(b)))
        })
        .unwrap_or_default()
}

/// Tighten a face box to the skin blob around it using row/column skin projections
fn refine(planes: &Planes, x: f64, y: f64, w: f64, h: f64) -> (f64, f64, f64, f64) {
    let x0 = (x - 0.5 * w).max(0.0) as usize;
    let y0 = (y - 0.5 * h).max(0.0) as usize;
    let x1 = ((x + 1.5 * w) as usize).min(planes.width);
    let y1 = ((y + 1.5 * h) as usize).min(planes.height);
    if x1 <= x0 + 2 || y1 <= y0 + 2 {
        return (x, y, w, h);
    }

    let mut cols = vec![0usize; x1 - x0];
    let mut rows = vec![0usize; y1 - y0];
    for yy in y0..y1 {
        for xx in x0..x1 {
            if planes.skin_mask[yy * planes.width + xx] {
                cols[xx - x0] += 1;
                rows[yy - y0] += 1;
            }
        }
    }

    let span = |profile: &[usize]| -> Option<(usize, usize)> {
        let peak = *profile.iter().max()?;
        if peak == 0 {
            return None;
        }
        let threshold = (peak as f64 * 0.4).ceil() as usize;
        let first = profile.iter().position(|&c| c >= threshold)?;
        let last = profile.iter().rposition(|&c| c >= threshold)?;
        Some((first, last))
    };

    match (span(&cols), span(&rows)) {
        (Some((c0, c1)), Some((r0, r1))) => {
            let rw = (c1 - c0 + 1) as f64;
            let mut rh = (r1 - r0 + 1) as f64;
            // Skin below the chin (neck) stretches the blob downwards
            if rh > 1.4 * rw {
                rh = 1.25 * rw;
            }
            ((x0 + c0) as f64, (y0 + r0) as f64, rw, rh)
        }
        _ => (x, y, w, h),
    }
}

impl RegionDetector for SkinCascadeDetector {
    fn name(&self) -> &'static str {
        "skin_cascade"
    }

    fn detect(&self, frame: &Frame) -> Option<Roi> {
        self.detect_regions(frame).map(|rois| rois.forehead)
    }

    fn detect_regions(&self, frame: &Frame) -> Option<FaceRois> {
        let (face, confidence) = self.detect_face(frame)?;
        face.regions(&self.layout, frame, confidence)
    }
}
