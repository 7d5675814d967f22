//! Template matching by normalized cross-correlation.
//!
//! Scores are zero-mean normalized cross-correlation (the `TM_CCOEFF_NORMED`
//! measure) computed on luma. Window means and variances come from summed-area
//! tables so only the cross term is evaluated per pixel.
//!
//! Large searches run coarse-to-fine: the template and the screen are both
//! reduced by powers of two until an exhaustive scan is cheap, and the best
//! coarse peaks are refined level by level back to full resolution.
//!
//! A template is tried at native size first. If that misses and the display
//! is scaled, it is retried resized by the scale factor and by its
//! reciprocal, since a template may have been captured on either kind of
//! display. The best score over all attempts wins.

use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::Serialize;

use crate::capture::Capture;
use crate::geometry::{Point, Region};
use crate::scale::ScaleFactor;
use crate::template::Template;

/// Below this a window or template is considered flat.
const FLAT_EPSILON: f64 = 1e-6;

/// Multiply-adds allowed for one exhaustive scan before the search coarsens.
const SCAN_BUDGET: f64 = 4_194_304.0;
/// Smallest template side a reduced pyramid level may have.
const MIN_LEVEL_SIDE: usize = 4;
const MAX_LEVELS: usize = 5;
/// Coarse peaks followed back to full resolution.
const SEEDS: usize = 12;
/// Search radius around each peak at every finer level.
const REFINE_RADIUS: usize = 2;

/// Outcome of one matching attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// `score >= threshold`.
    pub found: bool,
    /// Raw (capture pixel space) centre of the best window, when found.
    pub location: Option<Point>,
    /// Best score in `[0, 1]`.
    pub score: f64,
    pub threshold: f64,
    /// Resize factor applied to the template for the best score.
    pub template_scale: f64,
    #[serde(serialize_with = "serialize_ms")]
    pub elapsed: Duration,
}

fn serialize_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// The found/not-found decision. Monotonic in `score`.
pub fn meets_threshold(score: f64, threshold: f64) -> bool {
    score >= threshold
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f64,
    /// Window top-left within the searched area.
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    factor: f64,
}

/// Locate `template` in `capture`.
///
/// Pure: no waiting, no retries. `scale` is the display scale used for the
/// rescaled attempts.
pub fn find(template: &Template, capture: &Capture, scale: ScaleFactor) -> MatchResult {
    let started = Instant::now();
    let threshold = template.threshold();

    let area = match template.region() {
        Some(region) => region.clip_to(capture.size()),
        None => Some(Region::new(0, 0, capture.width(), capture.height())),
    };
    let Some(area) = area.filter(|a| a.width > 0 && a.height > 0) else {
        return miss(threshold, started);
    };

    let screen = imageops::grayscale(capture.image());
    let haystack = if area.x == 0
        && area.y == 0
        && area.width == screen.width()
        && area.height == screen.height()
    {
        screen
    } else {
        imageops::crop_imm(&screen, area.x, area.y, area.width, area.height).to_image()
    };
    let mut pyramid = Pyramid::new(haystack);

    let mut best = best_window(&mut pyramid, template.image(), 1.0);

    let needs_rescale = best.map_or(true, |c| !meets_threshold(c.score, threshold));
    if needs_rescale && !scale.is_native() {
        for factor in [scale.get(), 1.0 / scale.get()] {
            let Some(resized) = resize(template.image(), factor) else {
                continue;
            };
            let candidate = best_window(&mut pyramid, &resized, factor);
            if let Some(c) = candidate {
                if best.map_or(true, |b| c.score > b.score) {
                    best = Some(c);
                }
            }
        }
    }

    let Some(best) = best else {
        return miss(threshold, started);
    };
    let found = meets_threshold(best.score, threshold);
    let location = found.then(|| {
        Point::new(
            f64::from(area.x + best.x) + f64::from(best.width) / 2.0,
            f64::from(area.y + best.y) + f64::from(best.height) / 2.0,
        )
    });
    let result = MatchResult {
        found,
        location,
        score: best.score,
        threshold,
        template_scale: best.factor,
        elapsed: started.elapsed(),
    };
    tracing::trace!(
        template = template.id(),
        score = result.score,
        found,
        factor = best.factor,
        "match attempt"
    );
    result
}

fn miss(threshold: f64, started: Instant) -> MatchResult {
    MatchResult {
        found: false,
        location: None,
        score: 0.0,
        threshold,
        template_scale: 1.0,
        elapsed: started.elapsed(),
    }
}

fn resize(image: &GrayImage, factor: f64) -> Option<GrayImage> {
    let width = (f64::from(image.width()) * factor).round();
    let height = (f64::from(image.height()) * factor).round();
    if width < 1.0 || height < 1.0 {
        return None;
    }
    Some(imageops::resize(
        image,
        width as u32,
        height as u32,
        FilterType::Triangle,
    ))
}

/// Prefix sums of pixel values and squared values, `(w + 1) * (h + 1)` each.
struct SummedArea {
    stride: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl SummedArea {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sum_sq = vec![0.0; stride * (h + 1)];
        let pixels = image.as_raw();
        for y in 0..h {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = f64::from(pixels[y * w + x]);
                row += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row;
                sum_sq[idx] = sum_sq[idx - stride] + row_sq;
            }
        }
        Self {
            stride,
            sum,
            sum_sq,
        }
    }

    /// `(sum, sum of squares)` over the `w` x `h` window at `(x, y)`.
    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let at = |table: &[f64], x: usize, y: usize| table[y * self.stride + x];
        let rect = |table: &[f64]| {
            at(table, x + w, y + h) - at(table, x, y + h) - at(table, x + w, y) + at(table, x, y)
        };
        (rect(&self.sum), rect(&self.sum_sq))
    }
}

/// Halve both dimensions.
fn halve(image: &GrayImage) -> GrayImage {
    imageops::resize(
        image,
        (image.width() / 2).max(1),
        (image.height() / 2).max(1),
        FilterType::Triangle,
    )
}

/// The searched area at successively halved resolutions, built on demand.
struct Pyramid {
    levels: Vec<GrayImage>,
}

impl Pyramid {
    fn new(base: GrayImage) -> Self {
        Self { levels: vec![base] }
    }

    fn base(&self) -> &GrayImage {
        &self.levels[0]
    }

    fn level(&mut self, level: usize) -> &GrayImage {
        while self.levels.len() <= level {
            let next = halve(&self.levels[self.levels.len() - 1]);
            self.levels.push(next);
        }
        &self.levels[level]
    }
}

/// A template prepared for scoring: zero-mean pixels and their energy.
struct Needle {
    width: usize,
    height: usize,
    mean: f64,
    centered: Vec<f64>,
    energy: f64,
}

impl Needle {
    fn new(image: &GrayImage) -> Self {
        let pixels = image.as_raw();
        let n = pixels.len().max(1) as f64;
        let mean = pixels.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
        let centered: Vec<f64> = pixels.iter().map(|&v| f64::from(v) - mean).collect();
        let energy = centered.iter().map(|v| v * v).sum();
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            mean,
            centered,
            energy,
        }
    }

    fn len(&self) -> f64 {
        (self.width * self.height) as f64
    }

    /// Score the window at `(x, y)` whose pixel sum and sum of squares are known.
    fn score(&self, haystack: &GrayImage, x: usize, y: usize, sum: f64, sum_sq: f64) -> f64 {
        let n = self.len();
        let window_var = (sum_sq - sum * sum / n).max(0.0);
        let window_flat = window_var < FLAT_EPSILON * n;

        let score = if self.energy < FLAT_EPSILON {
            if window_flat {
                1.0 - ((sum / n) - self.mean).abs() / 255.0
            } else {
                0.0
            }
        } else if window_flat {
            0.0
        } else {
            self.cross(haystack, x, y) / (window_var * self.energy).sqrt()
        };
        score.clamp(0.0, 1.0)
    }

    /// Sum of I * (T - mean(T)), which equals the sum of (I - mean(I)) * (T - mean(T)).
    fn cross(&self, haystack: &GrayImage, x: usize, y: usize) -> f64 {
        let hw = haystack.width() as usize;
        let pixels = haystack.as_raw();
        let mut cross = 0.0;
        for j in 0..self.height {
            let start = (y + j) * hw + x;
            let row = &pixels[start..start + self.width];
            let tpl = &self.centered[j * self.width..(j + 1) * self.width];
            cross += row
                .iter()
                .zip(tpl)
                .map(|(&p, &t)| f64::from(p) * t)
                .sum::<f64>();
        }
        cross
    }

    /// Score one window without summed-area tables.
    fn score_at(&self, haystack: &GrayImage, x: usize, y: usize) -> f64 {
        let hw = haystack.width() as usize;
        let pixels = haystack.as_raw();
        let (mut sum, mut sum_sq) = (0.0, 0.0);
        for j in 0..self.height {
            let start = (y + j) * hw + x;
            for &p in &pixels[start..start + self.width] {
                let v = f64::from(p);
                sum += v;
                sum_sq += v * v;
            }
        }
        self.score(haystack, x, y, sum, sum_sq)
    }

    /// Score of every placement over `haystack`, row-major, with the row width.
    fn score_map(&self, haystack: &GrayImage) -> (usize, Vec<f64>) {
        let cols = haystack.width() as usize - self.width + 1;
        let rows = haystack.height() as usize - self.height + 1;
        let tables = SummedArea::new(haystack);
        let mut map = Vec::with_capacity(cols * rows);
        for y in 0..rows {
            for x in 0..cols {
                let (sum, sum_sq) = tables.window(x, y, self.width, self.height);
                map.push(self.score(haystack, x, y, sum, sum_sq));
            }
        }
        (cols, map)
    }
}

/// Coarsest pyramid level worth scanning exhaustively for this search.
///
/// Level 0 is used whenever a full scan fits in [`SCAN_BUDGET`]; otherwise
/// halve until it does, keeping the reduced template at least
/// [`MIN_LEVEL_SIDE`] pixels on each side.
fn search_level(hw: usize, hh: usize, nw: usize, nh: usize) -> usize {
    let mut level = 0;
    while level + 1 < MAX_LEVELS {
        let (lw, lh, tw, th) = (hw >> level, hh >> level, nw >> level, nh >> level);
        let cost = ((lw - tw + 1) * (lh - th + 1)) as f64 * (tw * th) as f64;
        if cost <= SCAN_BUDGET {
            break;
        }
        if (nw >> (level + 1)) < MIN_LEVEL_SIDE || (nh >> (level + 1)) < MIN_LEVEL_SIDE {
            break;
        }
        level += 1;
    }
    level
}

/// Up to `count` best placements in `map`, at least `radius` apart on some axis.
fn peaks(map: &[f64], cols: usize, radius: usize, count: usize) -> Vec<(usize, usize)> {
    let mut order: Vec<usize> = (0..map.len()).collect();
    // Stable, so equal scores stay in row-major order.
    order.sort_by(|&a, &b| map[b].total_cmp(&map[a]));

    let mut picked: Vec<(usize, usize)> = Vec::with_capacity(count);
    for idx in order {
        let (x, y) = (idx % cols, idx / cols);
        if picked
            .iter()
            .all(|&(px, py)| px.abs_diff(x) > radius || py.abs_diff(y) > radius)
        {
            picked.push((x, y));
            if picked.len() == count {
                break;
            }
        }
    }
    picked
}

/// Best placement within [`REFINE_RADIUS`] of `(x, y)`, first in row-major order on ties.
fn refine(haystack: &GrayImage, needle: &Needle, x: usize, y: usize) -> (usize, usize, f64) {
    let max_x = haystack.width() as usize - needle.width;
    let max_y = haystack.height() as usize - needle.height;
    let (cx, cy) = (x.min(max_x), y.min(max_y));

    let mut best = (cx, cy, f64::NEG_INFINITY);
    for yy in cy.saturating_sub(REFINE_RADIUS)..=(cy + REFINE_RADIUS).min(max_y) {
        for xx in cx.saturating_sub(REFINE_RADIUS)..=(cx + REFINE_RADIUS).min(max_x) {
            let score = needle.score_at(haystack, xx, yy);
            if score > best.2 {
                best = (xx, yy, score);
            }
        }
    }
    best
}

/// Highest-scoring window of `needle` over the pyramid's base image.
///
/// Small searches scan every window and keep the first best in row-major
/// order. Larger ones scan a reduced copy of both images, then follow the
/// strongest coarse peaks back up the pyramid, searching a few pixels
/// around each at every finer level.
fn best_window(pyramid: &mut Pyramid, needle: &GrayImage, factor: f64) -> Option<Candidate> {
    let (hw, hh) = (
        pyramid.base().width() as usize,
        pyramid.base().height() as usize,
    );
    let (nw, nh) = (needle.width() as usize, needle.height() as usize);
    if nw == 0 || nh == 0 || nw > hw || nh > hh {
        return None;
    }

    let top = search_level(hw, hh, nw, nh);
    let mut needles = vec![Needle::new(needle)];
    let mut reduced: Option<GrayImage> = None;
    for _ in 0..top {
        let next = halve(reduced.as_ref().unwrap_or(needle));
        needles.push(Needle::new(&next));
        reduced = Some(next);
    }

    let coarse = &needles[top];
    let (cols, map) = coarse.score_map(pyramid.level(top));
    let candidate = |x: usize, y: usize, score: f64| Candidate {
        score,
        x: x as u32,
        y: y as u32,
        width: nw as u32,
        height: nh as u32,
        factor,
    };

    if top == 0 {
        let mut best: Option<(usize, f64)> = None;
        for (idx, &score) in map.iter().enumerate() {
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((idx, score));
            }
        }
        return best.map(|(idx, score)| candidate(idx % cols, idx / cols, score));
    }

    let radius = (coarse.width.min(coarse.height) / 2).max(1);
    let mut seeds: Vec<(usize, usize, f64)> = peaks(&map, cols, radius, SEEDS)
        .into_iter()
        .map(|(x, y)| (x, y, map[y * cols + x]))
        .collect();
    drop(map);
    tracing::trace!(level = top, seeds = seeds.len(), factor, "coarse search");

    for level in (0..top).rev() {
        let haystack = pyramid.level(level);
        let needle = &needles[level];
        seeds = seeds
            .into_iter()
            .map(|(x, y, _)| refine(haystack, needle, x * 2, y * 2))
            .collect();
    }

    seeds
        .into_iter()
        .reduce(|best, c| {
            let better = c.2 > best.2 || (c.2 == best.2 && (c.1, c.0) < (best.1, best.0));
            if better {
                c
            } else {
                best
            }
        })
        .map(|(x, y, score)| candidate(x, y, score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{backdrop, button, checker, paste, upscale};
    use image::{Luma, RgbaImage};

    fn scale(v: f64) -> ScaleFactor {
        ScaleFactor::new(v).unwrap()
    }

    #[test]
    fn test_exact_paste_is_found_at_centre() {
        let tpl = checker(12, 12, 3);
        let mut screen = backdrop(120, 80);
        paste(&mut screen, &tpl, 40, 30);

        let result = find(
            &Template::new("chk", tpl),
            &Capture::new(screen),
            ScaleFactor::NATIVE,
        );
        assert!(result.found);
        assert!(result.score > 0.999);
        assert_eq!(result.location, Some(Point::new(46.0, 36.0)));
        assert_eq!(result.template_scale, 1.0);
    }

    #[test]
    fn test_absent_target_is_not_found() {
        let tpl = checker(12, 12, 3);
        let result = find(
            &Template::new("chk", tpl),
            &Capture::new(backdrop(80, 60)),
            ScaleFactor::NATIVE,
        );
        assert!(!result.found);
        assert!(result.score < 0.5);
        assert_eq!(result.location, None);
    }

    #[test]
    fn test_rescaled_attempt_finds_retina_rendering() {
        // Template captured on a 1x display, screen rendered at 2x.
        let tpl = checker(12, 12, 3);
        let mut screen = backdrop(160, 100);
        paste(&mut screen, &upscale(&tpl, 2), 60, 40);

        let template = Template::new("chk", tpl);
        let capture = Capture::new(screen);

        let native_only = find(&template, &capture, ScaleFactor::NATIVE);
        assert!(!native_only.found);

        let result = find(&template, &capture, scale(2.0));
        assert!(result.found, "score was {}", result.score);
        assert_eq!(result.template_scale, 2.0);
        let loc = result.location.unwrap();
        assert!((loc.x - 72.0).abs() <= 1.0);
        assert!((loc.y - 52.0).abs() <= 1.0);
    }

    #[test]
    fn test_region_limits_search() {
        let tpl = checker(12, 12, 3);
        let mut screen = backdrop(120, 80);
        paste(&mut screen, &tpl, 4, 4);
        let capture = Capture::new(screen);

        let outside = Template::new("chk", tpl.clone()).with_region(Region::new(60, 0, 60, 80));
        assert!(!find(&outside, &capture, ScaleFactor::NATIVE).found);

        let inside = Template::new("chk", tpl).with_region(Region::new(0, 0, 40, 40));
        let result = find(&inside, &capture, ScaleFactor::NATIVE);
        assert!(result.found);
        assert_eq!(result.location, Some(Point::new(10.0, 10.0)));
    }

    #[test]
    fn test_region_offset_applied_to_location() {
        let tpl = checker(12, 12, 3);
        let mut screen = backdrop(120, 80);
        paste(&mut screen, &tpl, 70, 50);
        let template = Template::new("chk", tpl).with_region(Region::new(60, 40, 60, 40));
        let result = find(&template, &Capture::new(screen), ScaleFactor::NATIVE);
        assert_eq!(result.location, Some(Point::new(76.0, 56.0)));
    }

    #[test]
    fn test_template_larger_than_capture() {
        let tpl = checker(40, 40, 4);
        let result = find(
            &Template::new("big", tpl),
            &Capture::new(backdrop(20, 20)),
            ScaleFactor::NATIVE,
        );
        assert!(!result.found);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_threshold_boundary() {
        assert!(meets_threshold(0.8, 0.8));
        assert!(meets_threshold(0.92, 0.8));
        assert!(!meets_threshold(0.7999, 0.8));
        // Raising the score never flips found to not found.
        let mut prev = false;
        for i in 0..=100 {
            let now = meets_threshold(f64::from(i) / 100.0, 0.5);
            assert!(!prev || now);
            prev = now;
        }
    }

    #[test]
    fn test_flat_template_on_flat_screen() {
        let tpl = GrayImage::from_pixel(6, 6, Luma([200]));
        let screen = RgbaImage::from_pixel(30, 20, image::Rgba([200, 200, 200, 255]));
        let result = find(
            &Template::new("flat", tpl),
            &Capture::new(screen),
            ScaleFactor::NATIVE,
        );
        assert!(result.found);
        assert!((result.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_scores_stay_in_unit_interval() {
        // Inverted checker is perfectly anti-correlated.
        let tpl = checker(12, 12, 3);
        let inverted = GrayImage::from_fn(12, 12, |x, y| Luma([255 - tpl.get_pixel(x, y)[0]]));
        let mut screen = RgbaImage::from_pixel(12, 12, image::Rgba([0, 0, 0, 255]));
        paste(&mut screen, &inverted, 0, 0);
        let result = find(
            &Template::new("chk", tpl),
            &Capture::new(screen),
            ScaleFactor::NATIVE,
        );
        assert_eq!(result.score, 0.0);
        assert!(!result.found);
    }

    #[test]
    fn test_search_level() {
        assert_eq!(search_level(120, 80, 12, 12), 0);
        // 1440x900 with an 80x30 template: two halvings bring the scan under budget.
        assert_eq!(search_level(1440, 900, 80, 30), 2);
        // The reduced template never drops below the minimum side.
        assert_eq!(search_level(1440, 900, 40, 15), 1);
        assert_eq!(search_level(4000, 4000, 7, 7), 0);
    }

    #[test]
    fn test_coarse_to_fine_finds_target_on_full_screen() {
        let tpl = button(80, 30);
        let mut screen = backdrop(1440, 900);
        paste(&mut screen, &tpl, 613, 417);

        let result = find(
            &Template::new("btn", tpl),
            &Capture::new(screen),
            ScaleFactor::NATIVE,
        );
        assert!(result.found, "score was {}", result.score);
        assert!(result.score > 0.99);
        assert_eq!(result.location, Some(Point::new(653.0, 432.0)));
    }

    #[test]
    fn test_coarse_to_fine_finds_retina_rendering_on_full_screen() {
        let tpl = button(80, 30);
        let mut screen = backdrop(1440, 900);
        paste(&mut screen, &upscale(&tpl, 2), 501, 333);

        let result = find(&Template::new("btn", tpl), &Capture::new(screen), scale(2.0));
        assert!(result.found, "score was {}", result.score);
        assert_eq!(result.template_scale, 2.0);
        let loc = result.location.unwrap();
        assert!((loc.x - 581.0).abs() <= 1.0, "x was {}", loc.x);
        assert!((loc.y - 363.0).abs() <= 1.0, "y was {}", loc.y);
    }

    #[test]
    fn test_full_screen_miss_stays_well_inside_default_interval() {
        // Worst case: absent target on a scaled display runs all three sizes.
        let template = Template::new("btn", button(80, 30));
        let capture = Capture::new(backdrop(1440, 900));

        let started = Instant::now();
        let result = find(&template, &capture, scale(2.0));
        let elapsed = started.elapsed();

        assert!(!result.found);
        assert!(
            elapsed < Duration::from_secs(5),
            "one matching call took {elapsed:?}"
        );
    }
}
