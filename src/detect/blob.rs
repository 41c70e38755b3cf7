//! Connected-component extraction over a diff mask.

use serde::{Deserialize, Serialize};

use super::diff::DiffMask;

pub const DEFAULT_AREA_THRESHOLD: u64 = 5000;

/// One connected foreground region: bounding rectangle plus pixel area.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blob {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Foreground pixels in the component, not the bounding box size.
    pub area: u64,
}

impl Blob {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

impl std::fmt::Display for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}@({},{}) area={}",
            self.width, self.height, self.x, self.y, self.area
        )
    }
}

/// Outcome of one detection step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MotionReport {
    /// Components whose area exceeds the threshold, in row-major discovery order.
    pub blobs: Vec<Blob>,
    /// True iff `blobs` is non-empty.
    pub any_qualifies: bool,
    /// Components found before area filtering.
    pub components: usize,
    pub foreground_pixels: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct BlobExtractor {
    area_threshold: u64,
}

impl Default for BlobExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_AREA_THRESHOLD)
    }
}

impl BlobExtractor {
    pub fn new(area_threshold: u64) -> Self {
        Self { area_threshold }
    }

    pub fn area_threshold(&self) -> u64 {
        self.area_threshold
    }

    /// Label 8-connected components and keep those with `area > area_threshold`.
    ///
    /// Seeds are taken in row-major order, so the result is deterministic.
    pub fn extract(&self, mask: &DiffMask) -> MotionReport {
        let width = mask.width() as usize;
        let height = mask.height() as usize;
        let raw = mask.as_raw();

        let mut visited = vec![false; raw.len()];
        let mut stack: Vec<usize> = Vec::new();
        let mut report = MotionReport::default();

        for seed in 0..raw.len() {
            if raw[seed] == 0 || visited[seed] {
                continue;
            }
            visited[seed] = true;
            stack.push(seed);

            let mut area = 0u64;
            let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
            let (mut max_x, mut max_y) = (0usize, 0usize);

            while let Some(idx) = stack.pop() {
                let (x, y) = (idx % width, idx / width);
                area += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);

                let y_lo = y.saturating_sub(1);
                let y_hi = (y + 1).min(height - 1);
                let x_lo = x.saturating_sub(1);
                let x_hi = (x + 1).min(width - 1);
                for ny in y_lo..=y_hi {
                    for nx in x_lo..=x_hi {
                        let n = ny * width + nx;
                        if raw[n] != 0 && !visited[n] {
                            visited[n] = true;
                            stack.push(n);
                        }
                    }
                }
            }

            report.components += 1;
            report.foreground_pixels += area;
            if area > self.area_threshold {
                report.blobs.push(Blob {
                    x: min_x as u32,
                    y: min_y as u32,
                    width: (max_x - min_x + 1) as u32,
                    height: (max_y - min_y + 1) as u32,
                    area,
                });
            }
        }

        report.any_qualifies = !report.blobs.is_empty();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from_rows(rows: &[&str]) -> DiffMask {
        let height = rows.len() as u32;
        let width = rows[0].len() as u32;
        let raw = rows
            .iter()
            .flat_map(|row| row.bytes().map(|b| if b == b'#' { 255 } else { 0 }))
            .collect();
        DiffMask::from_raw(width, height, raw).unwrap()
    }

    #[test]
    fn empty_mask_has_no_blobs() {
        let report = BlobExtractor::new(0).extract(&DiffMask::empty(20, 10));
        assert!(report.blobs.is_empty());
        assert!(!report.any_qualifies);
        assert_eq!(report.components, 0);
    }

    #[test]
    fn diagonal_pixels_are_one_component() {
        let mask = mask_from_rows(&["#...", ".#..", "..#.", "...#"]);
        let report = BlobExtractor::new(0).extract(&mask);
        assert_eq!(report.components, 1);
        assert_eq!(
            report.blobs,
            vec![Blob {
                x: 0,
                y: 0,
                width: 4,
                height: 4,
                area: 4
            }]
        );
    }

    #[test]
    fn area_counts_pixels_not_bounding_box() {
        let mask = mask_from_rows(&["###", "#..", "#.."]);
        let report = BlobExtractor::new(0).extract(&mask);
        assert_eq!(report.blobs[0].area, 5);
        assert_eq!((report.blobs[0].width, report.blobs[0].height), (3, 3));
    }

    #[test]
    fn filters_by_strict_area_threshold() {
        let mask = mask_from_rows(&["##....", "##....", "......", "...###"]);
        let report = BlobExtractor::new(3).extract(&mask);
        assert_eq!(report.components, 2);
        assert_eq!(report.blobs.len(), 1);
        assert_eq!(report.blobs[0].area, 4);
        assert!(report.any_qualifies);

        let none = BlobExtractor::new(4).extract(&mask);
        assert!(!none.any_qualifies);
        assert_eq!(none.foreground_pixels, 7);
    }

    #[test]
    fn blobs_come_out_in_row_major_seed_order() {
        let mask = mask_from_rows(&["....##", "....##", "##....", "##...."]);
        let report = BlobExtractor::new(0).extract(&mask);
        assert_eq!(report.blobs.len(), 2);
        assert_eq!((report.blobs[0].x, report.blobs[0].y), (4, 0));
        assert_eq!((report.blobs[1].x, report.blobs[1].y), (0, 2));
    }

    #[test]
    fn extraction_is_repeatable() {
        let mask = mask_from_rows(&["#.#.#", ".#.#.", "#...#"]);
        let extractor = BlobExtractor::new(0);
        assert_eq!(extractor.extract(&mask), extractor.extract(&mask));
    }
}
