use crate::types::{Canvas, MapElement, OrthoResult, WarpedTile};
use ndarray::Array2;

/// A non-owned thermal pixel may only displace an existing value when it is
/// at least this many raw units hotter.
const THERMAL_DELTA: f32 = 20.0;

/// Merges warped tiles into the canvas under the ownership mask.
///
/// Strictly single-threaded and order-sensitive: elements must be merged in
/// ascending index order, because later elements may legitimately overwrite
/// earlier ones outside their owned region under the undrawn and
/// hotter-pixel rules. Each element's tile is dropped as soon as it has been
/// merged, so peak memory does not grow with the element count.
pub struct MapCompositor {
    thermal_values: Option<Array2<f32>>,
    thermal_coverage: Option<Array2<u8>>,
}

impl MapCompositor {
    pub fn new() -> Self {
        Self {
            thermal_values: None,
            thermal_coverage: None,
        }
    }

    /// Merge one element's warped tile, consuming it.
    ///
    /// Elements without a tile (timed out during warping) are skipped; they
    /// keep their placement metadata but contribute no pixels.
    pub fn merge_element(&mut self, canvas: &mut Canvas, element: &mut MapElement) {
        let Some(tile) = element.tile.take() else {
            log::debug!("Element {} has no image data, skipping", element.index);
            return;
        };
        match tile {
            WarpedTile::Visual(rgba) => self.merge_visual(canvas, element, &rgba),
            WarpedTile::Radiometric { values, alpha } => {
                self.merge_radiometric(canvas, element, &values, &alpha)
            }
        }
    }

    /// A pixel is overwritten when the element owns it by mask, or the
    /// canvas is still fully transparent there, and the warped pixel has
    /// non-zero alpha.
    fn merge_visual(&mut self, canvas: &mut Canvas, element: &MapElement, rgba: &ndarray::Array3<u8>) {
        let roi = element.roi;
        for i in 0..roi.height {
            for j in 0..roi.width {
                if rgba[[i, j, 3]] == 0 {
                    continue;
                }
                let (y, x) = (roi.y + i, roi.x + j);
                let owned = canvas.mask[[y, x]] == element.index;
                let undrawn = canvas.buffer[[y, x, 3]] == 0;
                if owned || undrawn {
                    for c in 0..4 {
                        canvas.buffer[[y, x, c]] = rgba[[i, j, c]];
                    }
                }
            }
        }
    }

    /// Radiometric merge accumulates raw values in a float buffer. A pixel
    /// is overwritten when the element owns it; or it is much hotter than
    /// the existing value while the existing value is not much hotter than
    /// it; or the pixel is undrawn. Near the threshold the two hotter
    /// predicates cannot decide, and mask ownership breaks the tie.
    fn merge_radiometric(
        &mut self,
        canvas: &mut Canvas,
        element: &MapElement,
        values: &Array2<f32>,
        alpha: &Array2<u8>,
    ) {
        let (h, w) = (canvas.height, canvas.width);
        let acc = self
            .thermal_values
            .get_or_insert_with(|| Array2::zeros((h, w)));
        let coverage = self
            .thermal_coverage
            .get_or_insert_with(|| Array2::zeros((h, w)));

        let roi = element.roi;
        for i in 0..roi.height {
            for j in 0..roi.width {
                if alpha[[i, j]] == 0 {
                    continue;
                }
                let (y, x) = (roi.y + i, roi.x + j);
                let v = values[[i, j]];
                let owned = canvas.mask[[y, x]] == element.index;
                let drawn = coverage[[y, x]] > 0;
                let existing = acc[[y, x]];
                let image_much_hotter = v >= existing + THERMAL_DELTA;
                let existing_much_hotter = existing >= v + THERMAL_DELTA;

                let write = if owned {
                    true
                } else if !drawn {
                    true
                } else {
                    image_much_hotter && !existing_much_hotter
                };
                if write {
                    acc[[y, x]] = v;
                    coverage[[y, x]] = 255;
                }
            }
        }
    }

    /// Resolve the thermal accumulator (if any) into the canvas buffer and
    /// log coverage. Call once after every element has been merged.
    pub fn finalize(&mut self, canvas: &mut Canvas) -> OrthoResult<()> {
        if let (Some(values), Some(coverage)) =
            (self.thermal_values.take(), self.thermal_coverage.take())
        {
            let mut min = f32::INFINITY;
            let mut max = f32::NEG_INFINITY;
            for (v, c) in values.iter().zip(coverage.iter()) {
                if *c > 0 {
                    min = min.min(*v);
                    max = max.max(*v);
                }
            }
            let span = if max > min { max - min } else { 1.0 };
            let lut = thermal_lut();
            for y in 0..canvas.height {
                for x in 0..canvas.width {
                    if coverage[[y, x]] == 0 {
                        continue;
                    }
                    let t = ((values[[y, x]] - min) / span).clamp(0.0, 1.0);
                    let color = lut[(t * 255.0).round() as usize];
                    canvas.buffer[[y, x, 0]] = color[0];
                    canvas.buffer[[y, x, 1]] = color[1];
                    canvas.buffer[[y, x, 2]] = color[2];
                    canvas.buffer[[y, x, 3]] = coverage[[y, x]];
                }
            }
            log::info!(
                "Radiometric normalization over {:.1}..{:.1} raw units",
                min,
                max
            );
        }

        let drawn = canvas
            .buffer
            .slice(ndarray::s![.., .., 3])
            .iter()
            .filter(|a| **a > 0)
            .count();
        log::info!(
            "Composite covers {} of {} canvas pixels ({:.1}%)",
            drawn,
            canvas.width * canvas.height,
            100.0 * drawn as f64 / (canvas.width * canvas.height) as f64
        );
        Ok(())
    }
}

impl Default for MapCompositor {
    fn default() -> Self {
        Self::new()
    }
}

/// 256-entry RGB lookup table for radiometric rendering: a dark-violet to
/// yellow gradient interpolated between fixed anchors.
fn thermal_lut() -> [[u8; 3]; 256] {
    const ANCHORS: [(f32, [f32; 3]); 5] = [
        (0.0, [0.0, 0.0, 4.0]),
        (0.25, [87.0, 16.0, 110.0]),
        (0.5, [188.0, 55.0, 84.0]),
        (0.75, [249.0, 142.0, 9.0]),
        (1.0, [252.0, 255.0, 164.0]),
    ];
    let mut lut = [[0u8; 3]; 256];
    for (i, entry) in lut.iter_mut().enumerate() {
        let t = i as f32 / 255.0;
        let hi = ANCHORS.iter().position(|(p, _)| *p >= t).unwrap_or(4);
        let lo = hi.saturating_sub(1);
        let (p0, c0) = ANCHORS[lo];
        let (p1, c1) = ANCHORS[hi];
        let f = if p1 > p0 { (t - p0) / (p1 - p0) } else { 0.0 };
        for c in 0..3 {
            entry[c] = (c0[c] + (c1[c] - c0[c]) * f).round() as u8;
        }
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GpsPosition, Hemisphere, Roi, UtmPosition};
    use chrono::{TimeZone, Utc};
    use ndarray::{Array2, Array3};

    fn blank_canvas(width: usize, height: usize) -> Canvas {
        Canvas {
            width,
            height,
            scale: 1.0,
            min_easting: 0.0,
            min_northing: 0.0,
            max_easting: width as f64,
            max_northing: height as f64,
            zone: 32,
            hemisphere: Hemisphere::North,
            padding_px: 0,
            buffer: Array3::zeros((height, width, 4)),
            mask: Array2::zeros((height, width)),
        }
    }

    fn element(index: u32, radiometric: bool, tile: WarpedTile, roi: Roi) -> MapElement {
        MapElement {
            image_id: format!("img-{}", index),
            image_path: "img.jpg".into(),
            index,
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            radiometric,
            use_lower_half: false,
            source_width: 4,
            source_height: 4,
            center: UtmPosition {
                easting: 0.0,
                northing: 0.0,
                zone: 32,
                hemisphere: Hemisphere::North,
            },
            corners: [UtmPosition {
                easting: 0.0,
                northing: 0.0,
                zone: 32,
                hemisphere: Hemisphere::North,
            }; 4],
            center_gps: GpsPosition { lat: 0.0, lon: 0.0 },
            corners_gps: [GpsPosition { lat: 0.0, lon: 0.0 }; 4],
            px_center: [2.0, 2.0],
            px_corners: [[0.0, 0.0], [3.0, 0.0], [3.0, 3.0], [0.0, 3.0]],
            roi,
            voronoi_gps: None,
            voronoi_image_px: None,
            tile: Some(tile),
        }
    }

    fn solid_rgba(w: usize, h: usize, rgb: [u8; 3]) -> WarpedTile {
        let mut tile = Array3::zeros((h, w, 4));
        for i in 0..h {
            for j in 0..w {
                tile[[i, j, 0]] = rgb[0];
                tile[[i, j, 1]] = rgb[1];
                tile[[i, j, 2]] = rgb[2];
                tile[[i, j, 3]] = 255;
            }
        }
        WarpedTile::Visual(tile)
    }

    fn full_roi() -> Roi {
        Roi {
            x: 0,
            y: 0,
            width: 4,
            height: 4,
        }
    }

    fn split_mask(canvas: &mut Canvas) {
        // Left half owned by 0, right half by 1
        for y in 0..canvas.height {
            for x in 0..canvas.width {
                canvas.mask[[y, x]] = if x < canvas.width / 2 { 0 } else { 1 };
            }
        }
    }

    #[test]
    fn test_visual_ownership_and_undrawn() {
        let mut canvas = blank_canvas(4, 4);
        split_mask(&mut canvas);
        let mut compositor = MapCompositor::new();

        let mut e0 = element(0, false, solid_rgba(4, 4, [200, 0, 0]), full_roi());
        let mut e1 = element(1, false, solid_rgba(4, 4, [0, 0, 200]), full_roi());
        compositor.merge_element(&mut canvas, &mut e0);
        // Element 0 painted everything: it owns the left half and the right
        // half was still undrawn
        assert_eq!(canvas.buffer[[0, 3, 0]], 200);
        compositor.merge_element(&mut canvas, &mut e1);
        compositor.finalize(&mut canvas).unwrap();

        // Ownership reclaims the right half, the left half stays red
        assert_eq!(canvas.buffer[[0, 0, 0]], 200);
        assert_eq!(canvas.buffer[[0, 0, 2]], 0);
        assert_eq!(canvas.buffer[[0, 3, 0]], 0);
        assert_eq!(canvas.buffer[[0, 3, 2]], 200);
        // Tiles were freed
        assert!(e0.tile.is_none() && e1.tile.is_none());
    }

    #[test]
    fn test_visual_transparent_pixels_never_write() {
        let mut canvas = blank_canvas(4, 4);
        split_mask(&mut canvas);
        let mut compositor = MapCompositor::new();

        let mut tile = Array3::zeros((4, 4, 4));
        tile[[1, 1, 1]] = 77; // colored but fully transparent
        let mut e0 = element(0, false, WarpedTile::Visual(tile), full_roi());
        compositor.merge_element(&mut canvas, &mut e0);
        assert_eq!(canvas.buffer[[1, 1, 1]], 0);
        assert_eq!(canvas.buffer[[1, 1, 3]], 0);
    }

    #[test]
    fn test_visual_idempotent() {
        let merge_all = || {
            let mut canvas = blank_canvas(4, 4);
            split_mask(&mut canvas);
            let mut compositor = MapCompositor::new();
            let mut e0 = element(0, false, solid_rgba(4, 4, [10, 20, 30]), full_roi());
            let mut e1 = element(1, false, solid_rgba(4, 4, [40, 50, 60]), full_roi());
            compositor.merge_element(&mut canvas, &mut e0);
            compositor.merge_element(&mut canvas, &mut e1);
            compositor.finalize(&mut canvas).unwrap();
            canvas.buffer
        };
        assert_eq!(merge_all(), merge_all());
    }

    #[test]
    fn test_radiometric_hotter_rule() {
        let mut canvas = blank_canvas(4, 4);
        split_mask(&mut canvas);
        let mut compositor = MapCompositor::new();

        let radiometric = |value: f32| WarpedTile::Radiometric {
            values: Array2::from_elem((4, 4), value),
            alpha: Array2::from_elem((4, 4), 255),
        };
        let mut e0 = element(0, true, radiometric(30.0), full_roi());
        // 45 is within 20 units of 30: not hot enough to cross the seam
        let mut e1 = element(1, true, radiometric(45.0), full_roi());
        compositor.merge_element(&mut canvas, &mut e0);
        compositor.merge_element(&mut canvas, &mut e1);
        compositor.finalize(&mut canvas).unwrap();

        let lut = thermal_lut();
        // Left pixels normalized to the minimum, right to the maximum
        assert_eq!(
            [canvas.buffer[[0, 0, 0]], canvas.buffer[[0, 0, 1]], canvas.buffer[[0, 0, 2]]],
            [lut[0][0], lut[0][1], lut[0][2]]
        );
        assert_eq!(
            [canvas.buffer[[0, 3, 0]], canvas.buffer[[0, 3, 1]], canvas.buffer[[0, 3, 2]]],
            [lut[255][0], lut[255][1], lut[255][2]]
        );
        assert_eq!(canvas.buffer[[0, 0, 3]], 255);
    }

    #[test]
    fn test_radiometric_much_hotter_crosses_seam() {
        let mut canvas = blank_canvas(4, 4);
        split_mask(&mut canvas);
        let mut compositor = MapCompositor::new();

        let radiometric = |value: f32| WarpedTile::Radiometric {
            values: Array2::from_elem((4, 4), value),
            alpha: Array2::from_elem((4, 4), 255),
        };
        let mut e0 = element(0, true, radiometric(30.0), full_roi());
        // A 80-unit-hot object in element 1 overrides element 0's territory
        let mut e1 = element(1, true, radiometric(110.0), full_roi());
        compositor.merge_element(&mut canvas, &mut e0);
        compositor.merge_element(&mut canvas, &mut e1);

        // Before finalize, the accumulator holds 110 everywhere
        let acc = compositor.thermal_values.as_ref().unwrap();
        assert_eq!(acc[[0, 0]], 110.0);
        assert_eq!(acc[[0, 3]], 110.0);
    }

    #[test]
    fn test_missing_tile_skipped() {
        let mut canvas = blank_canvas(4, 4);
        let mut compositor = MapCompositor::new();
        let mut e0 = element(0, false, solid_rgba(4, 4, [1, 2, 3]), full_roi());
        e0.tile = None;
        compositor.merge_element(&mut canvas, &mut e0);
        compositor.finalize(&mut canvas).unwrap();
        assert!(canvas.buffer.iter().all(|v| *v == 0));
    }
}
