use crate::core::coords::CoordinateTransformer;
use crate::core::warp::roi_transform;
use crate::types::{Canvas, MapElement, OrthoError, OrthoResult, OwnershipMask, PixelPoint};
use ndarray::Array2;
use rayon::prelude::*;

/// Sentinel sites are placed this many canvas diameters away so that every
/// real element's Voronoi cell is finite before clipping.
const SENTINEL_FACTOR: f64 = 10.0;

/// Builds the ownership partition of the canvas between overlapping
/// elements, as a raster nearest-owner mask and as per-element vector
/// Voronoi polygons.
#[derive(Debug, Clone, Copy)]
pub struct SeamMaskBuilder {
    performance_factor: usize,
}

impl SeamMaskBuilder {
    pub fn new(performance_factor: usize) -> Self {
        Self {
            performance_factor: performance_factor.max(1),
        }
    }

    /// Compute the full-resolution raster ownership mask.
    ///
    /// Nearest-center assignment is computed at a downsampled resolution to
    /// bound cost, then upsampled with nearest-neighbor interpolation. Ties
    /// go to the lowest element index (ascending scan, strict `<`), so the
    /// result is bit-deterministic for identical inputs.
    pub fn build_raster_mask(
        &self,
        width: usize,
        height: usize,
        elements: &[MapElement],
    ) -> OrthoResult<OwnershipMask> {
        if elements.is_empty() {
            return Err(OrthoError::Processing(
                "cannot build ownership mask without elements".to_string(),
            ));
        }
        let k = self.performance_factor;
        let small_w = (width + k - 1) / k;
        let small_h = (height + k - 1) / k;
        let centers: Vec<(u32, PixelPoint)> =
            elements.iter().map(|e| (e.index, e.px_center)).collect();

        log::debug!(
            "Ownership mask: {} sites over {}x{} (downsampled {}x{})",
            centers.len(),
            width,
            height,
            small_w,
            small_h
        );

        let rows: Vec<Vec<u32>> = (0..small_h)
            .into_par_iter()
            .map(|si| {
                let y = (si * k) as f64;
                let mut row = Vec::with_capacity(small_w);
                for sj in 0..small_w {
                    let x = (sj * k) as f64;
                    let mut best_index = centers[0].0;
                    let mut best_d2 = sq_dist(centers[0].1, [x, y]);
                    for (index, center) in centers.iter().skip(1) {
                        let d2 = sq_dist(*center, [x, y]);
                        if d2 < best_d2 {
                            best_d2 = d2;
                            best_index = *index;
                        }
                    }
                    row.push(best_index);
                }
                row
            })
            .collect();

        let mut mask = Array2::<u32>::zeros((height, width));
        for y in 0..height {
            let small_row = &rows[y / k];
            for x in 0..width {
                mask[[y, x]] = small_row[x / k];
            }
        }
        Ok(mask)
    }

    /// Compute each element's vector Voronoi cell, clipped to the canvas and
    /// to its own footprint, and store both the GPS rendition and the
    /// back-projection into source-image pixel space on the element.
    pub fn build_vector_cells(
        &self,
        canvas: &Canvas,
        elements: &mut [MapElement],
        tf: &CoordinateTransformer,
    ) -> OrthoResult<()> {
        let w = canvas.width as f64;
        let h = canvas.height as f64;
        let reach = SENTINEL_FACTOR * w.max(h);
        let sentinels = [
            [w / 2.0 - reach, h / 2.0],
            [w / 2.0 + reach, h / 2.0],
            [w / 2.0, h / 2.0 - reach],
            [w / 2.0, h / 2.0 + reach],
        ];
        let canvas_rect = [[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]];
        let centers: Vec<PixelPoint> = elements.iter().map(|e| e.px_center).collect();

        for i in 0..elements.len() {
            let mut sites: Vec<PixelPoint> = Vec::with_capacity(centers.len() + 4);
            sites.extend(centers.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, c)| *c));
            sites.extend_from_slice(&sentinels);

            let cell = voronoi_cell(centers[i], &sites, reach);
            let cell = clip_polygon(&cell, &canvas_rect);
            if cell.len() < 3 {
                log::debug!(
                    "Element {}: Voronoi cell degenerates after canvas clip",
                    elements[i].index
                );
                elements[i].voronoi_gps = None;
                elements[i].voronoi_image_px = None;
                continue;
            }

            elements[i].voronoi_gps = Some(
                cell.iter()
                    .map(|p| {
                        let (e, n) = canvas.px_to_utm(p[0], p[1]);
                        tf.utm_to_gps(e, n)
                    })
                    .collect(),
            );

            // Restrict the cell to the pixels this element can actually
            // render, then pull it back into source-image coordinates with
            // the inverse of the warping transform.
            let own = clip_polygon(&cell, &elements[i].px_corners);
            if own.len() < 3 {
                elements[i].voronoi_image_px = None;
                continue;
            }
            let (src_w, src_h) = source_rect(&elements[i]);
            let back = roi_transform(src_w, src_h, &elements[i].px_corners)?.inverse()?;
            let y_offset = if elements[i].use_lower_half {
                (elements[i].source_height / 2) as f64
            } else {
                0.0
            };
            elements[i].voronoi_image_px = Some(
                own.iter()
                    .map(|p| {
                        let [sx, sy] = back.apply(p[0], p[1]);
                        [sx, sy + y_offset]
                    })
                    .collect(),
            );
        }
        Ok(())
    }
}

/// Effective source rectangle used for warping (lower-half crop included).
fn source_rect(element: &MapElement) -> (f64, f64) {
    let w = element.source_width as f64;
    let h = if element.use_lower_half {
        (element.source_height - element.source_height / 2) as f64
    } else {
        element.source_height as f64
    };
    (w, h)
}

fn sq_dist(a: PixelPoint, b: PixelPoint) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

/// Bounded Voronoi cell of `center` against `sites`: the intersection of all
/// perpendicular-bisector half-planes, seeded with a square of half-size
/// `2 * reach` so the cell is always finite.
pub fn voronoi_cell(center: PixelPoint, sites: &[PixelPoint], reach: f64) -> Vec<PixelPoint> {
    let r = 2.0 * reach;
    let mut cell = vec![
        [center[0] - r, center[1] - r],
        [center[0] + r, center[1] - r],
        [center[0] + r, center[1] + r],
        [center[0] - r, center[1] + r],
    ];
    for site in sites {
        if sq_dist(*site, center) < f64::EPSILON {
            continue;
        }
        let mid = [(center[0] + site[0]) / 2.0, (center[1] + site[1]) / 2.0];
        let normal = [site[0] - center[0], site[1] - center[1]];
        cell = clip_halfplane(&cell, mid, normal);
        if cell.len() < 3 {
            return cell;
        }
    }
    cell
}

/// Clip a polygon against the half-plane {p : (p - point) . normal <= 0}.
fn clip_halfplane(poly: &[PixelPoint], point: PixelPoint, normal: [f64; 2]) -> Vec<PixelPoint> {
    let inside =
        |p: &PixelPoint| (p[0] - point[0]) * normal[0] + (p[1] - point[1]) * normal[1] <= 0.0;
    let mut out = Vec::with_capacity(poly.len() + 1);
    for i in 0..poly.len() {
        let cur = poly[i];
        let prev = poly[(i + poly.len() - 1) % poly.len()];
        let cur_in = inside(&cur);
        let prev_in = inside(&prev);
        if cur_in {
            if !prev_in {
                out.push(line_halfplane_intersection(prev, cur, point, normal));
            }
            out.push(cur);
        } else if prev_in {
            out.push(line_halfplane_intersection(prev, cur, point, normal));
        }
    }
    out
}

fn line_halfplane_intersection(
    a: PixelPoint,
    b: PixelPoint,
    point: PixelPoint,
    normal: [f64; 2],
) -> PixelPoint {
    let da = (a[0] - point[0]) * normal[0] + (a[1] - point[1]) * normal[1];
    let db = (b[0] - point[0]) * normal[0] + (b[1] - point[1]) * normal[1];
    let t = da / (da - db);
    [a[0] + t * (b[0] - a[0]), a[1] + t * (b[1] - a[1])]
}

/// Sutherland-Hodgman clip of `subject` against a convex `clip` polygon.
///
/// The clip polygon is normalized to counter-clockwise winding first. A
/// result with fewer than 3 vertices means the subject lies entirely outside.
pub fn clip_polygon(subject: &[PixelPoint], clip: &[PixelPoint]) -> Vec<PixelPoint> {
    if subject.len() < 3 || clip.len() < 3 {
        return Vec::new();
    }
    let mut clip_ccw: Vec<PixelPoint> = clip.to_vec();
    if signed_area(&clip_ccw) < 0.0 {
        clip_ccw.reverse();
    }

    let mut output = subject.to_vec();
    for i in 0..clip_ccw.len() {
        if output.len() < 3 {
            return Vec::new();
        }
        let a = clip_ccw[i];
        let b = clip_ccw[(i + 1) % clip_ccw.len()];
        // Outward normal of edge a->b for a CCW polygon; the interior is
        // where (p - a) . outward <= 0
        let outward = [b[1] - a[1], -(b[0] - a[0])];
        output = clip_halfplane(&output, a, outward);
    }
    if output.len() < 3 {
        Vec::new()
    } else {
        output
    }
}

/// Shoelace signed area (positive for counter-clockwise winding in a
/// y-up frame).
pub fn signed_area(poly: &[PixelPoint]) -> f64 {
    let mut area = 0.0;
    for i in 0..poly.len() {
        let a = poly[i];
        let b = poly[(i + 1) % poly.len()];
        area += a[0] * b[1] - b[0] * a[1];
    }
    area / 2.0
}
