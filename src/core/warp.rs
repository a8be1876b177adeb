use crate::io::raster::RasterStore;
use crate::types::{MapElement, OrthoError, OrthoResult, PixelPoint, Roi, WarpedTile};
use nalgebra::{Matrix3, SMatrix, SVector};
use ndarray::{Array2, Array3, s};

/// 2D perspective transform (3x3 homography, h33 normalized to 1).
#[derive(Debug, Clone, Copy)]
pub struct Homography {
    m: Matrix3<f64>,
}

impl Homography {
    /// Solve the transform mapping 4 source points onto 4 destination points.
    pub fn from_quads(src: &[PixelPoint; 4], dst: &[PixelPoint; 4]) -> OrthoResult<Self> {
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for i in 0..4 {
            let [x, y] = src[i];
            let [u, v] = dst[i];
            a[(2 * i, 0)] = x;
            a[(2 * i, 1)] = y;
            a[(2 * i, 2)] = 1.0;
            a[(2 * i, 6)] = -x * u;
            a[(2 * i, 7)] = -y * u;
            b[2 * i] = u;
            a[(2 * i + 1, 3)] = x;
            a[(2 * i + 1, 4)] = y;
            a[(2 * i + 1, 5)] = 1.0;
            a[(2 * i + 1, 6)] = -x * v;
            a[(2 * i + 1, 7)] = -y * v;
            b[2 * i + 1] = v;
        }
        let h = a.lu().solve(&b).ok_or_else(|| {
            OrthoError::Processing("degenerate quadrilateral, no perspective transform".to_string())
        })?;
        Ok(Self {
            m: Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0),
        })
    }

    /// Transform mapping the axis-aligned rectangle (0,0)..(w,h) onto a quad.
    pub fn rect_to_quad(w: f64, h: f64, dst: &[PixelPoint; 4]) -> OrthoResult<Self> {
        Self::from_quads(&[[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]], dst)
    }

    pub fn inverse(&self) -> OrthoResult<Self> {
        let inv = self.m.try_inverse().ok_or_else(|| {
            OrthoError::Processing("perspective transform is not invertible".to_string())
        })?;
        Ok(Self { m: inv })
    }

    /// Apply the transform to a point.
    pub fn apply(&self, x: f64, y: f64) -> PixelPoint {
        let w = self.m[(2, 0)] * x + self.m[(2, 1)] * y + self.m[(2, 2)];
        [
            (self.m[(0, 0)] * x + self.m[(0, 1)] * y + self.m[(0, 2)]) / w,
            (self.m[(1, 0)] * x + self.m[(1, 1)] * y + self.m[(1, 2)]) / w,
        ]
    }
}

/// Load one element's source raster and warp it into its canvas ROI.
///
/// Visual imagery is resampled bilinearly; radiometric matrices use
/// nearest-neighbor so raw values are never blended. Out-of-footprint pixels
/// stay fully transparent.
pub fn warp_element(store: &dyn RasterStore, element: &MapElement) -> OrthoResult<WarpedTile> {
    if element.radiometric {
        let mut matrix = store.load_matrix(&element.image_path)?;
        if element.use_lower_half {
            let rows = matrix.nrows();
            matrix = matrix.slice(s![rows / 2.., ..]).to_owned();
        }
        let h_inv = roi_transform(
            matrix.ncols() as f64,
            matrix.nrows() as f64,
            &element.px_corners,
        )?
        .inverse()?;
        let (values, alpha) = warp_matrix(&matrix, &h_inv, element.roi);
        Ok(WarpedTile::Radiometric { values, alpha })
    } else {
        let mut rgba = store.load_rgba(&element.image_path)?;
        if element.use_lower_half {
            let rows = rgba.shape()[0];
            rgba = rgba.slice(s![rows / 2.., .., ..]).to_owned();
        }
        let h_inv = roi_transform(
            rgba.shape()[1] as f64,
            rgba.shape()[0] as f64,
            &element.px_corners,
        )?
        .inverse()?;
        Ok(WarpedTile::Visual(warp_rgba(&rgba, &h_inv, element.roi)))
    }
}

/// Forward transform from the (possibly cropped) source rectangle to the
/// element's canvas-space footprint corners.
pub fn roi_transform(
    src_w: f64,
    src_h: f64,
    px_corners: &[PixelPoint; 4],
) -> OrthoResult<Homography> {
    Homography::rect_to_quad(src_w, src_h, px_corners)
}

/// Inverse-map bilinear warp of an RGBA buffer into a ROI-local tile.
fn warp_rgba(src: &Array3<u8>, h_inv: &Homography, roi: Roi) -> Array3<u8> {
    let (sh, sw) = (src.shape()[0], src.shape()[1]);
    let mut out = Array3::<u8>::zeros((roi.height, roi.width, 4));

    for i in 0..roi.height {
        for j in 0..roi.width {
            let [sx, sy] = h_inv.apply((roi.x + j) as f64, (roi.y + i) as f64);
            if sx < 0.0 || sy < 0.0 || sx > (sw - 1) as f64 || sy > (sh - 1) as f64 {
                continue;
            }
            let x0 = sx.floor() as usize;
            let y0 = sy.floor() as usize;
            let x1 = (x0 + 1).min(sw - 1);
            let y1 = (y0 + 1).min(sh - 1);
            let fx = sx - x0 as f64;
            let fy = sy - y0 as f64;
            for c in 0..4 {
                let v = src[[y0, x0, c]] as f64 * (1.0 - fx) * (1.0 - fy)
                    + src[[y0, x1, c]] as f64 * fx * (1.0 - fy)
                    + src[[y1, x0, c]] as f64 * (1.0 - fx) * fy
                    + src[[y1, x1, c]] as f64 * fx * fy;
                out[[i, j, c]] = v.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

/// Inverse-map nearest-neighbor warp of a radiometric matrix.
fn warp_matrix(src: &Array2<f32>, h_inv: &Homography, roi: Roi) -> (Array2<f32>, Array2<u8>) {
    let (sh, sw) = src.dim();
    let mut values = Array2::<f32>::zeros((roi.height, roi.width));
    let mut alpha = Array2::<u8>::zeros((roi.height, roi.width));

    for i in 0..roi.height {
        for j in 0..roi.width {
            let [sx, sy] = h_inv.apply((roi.x + j) as f64, (roi.y + i) as f64);
            let x = sx.round();
            let y = sy.round();
            if x < 0.0 || y < 0.0 || x > (sw - 1) as f64 || y > (sh - 1) as f64 {
                continue;
            }
            values[[i, j]] = src[[y as usize, x as usize]];
            alpha[[i, j]] = 255;
        }
    }
    (values, alpha)
}
