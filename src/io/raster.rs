use crate::types::{OrthoError, OrthoResult};
use ndarray::{Array2, Array3};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Raster load/store capability the engine delegates to.
///
/// The pipeline only needs "readable raster" and "readable numeric matrix";
/// codecs and storage layout belong to the implementor.
pub trait RasterStore: Send + Sync {
    /// Load an image as an RGBA buffer (height x width x 4), adding an
    /// opaque alpha channel when the source has none.
    fn load_rgba(&self, path: &Path) -> OrthoResult<Array3<u8>>;

    /// Load a radiometric value matrix.
    fn load_matrix(&self, path: &Path) -> OrthoResult<Array2<f32>>;

    /// Write an RGBA buffer to disk.
    fn save_rgba(&self, path: &Path, buffer: &Array3<u8>) -> OrthoResult<()>;
}

/// Disk-backed raster store.
///
/// Conventional formats go through the `image` crate. Pre-decoded
/// radiometric matrices use a raw little-endian grid file (extension
/// `.f32`): two u32 dimensions (rows, cols) followed by rows*cols f32
/// values. A radiometric path that is not a grid file falls back to the
/// image's luminance scaled to 0..255.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskRasterStore;

impl DiskRasterStore {
    pub fn new() -> Self {
        Self
    }

    /// Write a matrix in the raw grid format read by `load_matrix`.
    pub fn save_matrix(&self, path: &Path, matrix: &Array2<f32>) -> OrthoResult<()> {
        let (rows, cols) = matrix.dim();
        let mut file = File::create(path)?;
        file.write_all(&(rows as u32).to_le_bytes())?;
        file.write_all(&(cols as u32).to_le_bytes())?;
        for v in matrix.iter() {
            file.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    fn load_grid(&self, path: &Path) -> OrthoResult<Array2<f32>> {
        let mut file = File::open(path)?;
        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        let rows = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
        let cols = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;
        if raw.len() != rows * cols * 4 {
            return Err(OrthoError::Processing(format!(
                "matrix file {} has {} payload bytes, expected {}",
                path.display(),
                raw.len(),
                rows * cols * 4
            )));
        }
        let values: Vec<f32> = raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(b.try_into().unwrap()))
            .collect();
        Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| OrthoError::Processing(format!("matrix shape error: {}", e)))
    }
}

impl RasterStore for DiskRasterStore {
    fn load_rgba(&self, path: &Path) -> OrthoResult<Array3<u8>> {
        let rgba = image::open(path)?.to_rgba8();
        let (w, h) = (rgba.width() as usize, rgba.height() as usize);
        Array3::from_shape_vec((h, w, 4), rgba.into_raw())
            .map_err(|e| OrthoError::Processing(format!("RGBA shape error: {}", e)))
    }

    fn load_matrix(&self, path: &Path) -> OrthoResult<Array2<f32>> {
        if path.extension().and_then(|e| e.to_str()) == Some("f32") {
            return self.load_grid(path);
        }
        log::debug!(
            "No grid file at {}, decoding image luminance instead",
            path.display()
        );
        let luma = image::open(path)?.to_luma32f();
        let (w, h) = (luma.width() as usize, luma.height() as usize);
        let values: Vec<f32> = luma.into_raw().into_iter().map(|v| v * 255.0).collect();
        Array2::from_shape_vec((h, w), values)
            .map_err(|e| OrthoError::Processing(format!("luminance shape error: {}", e)))
    }

    fn save_rgba(&self, path: &Path, buffer: &Array3<u8>) -> OrthoResult<()> {
        let (h, w, channels) = buffer.dim();
        if channels != 4 {
            return Err(OrthoError::Processing(format!(
                "expected 4-channel buffer, got {}",
                channels
            )));
        }
        let raw = buffer.as_standard_layout().iter().copied().collect();
        let img = image::RgbaImage::from_raw(w as u32, h as u32, raw).ok_or_else(|| {
            OrthoError::Processing("buffer size does not match dimensions".to_string())
        })?;
        img.save(path)?;
        Ok(())
    }
}
