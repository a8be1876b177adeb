use anyhow::Result;
use chrono::{TimeZone, Utc};
use ndarray::Array2;
use orthoweave::{
    CameraPose, DiskRasterStore, GpsPosition, Hemisphere, MapAggregate, MapElement, MapGenerator,
    MapPersistence, NullProgress, OrthoConfig, OrthoResult, RasterStore, SourceImageRecord,
    UtmPosition,
};
use std::path::Path;
use std::sync::{Arc, Mutex};

struct SinkPersistence {
    count: Mutex<usize>,
}

impl MapPersistence for SinkPersistence {
    fn persist(&self, _map: &MapAggregate, elements: &[MapElement]) -> OrthoResult<()> {
        *self.count.lock().unwrap() = elements.len();
        Ok(())
    }
}

fn thermal_record(
    id: &str,
    image_path: &Path,
    matrix_path: &Path,
    easting: f64,
    northing: f64,
) -> SourceImageRecord {
    SourceImageRecord {
        id: id.to_string(),
        path: image_path.to_path_buf(),
        width: 64,
        height: 64,
        captured_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        utm: UtmPosition {
            easting,
            northing,
            zone: 32,
            hemisphere: Hemisphere::North,
        },
        gps: GpsPosition {
            lat: 47.85,
            lon: 9.0,
        },
        pose: CameraPose {
            fov_deg: 60.0,
            relative_alt_m: 80.0,
            camera_yaw_deg: Some(90.0),
            camera_pitch_deg: -90.0,
            camera_roll_deg: 0.0,
            platform_yaw_deg: 90.0,
        },
        radiometric: true,
        matrix_path: Some(matrix_path.to_path_buf()),
    }
}

#[test]
fn test_thermal_pair_composites_raw_values() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir()?;
    let store = DiskRasterStore::new();

    // Two overlapping thermal frames: a cool one and a warmer one, as
    // pre-decoded temperature grids. The image paths do not even exist;
    // warping must go through the matrices.
    let cool_matrix = dir.path().join("cool.f32");
    let warm_matrix = dir.path().join("warm.f32");
    store.save_matrix(&cool_matrix, &Array2::from_elem((64, 64), 21.5))?;
    store.save_matrix(&warm_matrix, &Array2::from_elem((64, 64), 33.0))?;

    let records = vec![
        thermal_record(
            "cool",
            &dir.path().join("cool.jpg"),
            &cool_matrix,
            500_000.0,
            5_300_000.0,
        ),
        thermal_record(
            "warm",
            &dir.path().join("warm.jpg"),
            &warm_matrix,
            500_040.0,
            5_300_000.0,
        ),
    ];

    let output = dir.path().join("thermal.png");
    let persistence = SinkPersistence {
        count: Mutex::new(0),
    };
    let generator = MapGenerator::new(
        OrthoConfig {
            target_resolution: 256,
            worker_count: 2,
            ..OrthoConfig::default()
        },
        Arc::new(store),
    );
    let result = generator.generate("thermal", &records, &output, &NullProgress, &persistence)?;

    assert_eq!(result.elements.len(), 2);
    assert_eq!(*persistence.count.lock().unwrap(), 2);
    // The matrix was substituted as the warp source
    assert_eq!(result.elements[0].image_path, cool_matrix);

    let raster = DiskRasterStore::new().load_rgba(&output)?;
    let center = |i: usize| {
        let cx = result.elements[i].px_center[0].round() as usize;
        let cy = result.elements[i].px_center[1].round() as usize;
        [
            raster[[cy, cx, 0]],
            raster[[cy, cx, 1]],
            raster[[cy, cx, 2]],
            raster[[cy, cx, 3]],
        ]
    };
    let cool_px = center(0);
    let warm_px = center(1);

    // Both centers are drawn with full coverage alpha
    assert_eq!(cool_px[3], 255);
    assert_eq!(warm_px[3], 255);
    // Min-max normalization maps the two temperatures to different LUT ends
    assert_ne!(&cool_px[0..3], &warm_px[0..3]);
    // The warm end of the gradient is brighter in the red channel
    assert!(warm_px[0] > cool_px[0]);

    Ok(())
}

#[test]
fn test_thermal_missing_matrix_falls_back_to_image() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = DiskRasterStore::new();

    // No matrix on disk: the footprint keeps the image path, and the
    // raster store decodes its luminance as values.
    let image = dir.path().join("plain.png");
    let mut buffer = ndarray::Array3::zeros((64, 64, 4));
    for v in buffer.iter_mut() {
        *v = 200;
    }
    store.save_rgba(&image, &buffer)?;

    let mut record = thermal_record(
        "fallback",
        &image,
        &dir.path().join("never-written.f32"),
        500_000.0,
        5_300_000.0,
    );
    record.matrix_path = None;

    let output = dir.path().join("thermal.png");
    let persistence = SinkPersistence {
        count: Mutex::new(0),
    };
    let generator = MapGenerator::new(
        OrthoConfig {
            target_resolution: 128,
            worker_count: 2,
            ..OrthoConfig::default()
        },
        Arc::new(store),
    );
    let result = generator.generate("fallback", &[record], &output, &NullProgress, &persistence)?;

    assert_eq!(result.elements[0].image_path, image);
    let raster = DiskRasterStore::new().load_rgba(&output)?;
    let cx = result.elements[0].px_center[0].round() as usize;
    let cy = result.elements[0].px_center[1].round() as usize;
    assert_eq!(raster[[cy, cx, 3]], 255);

    Ok(())
}
