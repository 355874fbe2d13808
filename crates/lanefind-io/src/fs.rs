//! Directory listing, image decode/encode, and config files.

use std::path::{Path, PathBuf};

use image::{EncodableLayout, ImageBuffer, ImageFormat, PixelWithColorType, RgbImage};
use lanefind_pipeline::PipelineConfig;
use walkdir::WalkDir;

use crate::error::{IoError, Result};

/// Prefix of every composited output file.
pub const OUTPUT_PREFIX: &str = "out_";

/// List the regular files directly inside `dir`, sorted by file name.
///
/// Subdirectories are not descended into and are not returned. Symlinks
/// are followed, so a link to a file counts as a file.
///
/// # Errors
///
/// Returns [`IoError::NotADirectory`] if `dir` is missing or not a
/// directory, and [`IoError::ReadDir`] if listing fails.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(IoError::NotADirectory(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| IoError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Read and decode an image file as 8-bit RGB.
///
/// The format is guessed from the file contents. Alpha is dropped and
/// deeper or single-channel images are converted.
///
/// # Errors
///
/// Returns [`IoError::Decode`] if the file cannot be read or is not a
/// supported image.
pub fn load_image(path: &Path) -> Result<RgbImage> {
    let reader = image::ImageReader::open(path)
        .map_err(|source| IoError::Decode {
            path: path.to_path_buf(),
            source: image::ImageError::IoError(source),
        })?
        .with_guessed_format()
        .map_err(|source| IoError::Decode {
            path: path.to_path_buf(),
            source: image::ImageError::IoError(source),
        })?;
    let decoded = reader.decode().map_err(|source| IoError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(decoded.into_rgb8())
}

/// Encode an 8-bit image as PNG at `path`, replacing any existing file.
///
/// # Errors
///
/// Returns [`IoError::Encode`] if the file cannot be written.
pub fn save_png<P>(image: &ImageBuffer<P, Vec<P::Subpixel>>, path: &Path) -> Result<()>
where
    P: PixelWithColorType,
    [P::Subpixel]: EncodableLayout,
{
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|source| IoError::Encode {
            path: path.to_path_buf(),
            source,
        })
}

/// Name of the composited output for `input`: `out_<stem>.png`.
///
/// Returns `None` when `input` has no file stem.
#[must_use]
pub fn output_file_name(input: &Path) -> Option<String> {
    let stem = input.file_stem()?;
    Some(format!("{OUTPUT_PREFIX}{}.png", stem.to_string_lossy()))
}

/// Name of an intermediate raster for `input`: `<stem>_<stage>.png`.
#[must_use]
pub fn stage_file_name(input: &Path, stage: &str) -> Option<String> {
    let stem = input.file_stem()?;
    Some(format!("{}_{stage}.png", stem.to_string_lossy()))
}

/// Parse a JSON `PipelineConfig`. Missing fields take their defaults.
///
/// `origin` names the source in error messages.
///
/// # Errors
///
/// Returns [`IoError::Config`] for malformed JSON and
/// [`IoError::Pipeline`] if the parsed config fails validation.
pub fn parse_config(json: &str, origin: &str) -> Result<PipelineConfig> {
    let config: PipelineConfig =
        serde_json::from_str(json).map_err(|source| IoError::Config {
            origin: origin.to_string(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

/// Load a JSON `PipelineConfig` from a file.
///
/// # Errors
///
/// Returns [`IoError::FileSystem`] if the file cannot be read, plus the
/// errors of [`parse_config`].
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let json = std::fs::read_to_string(path).map_err(|source| IoError::FileSystem {
        operation: "read config",
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&json, &path.display().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lanefind_pipeline::PipelineError;

    #[test]
    fn output_name_replaces_extension() {
        let name = |p: &str| output_file_name(Path::new(p));
        assert_eq!(name("solidWhiteRight.jpg").as_deref(), Some("out_solidWhiteRight.png"));
        assert_eq!(name("dir/road.jpeg").as_deref(), Some("out_road.png"));
        assert_eq!(name("frame.01.png").as_deref(), Some("out_frame.01.png"));
        assert_eq!(name("noext").as_deref(), Some("out_noext.png"));
        assert_eq!(name(".."), None);
    }

    #[test]
    fn stage_name_appends_stage() {
        assert_eq!(
            stage_file_name(Path::new("a/road.jpg"), "edges").as_deref(),
            Some("road_edges.png")
        );
    }

    #[test]
    fn list_images_sorted_files_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.jpg", "c.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("d.png"), b"x").unwrap();

        let files = list_images(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.jpg", "b.png", "c.txt"]);
    }

    #[test]
    fn list_images_on_file_is_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.png");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(list_images(&file), Err(IoError::NotADirectory(_))));
        assert!(matches!(
            list_images(&dir.path().join("missing")),
            Err(IoError::NotADirectory(_))
        ));
    }

    #[test]
    fn empty_directory_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_images(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn png_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.png");
        let img = RgbImage::from_fn(5, 3, |x, y| {
            image::Rgb([
                u8::try_from(x * 40).unwrap(),
                u8::try_from(y * 80).unwrap(),
                7,
            ])
        });
        save_png(&img, &path).unwrap();
        assert_eq!(load_image(&path).unwrap(), img);
    }

    #[test]
    fn gray_png_loads_as_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        save_png(&image::GrayImage::from_pixel(2, 2, image::Luma([90])), &path).unwrap();
        let img = load_image(&path).unwrap();
        assert!(img.pixels().all(|p| p.0 == [90, 90, 90]));
    }

    #[test]
    fn format_guessed_from_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mislabelled.jpg");
        let img = RgbImage::from_pixel(3, 3, image::Rgb([1, 2, 3]));
        save_png(&img, &dir.path().join("real.png")).unwrap();
        std::fs::rename(dir.path().join("real.png"), &path).unwrap();
        assert_eq!(load_image(&path).unwrap(), img);
    }

    #[test]
    fn non_image_fails_to_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(matches!(load_image(&path), Err(IoError::Decode { .. })));
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config = parse_config(r#"{"hough_threshold": 20}"#, "test").unwrap();
        assert_eq!(config.hough_threshold, 20);
        assert_eq!(config.canny_high, PipelineConfig::DEFAULT_CANNY_HIGH);
    }

    #[test]
    fn malformed_config_rejected() {
        let err = parse_config("{", "--config-json").unwrap_err();
        assert!(matches!(err, IoError::Config { ref origin, .. } if origin == "--config-json"));
    }

    #[test]
    fn invalid_config_values_rejected() {
        let err = parse_config(r#"{"canny_low": 160}"#, "test").unwrap_err();
        assert!(matches!(
            err,
            IoError::Pipeline(PipelineError::InvalidThreshold {
                low: 160,
                high: 150
            })
        ));
    }

    #[test]
    fn config_file_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lanefind.json");
        std::fs::write(&path, r#"{"line_thickness": 3, "line_color": [0, 255, 0]}"#).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.line_thickness, 3);
        assert_eq!(config.line_color, [0, 255, 0]);
        assert!(matches!(
            load_config(&dir.path().join("missing.json")),
            Err(IoError::FileSystem { .. })
        ));
    }
}
