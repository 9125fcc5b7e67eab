use std::fs;
use std::io::Cursor;
use std::path::Path;

use exif::experimental::Writer;
use exif::{Field, In, Tag, Value};
use trackstamp::{
    batch_match, from_geojson, list_images, load_track_dataset, render, ExifReader, LinkOptions,
    MatchInput, OutputFormat,
};

const TRAIL_GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="fixture" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
    <name>Skyline Trail</name>
    <trkseg>
      <trkpt lat="46.7860" lon="-121.7350"><ele>1640.0</ele><time>2012-08-25T17:11:30Z</time></trkpt>
      <trkpt lat="46.7865" lon="-121.7345"><ele>1642.0</ele><time>2012-08-25T17:11:40Z</time></trkpt>
      <trkpt lat="46.7870" lon="-121.7340"><ele>1645.0</ele><time>2012-08-25T17:12:50Z</time></trkpt>
      <trkpt lat="46.7880" lon="-121.7330"><ele>1660.0</ele><time>2012-08-25T17:20:00Z</time></trkpt>
    </trkseg>
  </trk>
</gpx>
"#;

// Integration tests cannot reach the library's `#[cfg(test)]` helpers, so this
// mirrors `metadata::testing::jpeg_with_exif` for a single DateTimeOriginal.
fn jpeg_with_capture_time(text: &str) -> Vec<u8> {
    let field = Field {
        tag: Tag::DateTimeOriginal,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![text.as_bytes().to_vec()]),
    };
    let mut writer = Writer::new();
    writer.push_field(&field);
    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, false).unwrap();
    let tiff = tiff.into_inner();

    let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
    out.extend_from_slice(&((tiff.len() + 8) as u16).to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

fn write_fixture(dir: &Path) {
    fs::write(dir.join("trail.gpx"), TRAIL_GPX).unwrap();
    let images = dir.join("images");
    fs::create_dir(&images).unwrap();
    // Camera clock ran 4m56s ahead of the GPS.
    fs::write(images.join("DSC_9506.jpg"), jpeg_with_capture_time("2012:08:25 17:16:28")).unwrap();
    fs::write(images.join("DSC_9507.JPG"), jpeg_with_capture_time("2012:08:25 17:16:33")).unwrap();
    fs::write(images.join("DSC_9508.jpeg"), jpeg_with_capture_time("2012:08:25 17:17:44")).unwrap();
    fs::write(images.join("DSC_9509.jpg"), jpeg_with_capture_time("2012:08:25 19:25:00")).unwrap();
    fs::write(images.join("broken.jpg"), b"not a jpeg").unwrap();
    fs::write(images.join("notes.txt"), b"ignored").unwrap();
}

fn run(options: &LinkOptions) -> Vec<(String, f64)> {
    let config = options.validate().unwrap();
    let datasets: Vec<_> = config
        .track_paths
        .iter()
        .map(|p| load_track_dataset(p).unwrap())
        .collect();
    let folder = config.image_folder.clone().unwrap();
    let inputs: Vec<_> = list_images(&folder)
        .unwrap()
        .into_iter()
        .map(|path| {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            MatchInput::Image {
                path,
                payload: name,
            }
        })
        .collect();
    let matches = batch_match(inputs, &datasets, &config.params, &config.image_tz, &ExifReader);
    let text = render(config.output_format, &matches, &config.image_prefix).unwrap();
    from_geojson(&text)
        .unwrap()
        .features
        .into_iter()
        .map(|f| (f.properties.content, f.geometry.coordinates.1))
        .collect()
}

#[test]
fn image_offset_corrects_camera_clock() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    let options = LinkOptions {
        track_paths: vec![dir.path().join("trail.gpx")],
        image_folder: Some(dir.path().join("images")),
        offset_images: "-4m56s".to_string(),
        image_prefix: "ranier/".to_string(),
        ..LinkOptions::default()
    };

    let found = run(&options);
    assert_eq!(
        found,
        vec![
            ("ranier/DSC_9506.jpg".to_string(), 46.7860),
            ("ranier/DSC_9507.JPG".to_string(), 46.7865),
            ("ranier/DSC_9508.jpeg".to_string(), 46.7870),
        ]
    );
}

#[test]
fn gpx_offset_is_the_mirror_of_image_offset() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    let options = LinkOptions {
        track_paths: vec![dir.path().join("trail.gpx")],
        image_folder: Some(dir.path().join("images")),
        offset_gpx: "+4m56s".to_string(),
        ..LinkOptions::default()
    };

    let labels: Vec<_> = run(&options).into_iter().map(|(label, _)| label).collect();
    assert_eq!(labels, vec!["DSC_9506.jpg", "DSC_9507.JPG", "DSC_9508.jpeg"]);
}

#[test]
fn without_correction_nothing_matches() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    let options = LinkOptions {
        track_paths: vec![dir.path().join("trail.gpx")],
        image_folder: Some(dir.path().join("images")),
        output_format: OutputFormat::Geojson,
        ..LinkOptions::default()
    };
    assert!(run(&options).is_empty());
}

#[test]
fn image_timezone_is_applied_to_capture_times() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    // 19:25 local in UTC+2 is 17:25 UTC, 5 minutes after the last track point.
    let options = LinkOptions {
        track_paths: vec![dir.path().join("trail.gpx")],
        image_folder: Some(dir.path().join("images")),
        tz_images: "Etc/GMT-2".to_string(),
        accuracy: "5m1s".to_string(),
        ..LinkOptions::default()
    };
    let labels: Vec<_> = run(&options).into_iter().map(|(label, _)| label).collect();
    assert!(labels.contains(&"DSC_9509.jpg".to_string()));
}
