use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum, ValueHint};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use trackstamp::{
    batch_match, list_images, load_track_dataset, render, ExifReader, LinkConfig, LinkOptions,
    MatchInput, OutputFormat, TrackDataset, TsError,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Links timestamps in photographs to timestamps in GPX data",
    long_about = "Links timestamps in photographs to timestamps in GPX data. Each JPEG's \
                  capture time is matched against the closest track point or waypoint, and \
                  the matches are written as a GeoJSON point collection or a GPX waypoint list."
)]
struct Cli {
    /// Path to the GPX file to use
    #[arg(value_hint = ValueHint::FilePath)]
    track_path: PathBuf,

    /// Folder containing the images to match
    #[arg(value_hint = ValueHint::DirPath)]
    image_folder: PathBuf,

    /// Additional GPX files searched together with the first one
    #[arg(long = "extra-track", value_hint = ValueHint::FilePath)]
    extra_tracks: Vec<PathBuf>,

    /// Output file path (defaults to stdout)
    #[arg(short = 'o', long, value_hint = ValueHint::FilePath)]
    output_path: Option<PathBuf>,

    /// Output format
    #[arg(short = 't', long, value_enum, default_value_t = FormatOpt::Geojson)]
    output_format: FormatOpt,

    /// Time window that counts as a match, e.g. 30s, 1m, 2h20m
    #[arg(short = 'a', long, default_value = "1m", allow_hyphen_values = true)]
    accuracy: String,

    /// Time added to GPX timestamps before comparing (prefix "-" to subtract)
    #[arg(long, default_value = "0s", allow_hyphen_values = true)]
    offset_gpx: String,

    /// Time added to image timestamps before comparing (prefix "-" to subtract)
    #[arg(long, default_value = "0s", allow_hyphen_values = true)]
    offset_images: String,

    /// Timezone the image timestamps were recorded in
    #[arg(long, default_value = "UTC")]
    tz_images: String,

    /// Timezone the GPX timestamps are interpreted in
    #[arg(long, default_value = "UTC")]
    tz_gpx: String,

    /// String prepended to matched image names in the output
    #[arg(long, default_value = "")]
    image_prefix: String,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatOpt {
    Geojson,
    Gpx,
}

impl From<FormatOpt> for OutputFormat {
    fn from(value: FormatOpt) -> Self {
        match value {
            FormatOpt::Geojson => OutputFormat::Geojson,
            FormatOpt::Gpx => OutputFormat::Gpx,
        }
    }
}

impl Cli {
    fn link_options(&self) -> LinkOptions {
        let mut track_paths = vec![self.track_path.clone()];
        track_paths.extend(self.extra_tracks.iter().cloned());
        LinkOptions {
            track_paths,
            image_folder: Some(self.image_folder.clone()),
            output_path: self.output_path.clone(),
            output_format: self.output_format.into(),
            accuracy: self.accuracy.clone(),
            offset_gpx: self.offset_gpx.clone(),
            offset_images: self.offset_images.clone(),
            tz_images: self.tz_images.clone(),
            tz_gpx: self.tz_gpx.clone(),
            image_prefix: self.image_prefix.clone(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let (config, datasets) = match prepare(&cli) {
        Ok(prepared) => prepared,
        Err(lines) => {
            for line in lines {
                eprintln!("{}", line);
            }
            process::exit(2);
        }
    };

    handle_link(&config, &datasets)
}

/// Validate the options and load the track files. On failure, returns the
/// `ERROR:` lines to report; nothing has been matched or written yet.
fn prepare(cli: &Cli) -> std::result::Result<(LinkConfig, Vec<TrackDataset>), Vec<String>> {
    let config = cli.link_options().validate().map_err(|errors| {
        errors
            .to_string()
            .lines()
            .map(|line| format!("ERROR: {}", line))
            .collect::<Vec<_>>()
    })?;
    let datasets = load_datasets(&config).map_err(|failures| {
        failures
            .into_iter()
            .map(|message| format!("ERROR: {}", message))
            .collect::<Vec<_>>()
    })?;
    Ok((config, datasets))
}

/// Load every track file, collecting all failures before giving up.
fn load_datasets(config: &LinkConfig) -> std::result::Result<Vec<TrackDataset>, Vec<String>> {
    let mut datasets = Vec::with_capacity(config.track_paths.len());
    let mut failures = Vec::new();
    for path in &config.track_paths {
        match load_track_dataset(path) {
            Ok(dataset) => datasets.push(dataset),
            // Parse errors already name the file.
            Err(err @ TsError::UnparsableTrackFile(_)) => failures.push(err.to_string()),
            Err(err) => failures.push(format!("{}: {}", path.display(), err)),
        }
    }
    if failures.is_empty() {
        Ok(datasets)
    } else {
        Err(failures)
    }
}

fn handle_link(config: &LinkConfig, datasets: &[TrackDataset]) -> Result<()> {
    let folder = config
        .image_folder
        .as_ref()
        .context("no image folder configured")?;
    let images = list_images(folder)
        .with_context(|| format!("failed to list {}", folder.display()))?;
    info!("Found {} images in {}", images.len(), folder.display());

    let inputs: Vec<MatchInput<String>> = images
        .into_iter()
        .map(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            MatchInput::Image {
                path,
                payload: name,
            }
        })
        .collect();
    let total = inputs.len();

    let t_match = Instant::now();
    let matches = batch_match(
        inputs,
        datasets,
        &config.params,
        &config.image_tz,
        &ExifReader,
    );
    info!(
        "Matched {} of {} images in {:.1} ms",
        matches.len(),
        total,
        t_match.elapsed().as_secs_f64() * 1000.0
    );
    for m in &matches {
        debug!(
            "{} -> ({:.6}, {:.6}) at {}",
            m.payload, m.sample.latitude, m.sample.longitude, m.sample.time
        );
    }

    let document = render(config.output_format, &matches, &config.image_prefix)?;
    match config.output_path.as_ref() {
        Some(path) => {
            fs::write(path, &document)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(document.as_bytes())?;
            handle.write_all(b"\n")?;
        }
    }
    Ok(())
}
