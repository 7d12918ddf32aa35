use ardraw::{Error, Mode};
use cv_ar::nalgebra::Matrix3;
use cv_ar::{CameraModel, Outcome, Tracker, TrackerSettings};
use image::ImageOutputFormat;
use log::*;
use std::io::Write;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "ardraw",
    about = "A tool to draw chessboard poses and straight edges onto images"
)]
struct Opt {
    /// What to draw: checkerboard, contour, cube or edges.
    #[structopt(short, long, default_value = "checkerboard")]
    mode: Mode,
    /// The file where settings are specified.
    ///
    /// This is in the format of `cv_ar::TrackerSettings`. Defaults are used if this is
    /// not provided.
    #[structopt(short, long, parse(from_os_str))]
    settings: Option<PathBuf>,
    /// Writes what was found as JSON to this file.
    #[structopt(short, long, parse(from_os_str))]
    report: Option<PathBuf>,
    /// The side length of the cube in board squares.
    #[structopt(long, default_value = "3.0")]
    cube_size: f64,
    /// The x focal length
    #[structopt(long, default_value = "517.65350405")]
    x_focal: f64,
    /// The y focal length
    #[structopt(long, default_value = "518.2757208")]
    y_focal: f64,
    /// The x optical center coordinate
    #[structopt(long, default_value = "319.06418667")]
    x_center: f64,
    /// The y optical center coordinate
    #[structopt(long, default_value = "238.78380146")]
    y_center: f64,
    /// The skew
    #[structopt(long, default_value = "0.0")]
    skew: f64,
    /// Distortion coefficients in the order k1,k2,p1,p2[,k3[,k4,k5,k6]].
    ///
    /// Default values are for the phone camera the tracker was first calibrated on.
    #[structopt(
        long,
        use_delimiter = true,
        allow_hyphen_values = true,
        default_value = "0.209547937,-1.21926310,-0.00129976649,0.00252504602,2.26952234"
    )]
    distortion: Vec<f64>,
    /// The output path to write to (autodetects image type from extension).
    ///
    /// If this is not provided, then the output goes to stdout as a PNG.
    #[structopt(short, long, parse(from_os_str))]
    output: Option<PathBuf>,
    /// The image file to draw on.
    #[structopt(parse(from_os_str))]
    input: PathBuf,
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();
    if let Err(e) = run(opt) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(opt: Opt) -> Result<(), Error> {
    let settings = match &opt.settings {
        Some(path) => {
            let settings: TrackerSettings = serde_json::from_reader(std::fs::File::open(path)?)?;
            info!("loaded settings from {}", path.display());
            settings
        }
        None => {
            info!("using default settings");
            TrackerSettings::default()
        }
    };

    #[rustfmt::skip]
    let matrix = Matrix3::new(
        opt.x_focal, opt.skew,    opt.x_center,
        0.0,         opt.y_focal, opt.y_center,
        0.0,         0.0,         1.0,
    );
    let camera = CameraModel::new(matrix, &opt.distortion)?;
    let tracker = Tracker::with_planar_pattern(settings, camera)?;

    let image = image::open(&opt.input)?;
    info!(
        "opened {} ({}x{})",
        opt.input.display(),
        image.width(),
        image.height()
    );

    let (rendered, report) = match opt.mode {
        Mode::Checkerboard => {
            let (rendered, outcome) = ardraw::render_checkerboard(&tracker, &image)?;
            log_outcome(&outcome);
            (rendered, report_json(&outcome.found())?)
        }
        Mode::Cube => {
            let (rendered, outcome) = ardraw::render_cube(&tracker, &image, opt.cube_size)?;
            log_outcome(&outcome);
            (rendered, report_json(&outcome.found())?)
        }
        Mode::Contour => {
            let (rendered, segments) = ardraw::render_contour(&tracker, &image)?;
            info!("found {} segments", segments.len());
            (rendered, report_json(&segments)?)
        }
        Mode::Edges => {
            let rendered = ardraw::render_edges(tracker.settings(), &image)?;
            (rendered, report_json(&())?)
        }
    };

    if let Some(path) = &opt.report {
        std::fs::write(path, report)?;
        info!("wrote report to {}", path.display());
    }

    if let Some(path) = &opt.output {
        rendered.save(path)?;
    } else {
        // PNG encoding needs a seekable writer.
        let mut png = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(rendered).write_to(&mut png, ImageOutputFormat::Png)?;
        std::io::stdout().lock().write_all(png.get_ref())?;
    }
    Ok(())
}

fn log_outcome<T: AsRef<cv_ar::BoardTrack>>(outcome: &Outcome<T>) {
    match outcome {
        Outcome::Found(found) => {
            let track = found.as_ref();
            info!(
                "board found with {} inliers and {:.3} px RMS error",
                track.inliers.len(),
                track.rms_error
            );
            info!("rvec {:?}", track.pose.rvec.as_slice());
            info!("tvec {:?}", track.pose.tvec.as_slice());
        }
        Outcome::NotFound => info!("board not found"),
        Outcome::SolverFailed(failure) => warn!("board found but no pose: {}", failure.error),
    }
}

fn report_json<T: serde::Serialize>(value: &T) -> Result<String, Error> {
    Ok(serde_json::to_string_pretty(value)?)
}
