//! # Perception test
//!
//! Runs a single capture or a single inference with the configured perception adapter, for
//! checking the camera and the vision helper without driving the car.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::path::PathBuf;

use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use log::info;
use structopt::StructOpt;

use car_lib::{
    params::CarExecParams,
    perception::{self, Perception},
};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "perception_test", about = "Exercise the perception adapter")]
struct Opt {
    /// Parameter file, relative to the params directory of the software root
    #[structopt(long, default_value = "car_exec.toml")]
    params: String,

    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, StructOpt)]
enum Cmd {
    /// Capture one frame into the session's images directory
    Capture,

    /// Ask the vision service for a decision on an existing image
    Infer {
        #[structopt(parse(from_os_str))]
        image: PathBuf,
    },
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let opt = Opt::from_args();

    let session =
        Session::new("perception_test", "sessions").wrap_err("Failed to create the session")?;
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    let params: CarExecParams =
        util::params::load(&opt.params).wrap_err("Could not load the car_exec parameters")?;

    match opt.cmd {
        Cmd::Capture => {
            let mut adapter =
                perception::from_params(&params.camera, &params.vision, &session.images_root)
                    .wrap_err("Failed to initialise the perception adapter")?;

            let path = adapter.capture().wrap_err("Capture failed")?;
            info!("Frame saved to {:?}", path);
            println!("{}", path.display());
        }
        Cmd::Infer { image } => {
            if !image.is_file() {
                return Err(eyre!("File not found: {}", image.display()));
            }

            // Inference never touches the camera
            let mut adapter = perception::Adapter::new(
                NoCamera,
                perception::CommandVision::new(&params.vision),
            );

            let cmd = adapter.infer(&image).wrap_err("Inference failed")?;
            info!("Vision decision for {:?}: '{}'", image, cmd);
            println!("{}", cmd);
        }
    }

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// PRIVATE
// ------------------------------------------------------------------------------------------------

struct NoCamera;

impl perception::Camera for NoCamera {
    fn capture(&mut self) -> Result<PathBuf, perception::CaptureError> {
        Err(perception::CaptureError::Unsupported(String::from(
            "no camera in inference mode",
        )))
    }
}
