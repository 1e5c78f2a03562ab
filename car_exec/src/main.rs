//! # Car Executable
//!
//! This executable drives the robot car from camera images. The general execution methodology
//! consists of:
//!
//!     - Initialise the session, logging and parameters
//!     - Connect to the drive microcontroller over serial
//!     - Build the perception adapter (camera and vision service)
//!     - Run the control loop until interrupted:
//!         - Capture a frame
//!         - Ask the vision service for a decision
//!         - Send the decision to the microcontroller
//!     - Stop the car and save the run statistics into the session

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use color_eyre::{eyre::WrapErr, Result};
use log::{error, info, warn};
use structopt::StructOpt;

use car_lib::{
    ctrl_loop::{ControlLoop, LoopPolicy, ThreadTimer},
    params::CarExecParams,
    perception,
    serial_link::SerialLink,
};
use comms_if::serial::{MockTransport, SimDevice};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Front distance reported by the simulated microcontroller.
const SIM_FRONT_DISTANCE_CM: f64 = 100.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "car_exec", about = "Vision driven robot car")]
struct Opt {
    /// Parameter file, relative to the params directory of the software root
    #[structopt(long, default_value = "car_exec.toml")]
    params: String,

    /// Override the loop policy (stop_and_think, free_run or continuous_goal)
    #[structopt(long)]
    policy: Option<LoopPolicy>,

    /// Override the serial device
    #[structopt(long)]
    port: Option<String>,

    /// Stop after this many perception cycles
    #[structopt(long)]
    max_cycles: Option<u64>,

    /// Drive a simulated microcontroller instead of the serial device
    #[structopt(long)]
    sim: bool,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("car_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Car Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let mut params: CarExecParams =
        util::params::load(&opt.params).wrap_err("Could not load the car_exec parameters")?;

    if let Some(policy) = opt.policy {
        params.ctrl.policy = policy;
    }
    if let Some(ref port) = opt.port {
        params.link.port = port.clone();
    }
    if opt.max_cycles.is_some() {
        params.ctrl.max_cycles = opt.max_cycles;
    }

    info!("Parameters loaded, policy {}", params.ctrl.policy);

    // ---- INIT PERCEPTION ----

    let perception =
        perception::from_params(&params.camera, &params.vision, &session.images_root)
            .wrap_err("Failed to initialise the perception adapter")?;

    info!("Perception initialised");

    // ---- INIT SERIAL LINK ----

    let link_result = if opt.sim {
        warn!("Using a simulated microcontroller");
        SerialLink::with_transport(
            Box::new(MockTransport::with_device(SimDevice::with_telemetry(
                SIM_FRONT_DISTANCE_CM,
            ))),
            &params.link,
        )
    }
    else {
        SerialLink::connect(&params.link)
    };
    let link = link_result
        .wrap_err_with(|| format!("Failed to connect to {}", params.link.port))?;

    info!("Serial link initialised");

    // ---- INTERRUPT HANDLER ----

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .wrap_err("Failed to set the interrupt handler")?;
    }

    // ---- MAIN LOOP ----

    info!("Initialisation complete, entering control loop");

    let ctrl_loop = ControlLoop::new(
        link,
        perception,
        params.ctrl.clone(),
        params.telemetry.clone(),
        ThreadTimer,
        running,
    );

    let result = ctrl_loop.run();

    // ---- SHUTDOWN ----

    let stats = match result {
        Ok(ref s) => s,
        Err(ref e) => e.stats(),
    };

    match session.save_json("loop_stats.json", stats) {
        Ok(p) => info!("Loop statistics saved to {:?}", p),
        Err(e) => error!("Could not save the loop statistics: {}", e),
    }

    result.wrap_err("Control loop failed")?;

    info!("End of execution");

    Ok(())
}
