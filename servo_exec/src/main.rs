//! # Servo executable
//!
//! Runs the corridor servoing controller in closed loop against the simulated world, until the
//! end of the global trajectory is reached, the controller faults, or the cycle limit is hit.
//!
//! Every cycle's status report is archived as CSV, and any debug data produced by the planner is
//! saved as JSON in the session directory.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    thread,
    time::{Duration, Instant},
};

use color_eyre::{eyre::WrapErr, Result};
use log::{info, warn};
use serde::Serialize;

use servo_lib::{
    planner::WindowPlanner,
    servo_ctrl::{Params, ServoCtrl, ServoMode},
    sim::{SimParams, SimWorld},
};
use util::{
    archive::Archiver,
    logger::{logger_init, LevelFilter},
    session::{self, Session},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Target period of one cycle.
const CYCLE_PERIOD_S: f64 = 0.10;

/// Maximum number of cycles before giving up.
const MAX_NUM_CYCLES: u64 = 3000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Summary of a run, saved at the end of the session.
#[derive(Serialize)]
struct RunSummary {
    num_cycles: u64,
    final_mode: String,
    num_plans: u64,
    distance_travelled_m: f64,
    distance_to_goal_m: f64,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session =
        Session::new("servo_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger, the sweep tracker is very chatty at debug
    logger_init(
        LevelFilter::Trace,
        &[("servo_lib::sweep", LevelFilter::Info)],
        &session,
    )
    .wrap_err("Failed to initialise logging")?;

    info!("Corridor Servoing\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let servo_params: Params =
        util::params::load("servo_ctrl.toml").wrap_err("Could not load servo control params")?;
    let sim_params: SimParams =
        util::params::load("sim.toml").wrap_err("Could not load simulation params")?;

    // ---- MODULE INIT ----

    let planner = WindowPlanner::from_params_file("window_planner.toml")
        .wrap_err("Failed to initialise the planner")?;

    let mut servo =
        ServoCtrl::configure(servo_params, planner).wrap_err("Failed to configure ServoCtrl")?;
    info!("ServoCtrl init complete");

    let mut world = SimWorld::new(sim_params).wrap_err("Failed to create the simulated world")?;
    info!("Simulated world init complete");

    let mut status_archiver = Archiver::from_path(&session, "servo_status.csv")
        .wrap_err("Failed to create the status archive")?;

    servo.start().wrap_err("Failed to start ServoCtrl")?;

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let mut num_cycles = 0;

    while num_cycles < MAX_NUM_CYCLES {
        // Get cycle start time
        let cycle_start_instant = Instant::now();

        // ---- CONTROL ----

        let output = servo
            .tick(world.time_s(), &mut world)
            .wrap_err("Error ticking ServoCtrl")?;

        world.apply_output(&output);

        if let Some(debug) = output.debug.clone() {
            session.save(format!("debug/following_{:05}.json", num_cycles), debug);
        }

        status_archiver
            .serialise(&output.report)
            .wrap_err("Could not archive the status report")?;

        match output.mode {
            ServoMode::ReachedEndOfTrajectory => {
                info!(
                    "End of trajectory reached after {:.1} s",
                    world.time_s()
                );
                break;
            }
            ServoMode::Faulted(kind) => {
                warn!("ServoCtrl faulted ({:?}), exiting", kind);
                break;
            }
            _ => (),
        }

        // ---- SIMULATION ----

        world.advance(CYCLE_PERIOD_S);

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;

        match Duration::from_secs_f64(CYCLE_PERIOD_S).checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Cycle overran by {:.06} s",
                cycle_dur.as_secs_f64() - CYCLE_PERIOD_S
            ),
        }

        num_cycles += 1;
    }

    if num_cycles >= MAX_NUM_CYCLES {
        warn!("Cycle limit reached before the end of the trajectory");
    }

    // ---- SHUTDOWN ----

    let final_mode = servo.mode();
    let stop = servo.stop();
    world.apply_output(&stop);
    status_archiver
        .serialise(&stop.report)
        .wrap_err("Could not archive the status report")?;

    let summary = RunSummary {
        num_cycles,
        final_mode: final_mode.to_string(),
        num_plans: servo.state().num_plans,
        distance_travelled_m: world.distance_travelled_m(),
        distance_to_goal_m: world.distance_to_goal_m(),
    };
    info!(
        "Travelled {:.2} m with {} plans, {:.2} m from the goal",
        summary.distance_travelled_m, summary.num_plans, summary.distance_to_goal_m
    );
    session::save_with_timestamp("run_summary.json", summary);

    session.exit();

    Ok(())
}
