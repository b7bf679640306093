//! Deburring MPC command-line driver.
//!
//! Provides four modes of operation:
//! - `run`: Drive a simulated arm towards a target with the MPC loop
//! - `capture`: Same as `run`, archiving every command for replay
//! - `replay`: Re-run a fresh controller over an archive and diff it
//! - `info`: Print the robot model and controller settings

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use nalgebra::Isometry3;
use tracing_subscriber::EnvFilter;

use deburr_mpc::{
    ControlLoop, ControllerSettings, FixedTarget, LoopStats, MpcPoint, ReplayTolerances,
    SimulatedRobot, replay_commands,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Receding-horizon MPC for manipulator point reaching.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a simulated arm towards the target and print loop statistics.
    Run(LoopArgs),

    /// Run like `run` and write every command to a debug archive.
    Capture {
        #[command(flatten)]
        args: LoopArgs,

        /// Archive to write.
        #[arg(short, long, default_value = "mpc_debug.json")]
        output: PathBuf,
    },

    /// Replay an archive with a fresh controller and report mismatches.
    Replay {
        /// Controller settings (TOML).
        #[arg(short, long)]
        config: PathBuf,

        /// Archive produced by `capture`.
        #[arg(short, long)]
        archive: PathBuf,

        /// Target used during capture, `x,y,z`.
        #[arg(long, value_delimiter = ',', num_args = 3, default_values_t = [0.6, 0.4, 1.1])]
        target: Vec<f64>,
    },

    /// Print the robot model and controller settings.
    Info {
        /// Controller settings (TOML).
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Args)]
struct LoopArgs {
    /// Controller settings (TOML).
    #[arg(short, long)]
    config: PathBuf,

    /// Control ticks to run.
    #[arg(short = 'n', long, default_value_t = 100)]
    ticks: u64,

    /// Target translation `x,y,z` (world frame, or tool frame with mocap).
    #[arg(long, value_delimiter = ',', num_args = 3, default_values_t = [0.6, 0.4, 1.1])]
    target: Vec<f64>,

    /// Integrator substeps per control period in the simulated plant.
    #[arg(long, default_value_t = 4)]
    substeps: usize,

    /// Sleep out each period instead of running ticks back to back.
    #[arg(long)]
    realtime: bool,
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn target_pose(xyz: &[f64]) -> anyhow::Result<Isometry3<f64>> {
    let [x, y, z] = xyz else {
        bail!("target needs exactly three values, got {}", xyz.len());
    };
    Ok(Isometry3::translation(*x, *y, *z))
}

fn load(path: &Path) -> anyhow::Result<ControllerSettings> {
    ControllerSettings::from_file(path)
        .with_context(|| format!("failed to load settings from {}", path.display()))
}

fn run_loop(args: &LoopArgs, capture: bool) -> anyhow::Result<MpcPoint> {
    let settings = load(&args.config)?;
    let target = target_pose(&args.target)?;
    let mut mpc = MpcPoint::from_settings(&settings)?;
    mpc.set_debug_capture(capture);
    tracing::info!(
        config = %args.config.display(),
        ticks = args.ticks,
        substeps = args.substeps,
        realtime = args.realtime,
        capture,
        "starting control loop"
    );

    let designer = mpc.designer().clone();
    let dt = settings.ocp.time_step;
    let robot = SimulatedRobot::new(designer.clone(), designer.neutral_state(), dt)?
        .with_substeps(args.substeps);
    let period = Duration::from_secs_f64(dt);

    let mut control = ControlLoop::new(mpc, robot, FixedTarget(target), period, args.realtime);
    let stats = control.run(args.ticks)?;
    if stats.not_converged > 0 || stats.overruns > 0 {
        tracing::warn!(
            not_converged = stats.not_converged,
            overruns = stats.overruns,
            ticks = stats.ticks,
            "control loop degraded"
        );
    }
    print_stats(&stats);

    let (mpc, robot, _) = control.into_parts();
    let x = robot.state();
    let reached = designer.end_effector_pose(&x.as_slice()[..designer.nq()]);
    let error = (reached.translation.vector - mpc.world_target().translation.vector).norm();
    println!(
        "end effector: [{:.4}, {:.4}, {:.4}], distance to target {error:.4} m",
        reached.translation.x, reached.translation.y, reached.translation.z
    );
    Ok(mpc)
}

fn print_stats(stats: &LoopStats) {
    println!(
        "ticks={}, overruns={}, not_converged={}, worst_tick={:.2} ms, cost={:.6}",
        stats.ticks,
        stats.overruns,
        stats.not_converged,
        stats.worst_tick.as_secs_f64() * 1e3,
        stats.last_cost
    );
}

fn run_capture(args: &LoopArgs, output: &Path) -> anyhow::Result<()> {
    let mpc = run_loop(args, true)?;
    mpc.dump_to_file(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    tracing::info!(
        records = mpc.debug_records().len(),
        path = %output.display(),
        "debug archive written"
    );
    println!("wrote {} records to {}", mpc.debug_records().len(), output.display());
    Ok(())
}

fn run_replay(config: &Path, archive: &Path, target: &[f64]) -> anyhow::Result<()> {
    let settings = load(config)?;
    let target = target_pose(target)?;
    let records = MpcPoint::fetch_from_file(archive)
        .with_context(|| format!("failed to read {}", archive.display()))?;
    let mut mpc = MpcPoint::from_settings(&settings)?;
    tracing::info!(
        records = records.len(),
        archive = %archive.display(),
        "replaying archive"
    );

    let report = replay_commands(&mut mpc, &records, &target, &ReplayTolerances::default())?;
    let [state, control, gain] = report.max_errors;
    println!(
        "compared {} records: max control error {control:.3e}, max gain error {gain:.3e}, max state error {state:.3e}",
        report.compared
    );
    for m in &report.mismatches {
        tracing::warn!(record = m.index, kind = %m.kind, error = m.error, "replay mismatch");
    }
    if !report.is_match() {
        bail!("{} mismatches against {}", report.mismatches.len(), archive.display());
    }
    println!("replay matches archive");
    Ok(())
}

fn run_info(config: &Path) -> anyhow::Result<()> {
    let settings = load(config)?;
    let mpc = MpcPoint::from_settings(&settings)?;
    let designer = mpc.designer();

    println!("deburr v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("robot: {}", settings.robot.urdf_path.display());
    println!("  joints:       {}", designer.joint_names().join(", "));
    println!("  nq={}, nv={}, nu={}", designer.nq(), designer.nv(), designer.nu());
    let (lower, upper) = designer.position_limits();
    for (name, (lo, hi)) in designer.joint_names().iter().zip(lower.iter().zip(upper.iter())) {
        println!("  {name:<12} [{lo:+.3}, {hi:+.3}] rad");
    }
    let pose = designer.end_effector_pose(designer.neutral_configuration().as_slice());
    println!(
        "  {} at neutral: [{:.4}, {:.4}, {:.4}]",
        designer.tool_frame_name(),
        pose.translation.x,
        pose.translation.y,
        pose.translation.z
    );
    println!();
    let ocp = &settings.ocp;
    println!(
        "ocp: N={}, dt={} s, iterations={} (first solve {})",
        ocp.horizon_length, ocp.time_step, ocp.solver_iterations, ocp.first_solve_iterations
    );
    println!(
        "  weights: goal={}, posture={}, control={}, state_limits={}, control_limits={}",
        ocp.goal_weight,
        ocp.posture_weight,
        ocp.control_weight,
        ocp.state_limits_weight,
        ocp.control_limits_weight
    );
    println!(
        "mpc: use_mocap={}, gain_scheduling={} (slope {}, max goal weight {})",
        settings.mpc.use_mocap,
        settings.mpc.use_gain_scheduling,
        settings.mpc.gain_scheduling_slope,
        settings.max_goal_weight()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_loop(&args, false).map(|_| ()),
        Commands::Capture { args, output } => run_capture(&args, &output),
        Commands::Replay {
            config,
            archive,
            target,
        } => run_replay(&config, &archive, &target),
        Commands::Info { config } => run_info(&config),
    }
}
