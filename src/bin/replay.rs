//! Replay a recorded session file through the estimator and print a
//! trajectory summary. Mirrors the teacher's `src/bin/replay.rs`
//! (`clap::Parser` args, reading a JSON log from disk) adapted to the
//! estimator's own session format instead of a comparison-filter log.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use vio_estimator::config::VioConfig;
use vio_estimator::orchestrator::VioOrchestrator;
use vio_estimator::session::{Session, SessionRecord};

#[derive(Parser, Debug)]
struct Args {
    /// Path to a session JSON file.
    #[arg(long)]
    session: PathBuf,

    /// Print one line per processed camera frame.
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let session = Session::load(&args.session)
        .with_context(|| format!("loading session {}", args.session.display()))?;
    let mut orchestrator = VioOrchestrator::new(VioConfig::default());

    for record in &session.records {
        if args.verbose {
            if let SessionRecord::Camera { timestamp, .. } = record {
                println!("frame t={timestamp:.3}");
            }
        }
        Session {
            records: vec![record.clone()],
        }
        .drive(&mut orchestrator);
    }

    let state = orchestrator.state();
    println!("initialized: {}", orchestrator.is_initialized());
    println!("final timestamp: {:.3}", state.timestamp);
    println!(
        "final position (m): [{:.3}, {:.3}, {:.3}]",
        state.imu.pos.x, state.imu.pos.y, state.imu.pos.z
    );
    println!("clones: {} landmarks: {}", state.clones.len(), state.landmarks.len());
    Ok(())
}
