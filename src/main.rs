//! CLI entry point: loads configuration, starts the load balancer, drives a
//! synthetic task-generation simulation, and reports the results.
//!
//! Grounded in `original_source/src/main.c` and `load_balancer.c`'s
//! `balancer_run_simulation`, reshaped into a single sleeping loop with a
//! cooperative SIGINT flag rather than the source's fixed-duration-only
//! busy-loop.

mod workload;

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use clap::Parser;
use clock::SystemClock;
use logging::{Logger, TracingLogger};
use rand::Rng;
use scheduler::LoadBalancer;
use task::Priority;

/// The interval the simulation driver checks for new tasks to generate,
/// mirroring `original_source`'s 100ms `usleep` between generation attempts.
const SIMULATION_TICK: Duration = Duration::from_millis(100);

/// User-space CPU load balancer and task scheduler.
#[derive(Debug, Parser)]
#[command(name = "cpu-balancer", version, about = "Affinity-aware CPU load balancer and task scheduler")]
struct Args {
    /// Path to a YAML configuration file. Falls back to built-in defaults
    /// when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Length of the simulation, in seconds.
    #[arg(long, default_value_t = 30)]
    duration_secs: u64,

    /// Synthetic task generation rate, in tasks per second.
    #[arg(long, default_value_t = 2.0)]
    task_rate: f64,
}

fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match config::Config::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("failed to load configuration: {err}");
                std::process::exit(1);
            }
        },
        None => config::Config::default(),
    };

    if let Err(err) = logging::install_subscriber(
        config.log_file_path.as_deref().map(std::path::Path::new),
        config.enable_detailed_logging,
    ) {
        eprintln!("failed to install logging subscriber: {err}");
        std::process::exit(1);
    }

    let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
    let balancer = Arc::new(LoadBalancer::new(config, logger.clone(), Arc::new(SystemClock)));

    let interrupted = Arc::new(AtomicBool::new(false));
    if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGINT, interrupted.clone()) {
        logger.warning(&format!(
            "failed to install SIGINT handler: {err}; graceful shutdown via signal will not be available"
        ));
    }

    logger.info("starting load balancer simulation");
    balancer.start();

    run_simulation(&balancer, &interrupted, Duration::from_secs(args.duration_secs), args.task_rate);

    balancer.stop();
    balancer.wait_quiescent();

    print_summary(&balancer);
}

/// Generates synthetic tasks at roughly `task_rate` per second until
/// `duration` has elapsed or `interrupted` is observed set.
///
/// The probability per tick of `SIMULATION_TICK` is `task_rate / 10.0`,
/// matching `original_source/src/load_balancer.c`'s
/// `balancer_run_simulation` (rate is tasks/sec, ticks happen every 100ms,
/// i.e. 10 per second).
fn run_simulation(balancer: &LoadBalancer, interrupted: &AtomicBool, duration: Duration, task_rate: f64) {
    let mut rng = rand::thread_rng();
    let deadline = Instant::now() + duration;
    let generation_probability = task_rate / 10.0;

    while Instant::now() < deadline {
        if interrupted.load(Ordering::Relaxed) {
            break;
        }

        if rng.gen::<f64>() < generation_probability {
            let workload_secs = rng.gen::<f64>() * 1.9 + 0.1; // 0.1..=2.0s, per the source's range
            let payload = workload::cpu_burn(Duration::from_secs_f64(workload_secs));
            if balancer.submit(payload, Priority::Medium).is_err() {
                break;
            }
        }

        std::thread::sleep(SIMULATION_TICK);
    }
}

fn print_summary(balancer: &LoadBalancer) {
    println!("\nSimulation results:");
    println!("Total tasks submitted:  {}", balancer.total_submitted());
    println!("Total tasks completed:  {}", balancer.total_completed());
    println!("Total tasks failed:     {}", balancer.total_failed());

    for stats in balancer.monitor().all_stats() {
        println!(
            "CPU {} processed {} task(s)",
            stats.cpu_id(),
            stats.total_tasks_processed()
        );
    }
}
