use std::fs::File;
use std::time::Instant;

use clap::Parser;

use cachesim::config::CONFIG_USAGE;
use cachesim::io::read_trace;
use cachesim::simulator::Simulator;

#[derive(Parser, Debug)]
#[command(about = String::from("Trace-driven cache hierarchy simulator"))]
struct Args {
    /// Path to the fixed-width trace file to replay
    trace: String,

    /// Instruction cache geometry, `sets:ways:linesz[:policy]`; receives
    /// fetch records
    #[arg(long)]
    icache: Option<String>,

    /// Data cache geometry, `sets:ways:linesz[:policy]`; receives load and
    /// store records
    #[arg(long)]
    dcache: Option<String>,

    /// Shared second-level cache behind both first-level caches
    #[arg(long)]
    l2: Option<String>,

    /// Log individual misses to stderr
    #[arg(short, long)]
    log: bool,

    /// Emit the final statistics as JSON instead of the plain-text report
    #[arg(short, long)]
    json: bool,

    /// Report wall-clock simulation time
    #[arg(short, long)]
    performance: bool,
}

fn main() {
    let start = Instant::now();
    let args = Args::parse();

    let mut builder = pretty_env_logger::formatted_builder();
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    } else if args.log {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    if let Err(message) = run(&args, start) {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

fn run(args: &Args, start: Instant) -> Result<(), String> {
    let mut simulator = Simulator::new(
        args.icache.as_deref(),
        args.dcache.as_deref(),
        args.l2.as_deref(),
    )
    .map_err(|e| format!("{e}\n{CONFIG_USAGE}"))?;
    simulator.set_log(args.log);

    let trace_file = File::open(&args.trace)
        .map_err(|e| format!("couldn't open the trace file at path {}: {e}", args.trace))?;
    let trace = read_trace(trace_file)?;
    let result = simulator.simulate(trace.as_ref())?;

    if args.performance {
        let simulation_time = simulator.get_execution_time();
        let total_time = start.elapsed();
        println!(
            "Simulation time: {}s",
            simulation_time.as_nanos() as f64 / 1e9
        );
        println!(
            "Total execution time (includes parsing, configuration, and output): {}s",
            total_time.as_nanos() as f64 / 1e9
        );
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result)
                .map_err(|e| format!("couldn't serialise the results: {e}"))?
        );
        // The caches emit the plain-text report as they are dropped; the
        // JSON snapshot replaces it.
        std::mem::forget(simulator);
    }
    Ok(())
}
