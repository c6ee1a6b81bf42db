use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use std::{env, fs};

use anyhow::Result;
use clap::CommandFactory;
use env_logger::Builder;
use log::{debug, error, info, LevelFilter};

use call_variants::cli::{parse, Arguments};
use call_variants::config::defs::{BinaryRegistry, RunConfig};
use call_variants::pipelines::call_variants as pipeline;
use call_variants::utils::system::detect_threads;
use call_variants::utils::timing::TimingSink;


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    let cmd = Arguments::command();
    info!("{} {}", cmd.get_name(), cmd.get_version().unwrap_or_default());

    let dir = env::current_dir()?;
    info!("The current directory is {:?}", dir);

    let out_dir = setup_output_dir(&args, &dir)?;
    let base_dir = absolute(&dir, &args.base_dir);
    let bin = BinaryRegistry::from_base_dir(&base_dir);
    debug!("Binary registry: {:?}", bin);

    let threads = detect_threads(args.threads);
    debug!("Using {} aligner threads", threads);

    let timings = match &args.timings {
        Some(path) => TimingSink::file(absolute(&dir, path), args.new_timings),
        None => TimingSink::Stdout,
    };

    let run_config = Arc::new(RunConfig {
        cwd: dir,
        out_dir,
        args,
        bin,
        threads,
        timings,
    });

    if let Err(e) = pipeline::run(run_config).await {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


fn absolute(cwd: &Path, path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}


/// Sets up output directory
/// If `out_dir` is specified from args, uses it;
/// otherwise the current working directory.
/// Ensures the directory exists.
///
/// # Arguments
/// * `args` - The parsed command-line arguments.
/// * `cwd` - The current working directory.
/// # Returns
/// path to the output directory.
fn setup_output_dir(args: &Arguments, cwd: &Path) -> Result<PathBuf> {
    let out_dir = match &args.out_dir {
        Some(out) => absolute(cwd, out),
        None => cwd.to_path_buf(),
    };
    fs::create_dir_all(&out_dir)?;
    Ok(out_dir)
}
