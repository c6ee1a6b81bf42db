// src/utils/timing.rs: Per-stage wall-clock timing
use std::fs::OpenOptions;
use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{info, warn};


/// Where stage durations are written, one `name\tseconds` line per stage.
#[derive(Debug)]
pub enum TimingSink {
    Stdout,
    File {
        path: PathBuf,
        /// Truncate on the first write of this run, append afterwards.
        truncate: bool,
        written: AtomicBool,
    },
    Discard,
}

impl TimingSink {
    pub fn file(path: PathBuf, truncate: bool) -> Self {
        TimingSink::File { path, truncate, written: AtomicBool::new(false) }
    }

    pub fn record(&self, name: &str, elapsed_secs: f64) -> io::Result<()> {
        let line = format!("{}\t{:.4}\n", name, elapsed_secs);
        match self {
            TimingSink::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(line.as_bytes())?;
                out.flush()
            }
            TimingSink::File { path, truncate, written } => {
                let first = !written.swap(true, Ordering::SeqCst);
                let mut file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(*truncate && first)
                    .append(!(*truncate && first))
                    .open(path)?;
                file.write_all(line.as_bytes())
            }
            TimingSink::Discard => Ok(()),
        }
    }
}


/// Awaits a stage and records how long it took, whether it succeeded or not.
///
/// # Arguments
///
/// * `name` - Stage name written to the sink.
/// * `sink` - Destination for the duration line.
/// * `stage` - The stage future.
///
/// # Returns
/// The stage's own output, untouched.
pub async fn time_stage<F, T>(name: &str, sink: &TimingSink, stage: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let ret = stage.await;
    let elapsed = start.elapsed().as_secs_f64();

    info!("{} finished in {:.4} s", name, elapsed);
    if let Err(e) = sink.record(name, elapsed) {
        warn!("Could not record timing for {}: {}", name, e);
    }
    ret
}
