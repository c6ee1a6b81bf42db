// src/utils/streams.rs: Launching external tools and wiring their stdio
use std::fs::File;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use log::{debug, info, warn};
use tokio::process::{Child, Command};

use crate::config::defs::PipelineError;


/// Captured result of an external process.
/// A stream redirected to a file is captured as empty.
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: ExitStatus,
    /// Exit statuses of the earlier stages of a pipe, in order.
    pub upstream_status: Vec<ExitStatus>,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// True when every process in the pipe exited cleanly.
    pub fn all_succeeded(&self) -> bool {
        self.status.success() && self.upstream_status.iter().all(|s| s.success())
    }
}


/// Drops unset and empty tokens so optional arguments can be passed inline.
///
/// # Arguments
///
/// * `cmd` - Any sequence of `String` or `Option<String>` tokens.
///
/// # Returns
/// Vec<String> of tokens to hand to the OS.
pub fn filter_tokens<I, T>(cmd: I) -> Vec<String>
where
    I: IntoIterator<Item = T>,
    T: Into<Option<String>>,
{
    cmd.into_iter()
        .filter_map(|token| token.into())
        .filter(|token| !token.is_empty())
        .collect()
}


fn build_command(tokens: &[String]) -> Result<Command, PipelineError> {
    let (program, args) = tokens.split_first().ok_or_else(|| PipelineError::ToolExecution {
        tool: "<empty>".to_string(),
        error: "Command line has no tokens".to_string(),
    })?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

fn spawn(cmd: &mut Command, tokens: &[String]) -> Result<Child, PipelineError> {
    cmd.spawn().map_err(|e| PipelineError::ToolExecution {
        tool: tokens[0].clone(),
        error: format!("Failed to spawn: {}", e),
    })
}

/// File-backed Stdio when a path is given, otherwise a pipe we capture.
fn output_stdio(file: Option<&Path>) -> Result<Stdio, PipelineError> {
    match file {
        Some(path) => {
            let handle = File::create(path).map_err(|e| {
                PipelineError::IOError(format!("Cannot open {} for writing: {}", path.display(), e))
            })?;
            Ok(Stdio::from(handle))
        }
        None => Ok(Stdio::piped()),
    }
}

fn pipe_from(child: &mut Child, tokens: &[String]) -> Result<Stdio, PipelineError> {
    let stdout = child.stdout.take().ok_or_else(|| PipelineError::ToolExecution {
        tool: tokens[0].clone(),
        error: "Child stdout was not captured".to_string(),
    })?;
    stdout.try_into().map_err(|e: std::io::Error| PipelineError::ToolExecution {
        tool: tokens[0].clone(),
        error: format!("Cannot pipe stdout: {}", e),
    })
}

fn echo(line: String, verbose: bool) {
    if verbose {
        info!("Running: {}", line);
        println!("{}", line);
    }
}

fn report_status(tokens: &[String], status: &ExitStatus) {
    if status.success() {
        debug!("{} exited cleanly", tokens[0]);
    } else {
        warn!("{} exited with {}", tokens[0], status);
    }
}


/// Runs a single command and waits for it.
///
/// Exit status is reported but never treated as failure; stages judge
/// success from the files they expect on disk.
///
/// # Arguments
///
/// * `cmd` - Command tokens; empty or unset tokens are dropped.
/// * `stdout_file` - Write stdout here instead of capturing it.
/// * `stderr_file` - Write stderr here instead of capturing it.
/// * `verbose` - Log and print the command line first.
///
/// # Returns
/// CommandOutput with whatever was captured.
pub async fn run<I, T>(
    cmd: I,
    stdout_file: Option<&Path>,
    stderr_file: Option<&Path>,
    verbose: bool,
) -> Result<CommandOutput, PipelineError>
where
    I: IntoIterator<Item = T>,
    T: Into<Option<String>>,
{
    let tokens = filter_tokens(cmd);
    let mut command = build_command(&tokens)?;
    echo(tokens.join(" "), verbose);

    command
        .stdin(Stdio::null())
        .stdout(output_stdio(stdout_file)?)
        .stderr(output_stdio(stderr_file)?);

    let child = spawn(&mut command, &tokens)?;
    let output = child.wait_with_output().await.map_err(|e| PipelineError::ToolExecution {
        tool: tokens[0].clone(),
        error: e.to_string(),
    })?;
    report_status(&tokens, &output.status);

    Ok(CommandOutput {
        stdout: output.stdout,
        stderr: output.stderr,
        status: output.status,
        upstream_status: Vec::new(),
    })
}


/// Runs `cmd_a | cmd_b`.
/// `cmd_b` follows the same redirection rules as [`run`]; `cmd_a` keeps the inherited stderr.
/// A redirect that cannot be opened fails before either command starts.
///
/// # Returns
/// CommandOutput of `cmd_b`.
pub async fn pipe2<I, T, J, U>(
    cmd_a: I,
    cmd_b: J,
    stdout_file: Option<&Path>,
    stderr_file: Option<&Path>,
    verbose: bool,
) -> Result<CommandOutput, PipelineError>
where
    I: IntoIterator<Item = T>,
    T: Into<Option<String>>,
    J: IntoIterator<Item = U>,
    U: Into<Option<String>>,
{
    let tokens_a = filter_tokens(cmd_a);
    let tokens_b = filter_tokens(cmd_b);
    let mut command_a = build_command(&tokens_a)?;
    let mut command_b = build_command(&tokens_b)?;
    echo(format!("{}|{}", tokens_a.join(" "), tokens_b.join(" ")), verbose);

    // Redirects are opened before anything is spawned.
    let stdout = output_stdio(stdout_file)?;
    let stderr = output_stdio(stderr_file)?;

    command_a.stdin(Stdio::null()).stdout(Stdio::piped()).kill_on_drop(true);
    let mut child_a = spawn(&mut command_a, &tokens_a)?;

    command_b
        .stdin(pipe_from(&mut child_a, &tokens_a)?)
        .stdout(stdout)
        .stderr(stderr);
    let child_b = spawn(&mut command_b, &tokens_b)?;

    // Wait on both together so a full stdout pipe on b cannot stall a.
    let (status_a, output_b) = tokio::join!(child_a.wait(), child_b.wait_with_output());
    let status_a = status_a.map_err(|e| PipelineError::ToolExecution {
        tool: tokens_a[0].clone(),
        error: e.to_string(),
    })?;
    report_status(&tokens_a, &status_a);
    let output_b = output_b.map_err(|e| PipelineError::ToolExecution {
        tool: tokens_b[0].clone(),
        error: e.to_string(),
    })?;
    report_status(&tokens_b, &output_b.status);

    Ok(CommandOutput {
        stdout: output_b.stdout,
        stderr: output_b.stderr,
        status: output_b.status,
        upstream_status: vec![status_a],
    })
}


/// Runs `cmd_a | cmd_b | cmd_c`, returning the output of `cmd_c`.
pub async fn pipe3<I, T, J, U, K, V>(
    cmd_a: I,
    cmd_b: J,
    cmd_c: K,
    stdout_file: Option<&Path>,
    stderr_file: Option<&Path>,
    verbose: bool,
) -> Result<CommandOutput, PipelineError>
where
    I: IntoIterator<Item = T>,
    T: Into<Option<String>>,
    J: IntoIterator<Item = U>,
    U: Into<Option<String>>,
    K: IntoIterator<Item = V>,
    V: Into<Option<String>>,
{
    let tokens_a = filter_tokens(cmd_a);
    let tokens_b = filter_tokens(cmd_b);
    let tokens_c = filter_tokens(cmd_c);
    let mut command_a = build_command(&tokens_a)?;
    let mut command_b = build_command(&tokens_b)?;
    let mut command_c = build_command(&tokens_c)?;
    echo(format!("{}|{}|{}", tokens_a.join(" "), tokens_b.join(" "), tokens_c.join(" ")), verbose);

    let stdout = output_stdio(stdout_file)?;
    let stderr = output_stdio(stderr_file)?;

    command_a.stdin(Stdio::null()).stdout(Stdio::piped()).kill_on_drop(true);
    let mut child_a = spawn(&mut command_a, &tokens_a)?;

    command_b
        .stdin(pipe_from(&mut child_a, &tokens_a)?)
        .stdout(Stdio::piped())
        .kill_on_drop(true);
    let mut child_b = spawn(&mut command_b, &tokens_b)?;

    command_c
        .stdin(pipe_from(&mut child_b, &tokens_b)?)
        .stdout(stdout)
        .stderr(stderr);
    let child_c = spawn(&mut command_c, &tokens_c)?;

    let (status_a, status_b, output_c) =
        tokio::join!(child_a.wait(), child_b.wait(), child_c.wait_with_output());
    let mut upstream_status = Vec::with_capacity(2);
    for (tokens, status) in [(&tokens_a, status_a), (&tokens_b, status_b)] {
        let status = status.map_err(|e| PipelineError::ToolExecution {
            tool: tokens[0].clone(),
            error: e.to_string(),
        })?;
        report_status(tokens, &status);
        upstream_status.push(status);
    }
    let output_c = output_c.map_err(|e| PipelineError::ToolExecution {
        tool: tokens_c[0].clone(),
        error: e.to_string(),
    })?;
    report_status(&tokens_c, &output_c.status);

    Ok(CommandOutput {
        stdout: output_c.stdout,
        stderr: output_c.stderr,
        status: output_c.status,
        upstream_status,
    })
}
