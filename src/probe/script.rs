//! Script/plugin probe and event hooks
//!
//! Scripts follow the usual monitoring plugin convention:
//!
//! | exit code | state |
//! |-----------|-------|
//! | 0         | Ok    |
//! | 1         | Warn  |
//! | other     | Dead  |
//!
//! Arguments are templates. `{{monitor.id}}`, `{{monitor.name}}`,
//! `{{monitor.kind}}` and `{{monitor.target}}` are always available; event
//! hooks additionally get `{{measurement.state}}`, `{{measurement.hint}}` and
//! `{{measurement.duration}}`. Unknown placeholders are left untouched.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time;
use tracing::{debug, instrument, trace, warn};

use crate::measurement::{Measurement, State, StateHint};
use crate::monitor::{Monitor, ScriptConfig};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([a-z_]+\.[a-z_]+)\s*\}\}").expect("valid regex"));

/// Values available to argument templates
pub struct TemplateContext<'a> {
    pub monitor: &'a Monitor,
    pub measurement: Option<&'a Measurement>,
}

impl TemplateContext<'_> {
    fn lookup(&self, key: &str) -> Option<String> {
        let value = match key {
            "monitor.id" => self.monitor.id.map(|id| id.to_string()).unwrap_or_default(),
            "monitor.name" => self.monitor.name.clone(),
            "monitor.kind" => self.monitor.kind.as_str().to_string(),
            "monitor.target" => self.monitor.target(),
            "measurement.state" => self.measurement?.state().to_string(),
            "measurement.hint" => self
                .measurement?
                .state_hint()
                .map(|hint| hint.to_string())
                .unwrap_or_default(),
            "measurement.duration" => self.measurement?.duration().to_string(),
            _ => return None,
        };
        Some(value)
    }
}

/// Replace all known placeholders in a template
pub fn render(template: &str, context: &TemplateContext<'_>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            context
                .lookup(&caps[1])
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Outcome of running an external program
#[derive(Debug)]
enum Execution {
    Completed {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    SpawnFailed,
    TimedOut,
}

pub struct ScriptProbe;

impl ScriptProbe {
    #[instrument(skip_all, fields(monitor = %monitor.name))]
    pub async fn check(&self, monitor: &Monitor, config: &ScriptConfig) -> Measurement {
        let mut measurement = super::begin(monitor);

        let context = TemplateContext {
            monitor,
            measurement: None,
        };
        let execution = execute(config, &context, Duration::from_secs(monitor.timeout)).await;

        match execution {
            Execution::Completed {
                code,
                stdout,
                stderr,
            } => {
                measurement.exit_code = code;
                measurement.stdout = Some(super::truncate(stdout));
                measurement.stderr = Some(super::truncate(stderr));

                let state = classify_exit_code(code);
                if state != State::Ok {
                    measurement.downgrade_with_hint(state, StateHint::ExitCode);
                }
            }
            Execution::SpawnFailed => {
                measurement.downgrade_with_hint(State::Dead, StateHint::ExecutionFailed)
            }
            Execution::TimedOut => measurement.downgrade_with_hint(State::Dead, StateHint::Timeout),
        }

        measurement.finalize();
        measurement
    }
}

/// Run a monitor's event hook for a measurement
///
/// Hooks are fire-and-forget: the outcome is only logged.
#[instrument(skip_all, fields(monitor = %monitor.name))]
pub async fn run_hook(hook: &ScriptConfig, monitor: &Monitor, measurement: &Measurement) {
    let context = TemplateContext {
        monitor,
        measurement: Some(measurement),
    };

    match execute(hook, &context, Duration::from_secs(monitor.timeout)).await {
        Execution::Completed { code: Some(0), .. } => debug!("event hook succeeded"),
        Execution::Completed { code, stderr, .. } => {
            warn!("event hook exited with {code:?}: {}", stderr.trim())
        }
        Execution::SpawnFailed => warn!("event hook could not be started"),
        Execution::TimedOut => warn!("event hook timed out"),
    }
}

pub fn classify_exit_code(code: Option<i32>) -> State {
    match code {
        Some(0) => State::Ok,
        Some(1) => State::Warn,
        _ => State::Dead,
    }
}

async fn execute(
    config: &ScriptConfig,
    context: &TemplateContext<'_>,
    timeout: Duration,
) -> Execution {
    let args: Vec<String> = config.args.iter().map(|arg| render(arg, context)).collect();

    let mut command = Command::new(&config.path);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    trace!("executing {} {:?}", config.path, args);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("failed to execute {}: {e}", config.path);
            return Execution::SpawnFailed;
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let running = async {
        tokio::join!(child.wait(), capture(stdout), capture(stderr))
    };

    // on timeout the child is killed when it goes out of scope
    match time::timeout(timeout, running).await {
        Ok((Ok(status), stdout, stderr)) => Execution::Completed {
            code: status.code(),
            stdout,
            stderr,
        },
        Ok((Err(e), _, _)) => {
            warn!("failed to wait for {}: {e}", config.path);
            Execution::SpawnFailed
        }
        Err(_) => {
            warn!("{} did not finish within {}s", config.path, timeout.as_secs());
            Execution::TimedOut
        }
    }
}

/// Read at most [`MAX_CAPTURE_BYTES`](super::MAX_CAPTURE_BYTES) from a pipe
///
/// The rest is read and discarded so the child never blocks on a full pipe.
async fn capture<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };

    let mut buffer = Vec::new();
    if let Err(e) = (&mut pipe)
        .take(super::MAX_CAPTURE_BYTES as u64)
        .read_to_end(&mut buffer)
        .await
    {
        debug!("failed to read process output: {e}");
    }

    if let Err(e) = tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await {
        debug!("failed to discard process output: {e}");
    }

    String::from_utf8_lossy(&buffer).into_owned()
}
