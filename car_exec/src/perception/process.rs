//! Bounded execution of helper programs.
//!
//! Each helper runs in its own process group. A terminal interrupt therefore only reaches the
//! executable's own handler, and a helper which times out is killed along with every process it
//! started.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::io::{Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use nix::{
    errno::Errno,
    sys::signal::{killpg, Signal},
    unistd::Pid,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Interval between checks on whether the child has exited.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("No helper command is configured")]
    EmptyCommand,

    #[error("Could not start {0:?}: {1}")]
    Spawn(String, std::io::Error),

    #[error("I/O error while talking to the helper: {0}")]
    Io(std::io::Error),

    #[error("Helper did not finish within {0:?} and was killed")]
    Timeout(Duration),

    #[error("Helper exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Replace every `placeholder` in the arguments with `value`.
///
/// If no argument contains the placeholder the value is appended as a final argument.
pub fn substitute(argv: &[String], placeholder: &str, value: &str) -> Vec<String> {
    let mut out: Vec<String> = argv.iter().map(|a| a.replace(placeholder, value)).collect();

    if !argv.iter().any(|a| a.contains(placeholder)) {
        out.push(value.to_string());
    }

    out
}

/// Run `argv`, optionally writing `stdin` to the child, and return its standard output.
///
/// The child is killed if it has not exited within `timeout`. A non-zero exit status is an error.
pub fn run(argv: &[String], stdin: Option<&[u8]>, timeout: Duration) -> Result<Vec<u8>, ProcessError> {
    let (program, args) = argv.split_first().ok_or(ProcessError::EmptyCommand)?;

    trace!("Running {:?}", argv);

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        }
        else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .map_err(|e| ProcessError::Spawn(program.clone(), e))?;

    // Drain the output pipes on their own threads so the child can never block on a full pipe
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
        // A helper which ignores its input may close the pipe early, that is not an error
        if let Err(e) = pipe.write_all(data) {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                kill(&mut child);
                return Err(ProcessError::Io(e));
            }
        }
    }

    let status = wait_timeout(&mut child, timeout)?;

    // Anything the helper left running would keep the output pipes open
    signal_group(child.id(), "leftover");

    let stdout = join(stdout)?;
    let stderr = join(stderr)?;

    if !status.success() {
        return Err(ProcessError::Failed {
            status,
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        });
    }

    Ok(stdout)
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn wait_timeout(child: &mut Child, timeout: Duration) -> Result<ExitStatus, ProcessError> {
    let start = Instant::now();

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => (),
            Err(e) => {
                kill(child);
                return Err(ProcessError::Io(e));
            }
        }

        if start.elapsed() >= timeout {
            kill(child);
            return Err(ProcessError::Timeout(timeout));
        }

        thread::sleep(WAIT_POLL_INTERVAL);
    }
}

fn kill(child: &mut Child) {
    if !signal_group(child.id(), "timed out") {
        if let Err(e) = child.kill() {
            warn!("Could not kill helper process {}: {}", child.id(), e);
        }
    }
    child.wait().ok();
}

/// Send SIGKILL to the helper's process group, returns false if the group could not be signalled.
fn signal_group(pgid: u32, reason: &str) -> bool {
    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) => {
            debug!("Killed {} helper process group {}", reason, pgid);
            true
        }
        // Nothing left in the group
        Err(Errno::ESRCH) => true,
        Err(e) => {
            warn!("Could not kill helper process group {}: {}", pgid, e);
            false
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<std::io::Result<Vec<u8>>>> {
    pipe.map(|mut p| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            p.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn join(handle: Option<JoinHandle<std::io::Result<Vec<u8>>>>) -> Result<Vec<u8>, ProcessError> {
    match handle {
        Some(h) => match h.join() {
            Ok(r) => r.map_err(ProcessError::Io),
            Err(_) => Err(ProcessError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "pipe reader thread panicked",
            ))),
        },
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn test_substitute() {
        let argv = vec!["grab".to_string(), "--out={path}".to_string()];
        assert_eq!(
            substitute(&argv, "{path}", "/tmp/f.jpg"),
            vec!["grab".to_string(), "--out=/tmp/f.jpg".to_string()]
        );

        let argv = vec!["ask".to_string()];
        assert_eq!(
            substitute(&argv, "{image}", "a.jpg"),
            vec!["ask".to_string(), "a.jpg".to_string()]
        );
    }

    #[test]
    fn test_run_output_and_stdin() {
        let out = run(&sh("echo hello"), None, Duration::from_secs(5)).unwrap();
        assert_eq!(out, b"hello\n".to_vec());

        let out = run(&sh("cat"), Some(b"prompt"), Duration::from_secs(5)).unwrap();
        assert_eq!(out, b"prompt".to_vec());
    }

    #[test]
    fn test_run_failures() {
        assert!(matches!(
            run(&[], None, Duration::from_secs(1)),
            Err(ProcessError::EmptyCommand)
        ));

        match run(&sh("echo broken >&2; exit 3"), None, Duration::from_secs(5)) {
            Err(ProcessError::Failed { status, stderr }) => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "broken");
            }
            r => panic!("Unexpected result {:?}", r),
        }

        assert!(matches!(
            run(
                &["/nonexistent/robocar_helper".to_string()],
                None,
                Duration::from_secs(1)
            ),
            Err(ProcessError::Spawn(_, _))
        ));
    }

    #[test]
    fn test_run_timeout_kills_child() {
        let start = Instant::now();
        assert!(matches!(
            run(&sh("exec sleep 10"), None, Duration::from_millis(200)),
            Err(ProcessError::Timeout(_))
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    /// Pids of live processes whose command line contains `marker`.
    fn processes_with_arg(marker: &str) -> Vec<u32> {
        let mut found = Vec::new();

        for entry in std::fs::read_dir("/proc").unwrap().flatten() {
            let pid = match entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) {
                Some(p) => p,
                None => continue,
            };

            // Zombies have an empty command line
            if let Ok(cmdline) = std::fs::read(entry.path().join("cmdline")) {
                if cmdline
                    .split(|b| *b == 0)
                    .any(|arg| arg == marker.as_bytes())
                {
                    found.push(pid);
                }
            }
        }

        found
    }

    #[test]
    fn test_timeout_kills_helper_subprocesses() {
        let script = "(sleep 7.31; echo G); echo F";

        assert!(matches!(
            run(&sh(script), None, Duration::from_millis(200)),
            Err(ProcessError::Timeout(_))
        ));

        let start = Instant::now();
        while !processes_with_arg("7.31").is_empty() {
            assert!(
                start.elapsed() < Duration::from_secs(2),
                "helper subprocess still running after timeout"
            );
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_leftover_subprocesses_do_not_block() {
        let start = Instant::now();

        // The background sleep holds stdout open after the helper itself exits
        let out = run(&sh("sleep 7.53 & echo F"), None, Duration::from_secs(5)).unwrap();
        assert_eq!(out, b"F\n".to_vec());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_helper_runs_in_own_process_group() {
        let out = run(
            &sh("awk '{print $5}' /proc/$$/stat; true"),
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        let helper_pgid: i32 = String::from_utf8(out).unwrap().trim().parse().unwrap();
        assert_ne!(helper_pgid, nix::unistd::getpgrp().as_raw());
    }
}
