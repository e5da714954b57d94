use assert_cmd::Command;
use std::ffi::OsStr;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

#[derive(Debug)]
pub struct SsyncRun {
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
    pub duration: Duration,
    pub log_path: PathBuf,
}

impl SsyncRun {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// A throwaway repository plus a directory for per-run logs.
pub struct SsyncWorkspace {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub log_dir: PathBuf,
}

impl SsyncWorkspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path().join("repo");
        let log_dir = temp_dir.path().join("logs");
        fs::create_dir_all(&root).expect("repo dir");
        fs::create_dir_all(&log_dir).expect("log dir");
        Self {
            temp_dir,
            root,
            log_dir,
        }
    }
}

pub fn run_ssync<I, S>(workspace: &SsyncWorkspace, args: I, label: &str) -> SsyncRun
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run_ssync_with_env(
        workspace,
        args,
        std::iter::empty::<(String, String)>(),
        label,
    )
}

pub fn run_ssync_with_env<I, S, E, K, V>(
    workspace: &SsyncWorkspace,
    args: I,
    env_vars: E,
    label: &str,
) -> SsyncRun
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
    E: IntoIterator<Item = (K, V)>,
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("ssync"));
    cmd.current_dir(&workspace.root);
    cmd.args(args);
    cmd.envs(env_vars);
    cmd.env("NO_COLOR", "1");
    cmd.env("RUST_LOG", "specsync=debug");
    cmd.env("RUST_BACKTRACE", "1");
    cmd.env("HOME", workspace.temp_dir.path());

    let start = Instant::now();
    let output = cmd.output().expect("run ssync");
    let duration = start.elapsed();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let log_path = workspace.log_dir.join(format!("{label}.log"));
    let timestamp = SystemTime::now();
    let log_body = format!(
        "label: {label}\nstarted: {:?}\nduration: {:?}\nstatus: {}\nargs: {:?}\ncwd: {}\n\nstdout:\n{}\n\nstderr:\n{}\n",
        timestamp,
        duration,
        output.status,
        cmd.get_args().collect::<Vec<_>>(),
        workspace.root.display(),
        stdout,
        stderr
    );
    fs::write(&log_path, log_body).expect("write log");

    SsyncRun {
        stdout,
        stderr,
        status: output.status,
        duration,
        log_path,
    }
}

/// The JSON document in stdout, skipping any leading text.
pub fn extract_json_payload(stdout: &str) -> String {
    let lines: Vec<&str> = stdout.lines().collect();
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            return lines[idx..].join("\n").trim().to_string();
        }
    }
    stdout.trim().to_string()
}

/// The JSON error object written to stderr on failure.
pub fn extract_error_json(stderr: &str) -> serde_json::Value {
    let start = stderr
        .rfind("{\n  \"error\"")
        .expect("json error in stderr");
    serde_json::from_str(stderr[start..].trim()).expect("valid json error")
}
