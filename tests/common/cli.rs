use assert_cmd::Command;
use std::ffi::OsStr;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

#[derive(Debug)]
pub struct TaRun {
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
    pub duration: Duration,
    pub log_path: PathBuf,
}

pub struct TaWorkspace {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub log_dir: PathBuf,
}

impl TaWorkspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path().to_path_buf();
        let log_dir = root.join("logs");
        fs::create_dir_all(&log_dir).expect("log dir");
        Self {
            temp_dir,
            root,
            log_dir,
        }
    }

    /// Write a file relative to the workspace root and return its path.
    pub fn file(&self, name: &str, body: &[u8]) -> PathBuf {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dir");
        }
        fs::write(&path, body).expect("write file");
        path
    }
}

/// `ta` running in the workspace with a clean, colorless environment.
pub fn ta_command(workspace: &TaWorkspace) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("ta"));
    cmd.current_dir(&workspace.root)
        .env_remove("TRACKER_DIR")
        .env("NO_COLOR", "1")
        .env("RUST_LOG", "tracker_attachments=debug")
        .env("RUST_BACKTRACE", "1")
        .env("HOME", &workspace.root);
    cmd
}

pub fn run_ta<I, S>(workspace: &TaWorkspace, args: I, label: &str) -> TaRun
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run_ta_with_env(
        workspace,
        args,
        std::iter::empty::<(String, String)>(),
        label,
    )
}

pub fn run_ta_with_env<I, S, E, K, V>(
    workspace: &TaWorkspace,
    args: I,
    env_vars: E,
    label: &str,
) -> TaRun
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
    E: IntoIterator<Item = (K, V)>,
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    let mut cmd = ta_command(workspace);
    cmd.args(args);
    cmd.envs(env_vars);

    let start = Instant::now();
    let output = cmd.output().expect("run ta");
    let duration = start.elapsed();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    // One log per run, named by label.
    let log_path = workspace.log_dir.join(format!("{label}.log"));
    let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
    let log_body = format!(
        "label: {label}\nat: {:?}\ntook: {duration:?}\nstatus: {}\nargs: {}\n\n--- stdout\n{stdout}\n--- stderr\n{stderr}\n",
        SystemTime::now(),
        output.status,
        args.join(" "),
    );
    fs::write(&log_path, log_body).expect("write log");

    TaRun {
        stdout,
        stderr,
        status: output.status,
        duration,
        log_path,
    }
}

/// Everything from the first line opening a JSON object or array.
pub fn extract_json_payload(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    lines
        .iter()
        .position(|line| line.trim_start().starts_with(['{', '[']))
        .map_or_else(
            || output.trim().to_string(),
            |start| lines[start..].join("\n").trim().to_string(),
        )
}
