//! The container-orchestration collaborator: one narrow verb per method,
//! backed by `docker compose` in production. Every call is a blocking
//! external process bounded by a wall-clock timeout; a timeout is a normal
//! error, not a crash.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

pub const BACKEND_SERVICES: [&str; 4] = ["postgres", "redis", "api", "worker"];
pub const FRONTEND_SERVICE: &str = "web";
pub const ALL_SERVICES: [&str; 5] = ["postgres", "redis", "api", "worker", "web"];

const STOP_TIMEOUT: Duration = Duration::from_secs(120);
const PULL_TIMEOUT: Duration = Duration::from_secs(600);
const BUILD_TIMEOUT: Duration = Duration::from_secs(900);
const START_TIMEOUT: Duration = Duration::from_secs(300);
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

const OUTPUT_CAP: usize = 64 * 1024;

pub trait ComposeRunner {
    fn stop_all(&self) -> Result<()>;
    fn pull(&self, service: &str) -> Result<()>;
    fn build(&self, service: &str) -> Result<()>;
    fn start(&self, services: &[&str]) -> Result<()>;
    fn running_services(&self) -> Result<Vec<String>>;
    fn service_healthy(&self, service: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct DockerCompose {
    project_dir: PathBuf,
}

impl DockerCompose {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        DockerCompose {
            project_dir: project_dir.into(),
        }
    }

    fn run_ok(&self, args: &[&str], wall: Duration) -> Result<RunOutput> {
        let mut cmd = Command::new("docker");
        cmd.arg("compose");
        cmd.args(args);
        cmd.current_dir(&self.project_dir);
        let out = run_command_capped(cmd, wall)?;
        if out.timed_out {
            bail!(
                "docker compose {} timed out after {}s",
                args.join(" "),
                wall.as_secs()
            );
        }
        if out.exit_status != 0 {
            bail!(
                "docker compose {} failed (status {}): {}",
                args.join(" "),
                out.exit_status,
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(out)
    }
}

impl ComposeRunner for DockerCompose {
    fn stop_all(&self) -> Result<()> {
        self.run_ok(&["stop"], STOP_TIMEOUT).map(|_| ())
    }

    fn pull(&self, service: &str) -> Result<()> {
        self.run_ok(&["pull", service], PULL_TIMEOUT).map(|_| ())
    }

    fn build(&self, service: &str) -> Result<()> {
        self.run_ok(&["build", service], BUILD_TIMEOUT).map(|_| ())
    }

    fn start(&self, services: &[&str]) -> Result<()> {
        let mut args = vec!["up", "-d"];
        args.extend_from_slice(services);
        self.run_ok(&args, START_TIMEOUT).map(|_| ())
    }

    fn running_services(&self) -> Result<Vec<String>> {
        let out = self.run_ok(&["ps", "--services", "--status", "running"], QUERY_TIMEOUT)?;
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    fn service_healthy(&self, service: &str) -> Result<bool> {
        // compose v2 emits one JSON object per line
        let out = self.run_ok(&["ps", service, "--format", "json"], QUERY_TIMEOUT)?;
        for line in String::from_utf8_lossy(&out.stdout).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let doc: serde_json::Value = serde_json::from_str(line)
                .with_context(|| format!("parse docker compose ps output for {service}"))?;
            let state = doc.get("State").and_then(|v| v.as_str()).unwrap_or("");
            if state != "running" {
                return Ok(false);
            }
            // a service with no healthcheck counts as healthy once running
            let health = doc.get("Health").and_then(|v| v.as_str()).unwrap_or("");
            return Ok(health.is_empty() || health == "healthy");
        }
        Ok(false)
    }
}

#[derive(Debug)]
pub struct RunOutput {
    pub exit_status: i32,
    pub timed_out: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

fn read_capped(mut reader: impl std::io::Read, cap: usize) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(out);
        }
        if out.len() < cap {
            let take = n.min(cap - out.len());
            out.extend_from_slice(&buf[..take]);
        }
        // keep draining past the cap so the child never blocks on a full pipe
    }
}

fn run_command_capped(mut cmd: Command, wall: Duration) -> Result<RunOutput> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawn docker compose")?;
    let stdout = child.stdout.take().context("take stdout")?;
    let stderr = child.stderr.take().context("take stderr")?;
    let stdout_thread = std::thread::spawn(move || read_capped(stdout, OUTPUT_CAP));
    let stderr_thread = std::thread::spawn(move || read_capped(stderr, OUTPUT_CAP));

    let deadline = Instant::now() + wall;
    let (status, timed_out) = loop {
        if let Some(status) = child.try_wait().context("try_wait child")? {
            break (status, false);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let status = child.wait().context("wait child after kill")?;
            break (status, true);
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let stdout = stdout_thread
        .join()
        .unwrap_or_else(|_| Ok(Vec::new()))
        .context("read child stdout")?;
    let stderr = stderr_thread
        .join()
        .unwrap_or_else(|_| Ok(Vec::new()))
        .context("read child stderr")?;

    #[cfg(unix)]
    let exit_signal = {
        use std::os::unix::process::ExitStatusExt as _;
        status.signal()
    };
    #[cfg(not(unix))]
    let exit_signal: Option<i32> = None;

    let exit_status = match status.code() {
        Some(code) => code,
        None => exit_signal.map(|s| 128 + s).unwrap_or(1),
    };

    Ok(RunOutput {
        exit_status,
        timed_out,
        stdout,
        stderr,
    })
}
