//! Supervision of the launched application.
//!
//! At most one app instance runs at a time. A full deployment replaces it:
//! the old instance gets SIGTERM, then SIGKILL if it outlives the grace
//! period, and a new one is launched from the first script declared in the
//! project manifest.

pub mod manifest;

use crate::config::AppConfig;
use crate::utils::errors::{ReloadError, Result};
use crate::utils::logger::APP_TARGET;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long captured output may keep draining after the app exits.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Result of a (re)launch attempt.
#[derive(Debug)]
pub enum LaunchOutcome {
    Started { pid: u32, script: String },
    /// The app was not started; the deployment itself is unaffected
    NotStarted(ReloadError),
}

impl LaunchOutcome {
    pub fn pid(&self) -> Option<u32> {
        match self {
            LaunchOutcome::Started { pid, .. } => Some(*pid),
            LaunchOutcome::NotStarted(_) => None,
        }
    }
}

/// A live app instance.
struct RunningApp {
    child: Child,
    pid: u32,
    script: String,
    output: Option<JoinHandle<()>>,
}

impl RunningApp {
    async fn drain_output(self) {
        let Some(mut handle) = self.output else {
            return;
        };
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut handle).await.is_err() {
            handle.abort();
        }
    }
}

/// Owner of the single app slot.
pub struct AppSupervisor {
    work_dir: PathBuf,
    config: AppConfig,
    current: Option<RunningApp>,
}

impl AppSupervisor {
    pub fn new(work_dir: PathBuf, config: AppConfig) -> Self {
        Self {
            work_dir,
            config,
            current: None,
        }
    }

    /// PID of the running app, if it is still alive.
    pub fn running_pid(&mut self) -> Option<u32> {
        let app = self.current.as_mut()?;
        match app.child.try_wait() {
            Ok(None) => Some(app.pid),
            Ok(Some(status)) => {
                info!("App '{}' (pid {}) exited with {}", app.script, app.pid, status);
                self.current = None;
                None
            }
            Err(e) => {
                warn!("Failed to poll app (pid {}): {}", app.pid, e);
                Some(app.pid)
            }
        }
    }

    /// Replace the running app with a fresh instance.
    ///
    /// Manifest, launcher and spawn problems are logged and reported as
    /// [`LaunchOutcome::NotStarted`]; they never propagate.
    pub async fn redeploy(&mut self) -> LaunchOutcome {
        if self.current.is_some() {
            info!("Stopping existing app...");
            self.stop(self.config.restart_timeout()).await;
        }

        match self.launch() {
            Ok(app) => {
                info!("✅ App '{}' started with PID {}", app.script, app.pid);
                let outcome = LaunchOutcome::Started {
                    pid: app.pid,
                    script: app.script.clone(),
                };
                self.current = Some(app);
                outcome
            }
            Err(e) => {
                match &e {
                    ReloadError::ManifestMissing(_) | ReloadError::NoScriptsDeclared => {
                        warn!("⚠️  {}, app not started", e)
                    }
                    _ => error!("❌ {}, app not started", e),
                }
                LaunchOutcome::NotStarted(e)
            }
        }
    }

    /// Stop the running app: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// Returns the exit status when one was observed.
    pub async fn stop(&mut self, grace: Duration) -> Option<ExitStatus> {
        let mut app = self.current.take()?;

        if let Ok(Some(status)) = app.child.try_wait() {
            debug!("App (pid {}) had already exited with {}", app.pid, status);
            app.drain_output().await;
            return Some(status);
        }

        info!("Stopping app '{}' (pid {})...", app.script, app.pid);
        request_terminate(&mut app);

        let status = match tokio::time::timeout(grace, app.child.wait()).await {
            Ok(Ok(status)) => {
                info!("App (pid {}) exited with {}", app.pid, status);
                Some(status)
            }
            Ok(Err(e)) => {
                error!("Failed waiting for app (pid {}): {}", app.pid, e);
                None
            }
            Err(_) => {
                warn!(
                    "App (pid {}) still running after {:?}, killing",
                    app.pid, grace
                );
                match app.child.kill().await {
                    Ok(()) => app.child.wait().await.ok(),
                    Err(e) => {
                        error!("Failed to kill app (pid {}): {}", app.pid, e);
                        None
                    }
                }
            }
        };

        app.drain_output().await;
        status
    }

    fn launch(&self) -> Result<RunningApp> {
        let manifest_path = self.work_dir.join(&self.config.manifest);
        let scripts = manifest::read_scripts(&manifest_path)?;
        let (script, target) = scripts.first().ok_or(ReloadError::NoScriptsDeclared)?;
        info!(
            "📋 Found script in {}: {} ({})",
            self.config.manifest.display(),
            script,
            target
        );

        let launcher = &self.config.launcher;
        if !launcher.exists() {
            return Err(ReloadError::LauncherMissing(launcher.clone()));
        }

        let mut command = Command::new(launcher);
        command.arg("run");
        if self.config.reinstall {
            command.arg("--reinstall");
        }
        command
            .arg(script)
            .current_dir(&self.work_dir)
            .env("DISPLAY", &self.config.display)
            .env("PATH", self.search_path()?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("🚀 Starting app with: {:?}", command.as_std());
        let mut child = command.spawn().map_err(ReloadError::ProcessLaunch)?;
        let pid = child.id().ok_or_else(|| {
            ReloadError::ProcessLaunch(std::io::Error::other("app exited before reporting a pid"))
        })?;

        let output = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => Some(forward_output(pid, stdout, stderr)),
            _ => None,
        };

        Ok(RunningApp {
            child,
            pid,
            script: script.to_string(),
            output,
        })
    }

    /// `PATH` for the app: the configured directory first, then the inherited entries.
    fn search_path(&self) -> Result<OsString> {
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        let entries =
            std::iter::once(self.config.extra_path.clone()).chain(std::env::split_paths(&inherited));
        std::env::join_paths(entries)
            .map_err(|e| ReloadError::ProcessLaunch(std::io::Error::other(e)))
    }
}

#[cfg(unix)]
fn request_terminate(app: &mut RunningApp) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(app.pid) else {
        let _ = app.child.start_kill();
        return;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => debug!("Sent SIGTERM to app (pid {})", app.pid),
        Err(nix::errno::Errno::ESRCH) => debug!("App (pid {}) already gone", app.pid),
        Err(e) => warn!("Failed to send SIGTERM to app (pid {}): {}", app.pid, e),
    }
}

#[cfg(not(unix))]
fn request_terminate(app: &mut RunningApp) {
    if let Err(e) = app.child.start_kill() {
        warn!("Failed to stop app (pid {}): {}", app.pid, e);
    }
}

/// Which pipe a forwarded line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    fn as_str(self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Forward the app's stdout and stderr to the log as one stream.
fn forward_output<O, E>(pid: u32, stdout: O, stderr: E) -> JoinHandle<()>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(merge_lines(stdout, stderr, move |stream, line| {
        info!(target: APP_TARGET, pid, stream = stream.as_str(), "{}", line)
    }))
}

/// Interleave lines from both pipes in arrival order until both are closed.
///
/// A trailing line without a newline is emitted when its pipe closes.
async fn merge_lines<O, E, F>(stdout: O, stderr: E, mut emit: F)
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
    F: FnMut(OutputStream, &str),
{
    let mut stdout = BufReader::new(stdout);
    let mut stderr = BufReader::new(stderr);
    let (mut out_line, mut err_line) = (Vec::new(), Vec::new());
    let (mut out_open, mut err_open) = (true, true);

    while out_open || err_open {
        tokio::select! {
            read = stdout.read_until(b'\n', &mut out_line), if out_open => {
                out_open = take_line(read, &mut out_line, |line| emit(OutputStream::Stdout, line));
            }
            read = stderr.read_until(b'\n', &mut err_line), if err_open => {
                err_open = take_line(read, &mut err_line, |line| emit(OutputStream::Stderr, line));
            }
        }
    }
}

/// Emit the buffered line; `false` once the pipe is closed.
fn take_line(read: io::Result<usize>, buf: &mut Vec<u8>, emit: impl FnOnce(&str)) -> bool {
    let open = match read {
        Ok(0) => false,
        Ok(_) => true,
        Err(e) => {
            debug!("App output closed: {}", e);
            false
        }
    };
    if !buf.is_empty() {
        emit(String::from_utf8_lossy(buf).trim_end());
        buf.clear();
    }
    open
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    use std::fs;
    use std::os::unix::process::ExitStatusExt;
    use std::path::Path;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
[project]
name = "demo"

[project.scripts]
demo-app = "demo.main:run"
demo-tool = "demo.tool:run"
"#;

    /// `/bin/sh` stands in for the launcher: `sh run --reinstall <script>`
    /// executes the file `run` from the working directory with the
    /// remaining arguments.
    fn fake_launcher(work_dir: &Path, body: &str) -> AppConfig {
        fs::write(work_dir.join("run"), body).unwrap();
        AppConfig {
            launcher: PathBuf::from("/bin/sh"),
            extra_path: PathBuf::from("/opt/reload/bin"),
            display: ":42".to_string(),
            restart_timeout_secs: 2,
            ..AppConfig::default()
        }
    }

    async fn wait_for_file(path: &Path) -> String {
        for _ in 0..100 {
            if let Ok(content) = fs::read_to_string(path) {
                if content.ends_with('\n') {
                    return content;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("{} never appeared", path.display());
    }

    fn is_alive(pid: u32) -> bool {
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[tokio::test]
    async fn test_missing_manifest_starts_nothing() {
        let dir = TempDir::new().unwrap();
        let config = fake_launcher(dir.path(), "exec sleep 30\n");
        let mut supervisor = AppSupervisor::new(dir.path().to_path_buf(), config);

        let outcome = supervisor.redeploy().await;

        assert!(matches!(outcome, LaunchOutcome::NotStarted(ReloadError::ManifestMissing(_))));
        assert!(supervisor.running_pid().is_none());
    }

    #[tokio::test]
    async fn test_manifest_without_scripts_starts_nothing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pyproject.toml"), "[project]\nname = \"demo\"\n").unwrap();
        let config = fake_launcher(dir.path(), "exec sleep 30\n");
        let mut supervisor = AppSupervisor::new(dir.path().to_path_buf(), config);

        let outcome = supervisor.redeploy().await;

        assert!(matches!(outcome, LaunchOutcome::NotStarted(ReloadError::NoScriptsDeclared)));
        assert!(supervisor.running_pid().is_none());
    }

    #[tokio::test]
    async fn test_unparseable_manifest_starts_nothing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pyproject.toml"), "[project.scripts\n").unwrap();
        let config = fake_launcher(dir.path(), "exec sleep 30\n");
        let mut supervisor = AppSupervisor::new(dir.path().to_path_buf(), config);

        let outcome = supervisor.redeploy().await;

        assert!(matches!(outcome, LaunchOutcome::NotStarted(ReloadError::ManifestParse(_))));
    }

    #[tokio::test]
    async fn test_missing_launcher_starts_nothing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pyproject.toml"), MANIFEST).unwrap();
        let config = AppConfig {
            launcher: dir.path().join("no-such-launcher"),
            ..AppConfig::default()
        };
        let mut supervisor = AppSupervisor::new(dir.path().to_path_buf(), config);

        let outcome = supervisor.redeploy().await;

        assert!(matches!(outcome, LaunchOutcome::NotStarted(ReloadError::LauncherMissing(_))));
        assert!(supervisor.running_pid().is_none());
    }

    #[tokio::test]
    async fn test_launches_first_script_with_environment() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pyproject.toml"), MANIFEST).unwrap();
        let config = fake_launcher(
            dir.path(),
            "printf '%s\\n' \"$*\" \"$DISPLAY\" \"$PATH\" \"$PWD\" > launched.tmp\n\
             mv launched.tmp launched.txt\n\
             exec sleep 30\n",
        );
        let mut supervisor = AppSupervisor::new(dir.path().to_path_buf(), config);

        let outcome = supervisor.redeploy().await;
        let LaunchOutcome::Started { pid, script } = outcome else {
            panic!("app should have started: {outcome:?}");
        };
        assert_eq!(script, "demo-app");
        assert_eq!(supervisor.running_pid(), Some(pid));

        let launched = wait_for_file(&dir.path().join("launched.txt")).await;
        let lines: Vec<&str> = launched.lines().collect();
        assert_eq!(lines[0], "--reinstall demo-app");
        assert_eq!(lines[1], ":42");
        assert!(lines[2].starts_with("/opt/reload/bin:"));
        assert_eq!(
            fs::canonicalize(lines[3]).unwrap(),
            fs::canonicalize(dir.path()).unwrap()
        );

        let status = supervisor.stop(Duration::from_secs(2)).await.unwrap();
        assert_eq!(status.signal(), Some(libc_sigterm()));
        assert!(supervisor.running_pid().is_none());
    }

    #[tokio::test]
    async fn test_redeploy_replaces_running_app() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pyproject.toml"), MANIFEST).unwrap();
        let config = fake_launcher(dir.path(), "exec sleep 30\n");
        let mut supervisor = AppSupervisor::new(dir.path().to_path_buf(), config);

        let first = supervisor.redeploy().await.pid().unwrap();
        let second = supervisor.redeploy().await.pid().unwrap();

        assert_ne!(first, second);
        assert!(!is_alive(first));
        assert_eq!(supervisor.running_pid(), Some(second));

        supervisor.stop(Duration::from_secs(2)).await;
        assert!(!is_alive(second));
    }

    #[tokio::test]
    async fn test_unresponsive_app_is_killed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pyproject.toml"), MANIFEST).unwrap();
        let config = fake_launcher(
            dir.path(),
            "trap '' TERM\n\
             echo ready > ready.txt\n\
             while true; do sleep 0.1; done\n",
        );
        let mut supervisor = AppSupervisor::new(dir.path().to_path_buf(), config);

        let pid = supervisor.redeploy().await.pid().unwrap();
        wait_for_file(&dir.path().join("ready.txt")).await;

        let status = supervisor.stop(Duration::from_millis(300)).await.unwrap();

        assert_eq!(status.signal(), Some(9));
        assert!(!is_alive(pid));
        assert!(supervisor.running_pid().is_none());
    }

    #[tokio::test]
    async fn test_exited_app_is_reaped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pyproject.toml"), MANIFEST).unwrap();
        let config = fake_launcher(dir.path(), "echo done\nexit 3\n");
        let mut supervisor = AppSupervisor::new(dir.path().to_path_buf(), config);

        supervisor.redeploy().await.pid().unwrap();
        for _ in 0..100 {
            if supervisor.running_pid().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert!(supervisor.running_pid().is_none());
        assert!(supervisor.stop(Duration::from_secs(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_stop_without_app() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = AppSupervisor::new(dir.path().to_path_buf(), AppConfig::default());
        assert!(supervisor.stop(Duration::from_millis(100)).await.is_none());
    }

    #[tokio::test]
    async fn test_output_streams_are_merged() {
        let (mut out_tx, out_rx) = tokio::io::duplex(64);
        let (mut err_tx, err_rx) = tokio::io::duplex(64);
        let writer = async move {
            use tokio::io::AsyncWriteExt;
            out_tx.write_all(b"starting\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            err_tx.write_all(b"warning: x\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            out_tx.write_all(b"ready\npartial").await.unwrap();
        };

        let mut lines = Vec::new();
        let collect = merge_lines(out_rx, err_rx, |stream, line| {
            lines.push((stream, line.to_string()))
        });
        tokio::join!(writer, collect);

        assert_eq!(
            lines,
            vec![
                (OutputStream::Stdout, "starting".to_string()),
                (OutputStream::Stderr, "warning: x".to_string()),
                (OutputStream::Stdout, "ready".to_string()),
                (OutputStream::Stdout, "partial".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_noisy_stderr_does_not_block_app() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pyproject.toml"), MANIFEST).unwrap();
        let config = fake_launcher(
            dir.path(),
            "i=0\n\
             while [ $i -lt 20000 ]; do echo \"line $i\" >&2; echo \"out $i\"; i=$((i+1)); done\n\
             echo done > done.txt\n\
             exec sleep 30\n",
        );
        let mut supervisor = AppSupervisor::new(dir.path().to_path_buf(), config);

        supervisor.redeploy().await.pid().unwrap();
        wait_for_file(&dir.path().join("done.txt")).await;

        assert!(supervisor.stop(Duration::from_secs(2)).await.is_some());
    }

    fn libc_sigterm() -> i32 {
        nix::sys::signal::Signal::SIGTERM as i32
    }
}
