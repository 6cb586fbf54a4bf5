//! Child process supervision
//!
//! Launches event programs in their own process group, reaps them through a
//! per-child wait task, and terminates whole groups with SIGTERM followed —
//! after a bounded grace period — by SIGKILL. Detached children are severed
//! at launch and never tracked.

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	process::Stdio,
	time::Duration,
};

use tokio::{process::Command, sync::mpsc};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// How long a terminated process group gets to exit before SIGKILL.
pub const TERMINATION_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchCommand {
	/// Run an executable file directly.
	Direct(PathBuf),
	/// Run a command line through the shell.
	Shell(String),
}

#[derive(Debug, Clone)]
pub struct Launch {
	pub command: LaunchCommand,
	pub working_dir: PathBuf,
	pub env: Vec<(String, String)>,
	pub detach: bool,
	pub quiet: bool,
	/// The entity path that owns this process; used for scoped cleanup.
	pub owner: PathBuf,
}

/// Reported when a tracked child exits.
#[derive(Debug)]
pub struct ProcessExit {
	pub id: u64,
	pub owner: PathBuf,
	pub success: bool,
}

struct RunningProcess {
	pid: i32,
	owner: PathBuf,
	quiet: bool,
}

pub struct ProcessSupervisor {
	running: HashMap<u64, RunningProcess>,
	next_id: u64,
	exit_tx: mpsc::UnboundedSender<ProcessExit>,
}

impl ProcessSupervisor {
	pub fn new() -> (Self, mpsc::UnboundedReceiver<ProcessExit>) {
		let (exit_tx, exit_rx) = mpsc::unbounded_channel();
		(
			Self {
				running: HashMap::new(),
				next_id: 1,
				exit_tx,
			},
			exit_rx,
		)
	}

	/// Launch a process. Returns the tracking id, or `None` for detached
	/// children (they are not tracked after launch).
	pub fn spawn(&mut self, launch: Launch) -> Result<Option<u64>> {
		let mut command = match &launch.command {
			LaunchCommand::Direct(path) => Command::new(path),
			LaunchCommand::Shell(line) => {
				let mut command = Command::new("sh");
				command.arg("-c").arg(line);
				command
			}
		};
		command
			.current_dir(&launch.working_dir)
			.envs(launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null());
		// Each child leads its own group so termination reaches grandchildren.
		#[cfg(unix)]
		command.process_group(0);

		let describe = match &launch.command {
			LaunchCommand::Direct(path) => path.display().to_string(),
			LaunchCommand::Shell(line) => line.clone(),
		};

		let mut child = command.spawn().map_err(|source| {
			error!("[PROCESS] Launching `{describe}` failed: {source}");
			Error::io(launch.working_dir.clone(), source)
		})?;

		let pid = child.id().map(|pid| pid as i32).unwrap_or(-1);
		if !launch.quiet {
			info!(
				"[PROCESS {pid}] Launched `{describe}`{}",
				if launch.detach { " (detached)" } else { "" }
			);
		}

		if launch.detach {
			// Severed: let it run, reap it in the background, forget it.
			tokio::spawn(async move {
				child.wait().await.ok();
			});
			return Ok(None);
		}

		let id = self.next_id;
		self.next_id += 1;
		self.running.insert(
			id,
			RunningProcess {
				pid,
				owner: launch.owner.clone(),
				quiet: launch.quiet,
			},
		);

		let exit_tx = self.exit_tx.clone();
		let owner = launch.owner;
		let quiet = launch.quiet;
		tokio::spawn(async move {
			let success = match child.wait().await {
				Ok(status) => {
					if !quiet {
						info!("[PROCESS {pid}] `{describe}` ended [{status}]");
					}
					status.success()
				}
				Err(source) => {
					error!("[PROCESS {pid}] Failed to reap `{describe}`: {source}");
					false
				}
			};
			exit_tx.send(ProcessExit { id, owner, success }).ok();
		});

		Ok(Some(id))
	}

	/// Forget a process the reaper has reported done.
	pub fn reaped(&mut self, id: u64) {
		self.running.remove(&id);
	}

	/// Whether any tracked process of this owner is still alive (drives the
	/// `unique` skip).
	pub fn has_running(&self, owner: &Path) -> bool {
		self.running.values().any(|process| process.owner == owner)
	}

	/// Terminate every tracked process of this owner: SIGTERM to the whole
	/// group now, SIGKILL after the grace period.
	pub fn terminate_owner(&mut self, owner: &Path) {
		let ids: Vec<u64> = self
			.running
			.iter()
			.filter(|(_, process)| process.owner == owner)
			.map(|(&id, _)| id)
			.collect();
		for id in ids {
			self.terminate(id);
		}
	}

	pub fn terminate(&mut self, id: u64) {
		let Some(process) = self.running.get(&id) else {
			return;
		};
		let pid = process.pid;
		if !process.quiet {
			debug!("[PROCESS {pid}] Terminating");
		}
		if pid <= 0 {
			self.running.remove(&id);
			return;
		}
		signal_group(pid, libc::SIGTERM);
		tokio::spawn(async move {
			tokio::time::sleep(TERMINATION_GRACE).await;
			// Group may already be gone; a stray ESRCH is fine.
			signal_group(pid, libc::SIGKILL);
		});
	}

	/// Terminate everything still tracked (shutdown path).
	pub fn terminate_all(&mut self) {
		let ids: Vec<u64> = self.running.keys().copied().collect();
		if !ids.is_empty() {
			warn!("Terminating {} remaining child process(es)", ids.len());
		}
		for id in ids {
			self.terminate(id);
		}
	}
}

#[cfg(unix)]
fn signal_group(pid: i32, signal: i32) {
	// Negative pid addresses the whole process group.
	unsafe {
		libc::kill(-pid, signal);
	}
}

#[cfg(not(unix))]
fn signal_group(_pid: i32, _signal: i32) {}

#[cfg(test)]
mod tests {
	use super::*;

	fn launch(command: LaunchCommand, owner: &str, detach: bool) -> Launch {
		Launch {
			command,
			working_dir: std::env::temp_dir(),
			env: vec![],
			detach,
			quiet: true,
			owner: PathBuf::from(owner),
		}
	}

	#[tokio::test]
	async fn children_are_reaped_and_reported() {
		let (mut supervisor, mut exit_rx) = ProcessSupervisor::new();
		let id = supervisor
			.spawn(launch(LaunchCommand::Shell("true".to_string()), "/owner", false))
			.unwrap()
			.expect("tracked");

		let exit = exit_rx.recv().await.expect("exit report");
		assert_eq!(exit.id, id);
		assert_eq!(exit.owner, PathBuf::from("/owner"));
		assert!(exit.success);
		supervisor.reaped(exit.id);
		assert!(!supervisor.has_running(Path::new("/owner")));
	}

	#[tokio::test]
	async fn failing_commands_report_failure() {
		let (mut supervisor, mut exit_rx) = ProcessSupervisor::new();
		supervisor
			.spawn(launch(LaunchCommand::Shell("exit 3".to_string()), "/owner", false))
			.unwrap();
		let exit = exit_rx.recv().await.expect("exit report");
		assert!(!exit.success);
	}

	#[tokio::test]
	async fn detached_children_are_not_tracked() {
		let (mut supervisor, _exit_rx) = ProcessSupervisor::new();
		let id = supervisor
			.spawn(launch(LaunchCommand::Shell("true".to_string()), "/owner", true))
			.unwrap();
		assert!(id.is_none());
		assert!(!supervisor.has_running(Path::new("/owner")));
	}

	#[tokio::test]
	async fn termination_kills_long_runners() {
		let (mut supervisor, mut exit_rx) = ProcessSupervisor::new();
		supervisor
			.spawn(launch(
				LaunchCommand::Shell("sleep 30".to_string()),
				"/owner",
				false,
			))
			.unwrap();
		assert!(supervisor.has_running(Path::new("/owner")));

		supervisor.terminate_owner(Path::new("/owner"));
		let exit = tokio::time::timeout(Duration::from_secs(5), exit_rx.recv())
			.await
			.expect("terminated within the grace period")
			.expect("exit report");
		assert!(!exit.success);
		supervisor.reaped(exit.id);
	}

	#[tokio::test]
	async fn missing_executables_error_out() {
		let (mut supervisor, _exit_rx) = ProcessSupervisor::new();
		let result = supervisor.spawn(launch(
			LaunchCommand::Direct(PathBuf::from("/does/not/exist")),
			"/owner",
			false,
		));
		assert!(result.is_err());
	}
}
