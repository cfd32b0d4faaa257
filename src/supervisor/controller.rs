//! Platform process control: liveness probing and tree termination.
//!
//! Two implementations sit behind [`ProcessController`]:
//! - [`SignalController`] (Unix): `kill(pid, 0)` probe, SIGTERM → SIGKILL.
//! - [`TableController`] (elsewhere): process-table query, `taskkill /T`.
//!
//! [`platform_controller`] picks one once at startup.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

use crate::error::StewardError;

/// Poll interval while waiting for a process to exit.
const EXIT_POLL: Duration = Duration::from_millis(100);

/// Liveness and termination capability for one host platform.
#[async_trait]
pub trait ProcessController: Send + Sync + std::fmt::Debug {
    /// Whether `pid` refers to a live (non-zombie) process.
    fn is_alive(&self, pid: u32) -> bool;

    /// `pid` plus its descendants, deepest first, root last.
    async fn snapshot(&self, pid: u32) -> Vec<u32> {
        match tokio::task::spawn_blocking(move || process_tree(pid)).await {
            Ok(tree) => tree,
            Err(e) => {
                tracing::warn!(pid, error = %e, "process table scan failed");
                vec![pid]
            }
        }
    }

    /// The members of `pids` that are still alive.
    async fn survivors(&self, pids: &[u32]) -> Vec<u32> {
        pids.iter().copied().filter(|pid| self.is_alive(*pid)).collect()
    }

    /// Ask `members` (the tree rooted at `root`) to exit.
    async fn request_stop(&self, root: u32, members: &[u32]) -> io::Result<()>;

    /// Forcibly kill `members` (the tree rooted at `root`).
    async fn force_kill(&self, root: u32, members: &[u32]) -> io::Result<()>;

    /// Graceful stop, bounded wait, forced kill, bounded wait.
    ///
    /// The tree is captured once up front and both phases act on it, so a
    /// descendant that outlives the root is still waited on and killed.
    /// Returns `Ok` only once every captured process is confirmed gone.
    async fn terminate(&self, pid: u32, grace: Duration, kill_wait: Duration) -> crate::Result<()> {
        let tree = self.snapshot(pid).await;
        tracing::debug!(pid, tree = ?tree, "captured process tree");

        if let Err(e) = self.request_stop(pid, &tree).await {
            tracing::warn!(pid, error = %e, "graceful stop request failed");
        }
        let mut remaining = wait_for_exit(self, &tree, grace).await;
        if remaining.is_empty() {
            tracing::info!(pid, "process tree exited after graceful stop");
            return Ok(());
        }

        // Pick up anything spawned during the grace period.
        if remaining.contains(&pid) {
            for member in self.snapshot(pid).await {
                if !remaining.contains(&member) {
                    remaining.push(member);
                }
            }
        }

        tracing::warn!(
            pid,
            survivors = ?remaining,
            grace_ms = grace.as_millis() as u64,
            "processes still alive, forcing kill"
        );
        if let Err(e) = self.force_kill(pid, &remaining).await {
            tracing::warn!(pid, error = %e, "forced kill failed");
        }
        let remaining = wait_for_exit(self, &remaining, kill_wait).await;
        if remaining.is_empty() {
            tracing::info!(pid, "process tree exited after forced kill");
            return Ok(());
        }

        Err(StewardError::ProcessTermination(
            pid,
            format!("processes still alive after forced kill: {:?}", remaining),
        ))
    }
}

/// Poll until every member of `pids` is gone or `timeout` elapses.
/// Returns the members still alive at the end.
async fn wait_for_exit<C: ProcessController + ?Sized>(
    ctl: &C,
    pids: &[u32],
    timeout: Duration,
) -> Vec<u32> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut remaining = pids.to_vec();
    loop {
        remaining = ctl.survivors(&remaining).await;
        if remaining.is_empty() || tokio::time::Instant::now() >= deadline {
            return remaining;
        }
        tokio::time::sleep(EXIT_POLL).await;
    }
}

/// Liveness check for several PIDs on the blocking pool.
async fn survivors_blocking<C>(ctl: C, pids: &[u32]) -> Vec<u32>
where
    C: ProcessController + Copy + 'static,
{
    let owned = pids.to_vec();
    match tokio::task::spawn_blocking(move || {
        owned.into_iter().filter(|pid| ctl.is_alive(*pid)).collect::<Vec<u32>>()
    })
    .await
    {
        Ok(alive) => alive,
        Err(e) => {
            tracing::debug!(error = %e, "liveness task failed, checking inline");
            pids.iter().copied().filter(|pid| ctl.is_alive(*pid)).collect()
        }
    }
}

/// `root` plus every descendant, deepest first, from a process-table snapshot.
pub fn process_tree(root: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        // Threads show up as tasks on Linux; only real processes count.
        if process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut order = Vec::new();
    let mut seen: HashSet<Pid> = HashSet::new();
    let mut stack = vec![Pid::from_u32(root)];
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        order.push(current.as_u32());
        if let Some(kids) = children.get(&current) {
            stack.extend(kids.iter().filter(|k| !seen.contains(k)).copied());
        }
    }
    order.reverse();
    order
}

/// Process-table lookup: present and not a zombie.
fn table_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    match system.process(pid) {
        Some(process) => !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
        None => false,
    }
}

/// Signal-based control for Unix hosts.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalController;

#[cfg(unix)]
impl SignalController {
    fn signal_members(root: u32, members: &[u32], signal: nix::sys::signal::Signal) -> io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, killpg};
        use nix::unistd::Pid as NixPid;

        // The gateway is spawned as a group leader; reach the whole group first.
        match killpg(NixPid::from_raw(root as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) | Err(Errno::EPERM) => {}
            Err(e) => tracing::debug!(pid = root, error = %e, "killpg failed"),
        }

        // Then every captured member, including those that left the group.
        let mut root_result = Ok(());
        for &member in members {
            match kill(NixPid::from_raw(member as i32), signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) if member == root => root_result = Err(io::Error::other(e)),
                Err(e) => tracing::debug!(pid = member, error = %e, "failed to signal descendant"),
            }
        }
        root_result
    }

    async fn signal(root: u32, members: &[u32], signal: nix::sys::signal::Signal) -> io::Result<()> {
        let members = members.to_vec();
        tokio::task::spawn_blocking(move || Self::signal_members(root, &members, signal))
            .await
            .map_err(io::Error::other)?
    }
}

#[cfg(unix)]
#[async_trait]
impl ProcessController for SignalController {
    fn is_alive(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid as NixPid;

        if pid == 0 || pid > i32::MAX as u32 {
            return false;
        }
        match kill(NixPid::from_raw(pid as i32), None) {
            // Exists; rule out an unreaped zombie.
            Ok(()) | Err(Errno::EPERM) => table_alive(pid),
            Err(_) => false,
        }
    }

    async fn survivors(&self, pids: &[u32]) -> Vec<u32> {
        survivors_blocking(*self, pids).await
    }

    async fn request_stop(&self, root: u32, members: &[u32]) -> io::Result<()> {
        tracing::info!(pid = root, members = members.len(), "sending SIGTERM to gateway process tree");
        Self::signal(root, members, nix::sys::signal::Signal::SIGTERM).await
    }

    async fn force_kill(&self, root: u32, members: &[u32]) -> io::Result<()> {
        tracing::info!(pid = root, members = members.len(), "sending SIGKILL to gateway process tree");
        Self::signal(root, members, nix::sys::signal::Signal::SIGKILL).await
    }
}

/// Process-table control for hosts without POSIX signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct TableController;

impl TableController {
    async fn taskkill(pid: u32, force: bool) -> io::Result<()> {
        let mut cmd = tokio::process::Command::new("taskkill");
        if force {
            cmd.arg("/F");
        }
        cmd.args(["/T", "/PID", &pid.to_string()]);
        cmd.stdin(std::process::Stdio::null());
        let output = cmd.output().await?;
        tracing::debug!(
            pid,
            force,
            code = ?output.status.code(),
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "taskkill finished"
        );
        if output.status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!(
                "taskkill exited with {:?}",
                output.status.code()
            )))
        }
    }

    /// taskkill the root, then each captured member that outlived it.
    async fn taskkill_members(&self, root: u32, members: &[u32], force: bool) -> io::Result<()> {
        let root_result = Self::taskkill(root, force).await;
        for &member in members.iter().filter(|m| **m != root) {
            if !self.is_alive(member) {
                continue;
            }
            if let Err(e) = Self::taskkill(member, force).await {
                tracing::debug!(pid = member, error = %e, "failed to stop descendant");
            }
        }
        root_result
    }
}

#[async_trait]
impl ProcessController for TableController {
    fn is_alive(&self, pid: u32) -> bool {
        pid != 0 && table_alive(pid)
    }

    async fn survivors(&self, pids: &[u32]) -> Vec<u32> {
        survivors_blocking(*self, pids).await
    }

    async fn request_stop(&self, root: u32, members: &[u32]) -> io::Result<()> {
        tracing::info!(pid = root, members = members.len(), "requesting gateway process tree stop via taskkill");
        self.taskkill_members(root, members, false).await
    }

    async fn force_kill(&self, root: u32, members: &[u32]) -> io::Result<()> {
        tracing::info!(pid = root, members = members.len(), "forcing gateway process tree stop via taskkill /F");
        self.taskkill_members(root, members, true).await
    }
}

/// The controller for the host platform.
pub fn platform_controller() -> Arc<dyn ProcessController> {
    #[cfg(unix)]
    {
        Arc::new(SignalController)
    }

    #[cfg(not(unix))]
    {
        Arc::new(TableController)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        let me = std::process::id();
        assert!(platform_controller().is_alive(me));
        assert!(TableController.is_alive(me));
    }

    #[test]
    fn test_unlikely_pid_is_not_alive() {
        assert!(!platform_controller().is_alive(9_999_999));
        assert!(!platform_controller().is_alive(0));
    }

    #[test]
    fn test_process_tree_contains_root_last() {
        let me = std::process::id();
        let tree = process_tree(me);
        assert_eq!(tree.last(), Some(&me));
    }

    #[tokio::test]
    async fn test_survivors_filters_dead_pids() {
        let me = std::process::id();
        let alive = platform_controller().survivors(&[9_999_999, me, 0]).await;
        assert_eq!(alive, vec![me]);
        assert_eq!(TableController.survivors(&[me, 9_999_999]).await, vec![me]);
    }

    #[tokio::test]
    async fn test_snapshot_ends_with_root() {
        let me = std::process::id();
        let tree = platform_controller().snapshot(me).await;
        assert_eq!(tree.last(), Some(&me));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_terminate_already_gone() {
        let result = SignalController
            .terminate(9_999_999, Duration::from_millis(200), Duration::from_millis(200))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_terminate_process_tree() {
        // A shell that spawns a grandchild and waits on it.
        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "sleep 60 & wait"])
            .process_group(0)
            .spawn()
            .expect("failed to spawn sh");
        let pid = child.id().expect("no PID");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let tree = process_tree(pid);
        assert!(tree.len() >= 2, "expected sh and sleep in tree: {tree:?}");

        // Reap concurrently so the root does not linger as a zombie.
        let reaper = tokio::spawn(async move { child.wait().await });
        let result = SignalController
            .terminate(pid, Duration::from_secs(2), Duration::from_secs(2))
            .await;
        assert!(result.is_ok(), "terminate failed: {result:?}");
        let _ = reaper.await;

        for member in tree {
            assert!(!SignalController.is_alive(member), "pid {member} survived");
        }
    }

    #[tokio::test]
    #[cfg(target_os = "linux")]
    async fn test_terminate_kills_detached_descendant_ignoring_sigterm() {
        if which::which("setsid").is_err() {
            return;
        }
        // The inner shell leaves the group via setsid and ignores SIGTERM,
        // so it outlives the root after the graceful phase.
        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "setsid sh -c 'trap \"\" TERM; sleep 60 & wait' & wait"])
            .process_group(0)
            .spawn()
            .expect("failed to spawn sh");
        let pid = child.id().expect("no PID");
        tokio::time::sleep(Duration::from_millis(300)).await;

        let tree = process_tree(pid);
        assert!(tree.len() >= 3, "expected sh, setsid shell and sleep: {tree:?}");

        let reaper = tokio::spawn(async move { child.wait().await });
        let result = SignalController
            .terminate(pid, Duration::from_secs(1), Duration::from_secs(1))
            .await;
        assert!(result.is_ok(), "terminate failed: {result:?}");
        let _ = reaper.await;

        let survivors: Vec<u32> = tree
            .into_iter()
            .filter(|member| SignalController.is_alive(*member))
            .collect();
        assert!(survivors.is_empty(), "survivors after stop: {survivors:?}");
    }
}
