//! Process group helpers
//!
//! Compilers and programs are spawned as leaders of their own process group.
//! The leader's exit is observed without reaping it, so its pid (which is also
//! the group id) stays reserved until the rest of the group has been killed.

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitid, Id, WaitPidFlag};
use nix::unistd::Pid;
use tracing::debug;

/// Resolve once the group leader `pid` has exited.
///
/// The leader is left as a zombie; the caller reaps it after [`kill_group`].
pub async fn leader_exited(pid: u32) {
    let waited = tokio::task::spawn_blocking(move || loop {
        match waitid(
            Id::Pid(Pid::from_raw(pid as i32)),
            WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT,
        ) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    })
    .await;

    match waited {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => debug!("waitid({}) failed: {}", pid, e),
        Err(e) => debug!("waitid task for {} failed: {}", pid, e),
    }
}

/// SIGKILL every member of the group led by `pid`
pub fn kill_group(pid: u32) {
    // ESRCH just means the group is already empty
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        if e != Errno::ESRCH {
            debug!("killpg({}) failed: {}", pid, e);
        }
    }
}

/// True while some non-zombie process still belongs to group `pgid`
#[cfg(test)]
pub(crate) fn group_has_live_members(pgid: u32) -> bool {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return false;
    };
    entries.flatten().any(|entry| {
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            return false;
        };
        // Fields after the command name: state, ppid, pgrp, ...
        let Some((_, rest)) = stat.rsplit_once(')') else {
            return false;
        };
        let mut fields = rest.split_whitespace();
        let state = fields.next().unwrap_or("Z");
        let pgrp = fields.nth(1).and_then(|f| f.parse::<u32>().ok());
        pgrp == Some(pgid) && state != "Z" && state != "X"
    })
}

/// Poll until group `pgid` has no live members, up to `limit`
#[cfg(test)]
pub(crate) async fn group_gone_within(pgid: u32, limit: std::time::Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while group_has_live_members(pgid) {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    true
}

#[cfg(test)]
mod tests {
    use std::process::Stdio;
    use std::time::Duration;

    use tokio::process::Command;

    use super::*;

    #[tokio::test]
    async fn test_leader_exit_keeps_zombie_until_reaped() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 60 & exit 3"])
            .stdin(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        tokio::time::timeout(Duration::from_secs(10), leader_exited(pid))
            .await
            .unwrap();
        // The backgrounded sleep outlives its leader until the group is killed
        assert!(group_has_live_members(pid));

        kill_group(pid);
        let status = child.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
        assert!(group_gone_within(pid, Duration::from_secs(2)).await);
    }

    #[test]
    fn test_kill_empty_group_is_quiet() {
        // pid_max is far below this, so the group never exists
        kill_group(i32::MAX as u32 - 1);
    }
}
