//! Process liveness probe

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tracing::debug;

/// Whether `pid` currently names a running process
///
/// Zombies and dead entries count as not running. A reused pid is
/// indistinguishable from the previous owner.
pub fn is_process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }

    let target = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);

    let alive = match system.process(target) {
        Some(process) => !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
        None => false,
    };
    debug!(pid, alive, "liveness probe");
    alive
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    #[test]
    fn test_own_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_reaped_child_is_dead() {
        let exe = std::env::current_exe().unwrap();
        let mut child = Command::new(exe)
            .arg("--list")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!is_process_alive(pid));
    }
}
