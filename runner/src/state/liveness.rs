//! PID liveness checks.
//!
//! Deliberately coarse: a `kill(pid, 0)`-style existence probe, nothing
//! more. A child process reusing a recycled PID after a restart is a known
//! false-positive hazard; callers must cross-check the persisted task
//! status before trusting "alive" (see the supervisor's crash recovery).

#[cfg(unix)]
pub fn is_pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn is_pid_alive(_pid: u32) -> bool {
    true
}

/// Best-effort SIGTERM. Errors (already dead, no permission) are swallowed —
/// callers only care that the signal was attempted.
#[cfg(unix)]
pub fn terminate_pid(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
pub fn terminate_pid(_pid: u32) {}

/// Best-effort SIGKILL, for a child that ignored [`terminate_pid`].
#[cfg(unix)]
pub fn kill_pid(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
pub fn kill_pid(_pid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_pid_alive(std::process::id()));
    }

    #[test]
    fn very_high_pid_is_almost_certainly_dead() {
        assert!(!is_pid_alive(u32::MAX / 2));
    }
}
