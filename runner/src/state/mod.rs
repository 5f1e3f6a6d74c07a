//! Per-project runner state: JSON-on-disk, written atomically, with PID
//! liveness checks used both by the supervisor's own tick and by the
//! fleet-wide stale-state sweep.

mod liveness;
mod runner_state;

pub use liveness::{is_pid_alive, kill_pid, terminate_pid};
pub use runner_state::{
    RunnerState, RunnerStatus, RunningTaskEntry, StateStats, remove_supervisor_pid, stale_state_sweep,
    state_file_path, write_supervisor_pid,
};
