//! Process outcome reported by an engine for one step.

use serde::{Deserialize, Serialize};

/// Raw process outcome of a step, produced once by `Engine::wait_step`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub exit_code: i32,
    pub exited: bool,
    pub oom_killed: bool,
}

impl State {
    /// A process that exited with `code`.
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: code,
            exited: true,
            oom_killed: false,
        }
    }

    /// A process killed by the kernel OOM killer.
    pub fn oom_killed(code: i32) -> Self {
        Self {
            exit_code: code,
            exited: true,
            oom_killed: true,
        }
    }

    pub fn is_success(&self) -> bool {
        !self.oom_killed && self.exit_code == 0
    }
}
