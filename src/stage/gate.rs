/// Stage Gate
///
/// A monotonic stage value shared between the loader, its workers and the
/// consumer. Advances broadcast to every waiter; waits block until the value
/// is at least the requested stage.
use parking_lot::{Condvar, Mutex};

use super::Stage;

struct GateState {
    current: Stage,
    /// Distinct stages in the order they were held
    history: Vec<Stage>,
}

pub struct StageGate {
    state: Mutex<GateState>,
    advanced: Condvar,
}

impl Default for StageGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StageGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                current: Stage::Start,
                history: vec![Stage::Start],
            }),
            advanced: Condvar::new(),
        }
    }

    /// Current stage, without blocking on any transition.
    pub fn current(&self) -> Stage {
        self.state.lock().current
    }

    /// Every stage held so far, oldest first.
    pub fn history(&self) -> Vec<Stage> {
        self.state.lock().history.clone()
    }

    /// Move the gate to `stage` and wake all waiters.
    ///
    /// # Panics
    /// If `stage` is lower than the current stage.
    pub fn advance_to(&self, stage: Stage) {
        let mut state = self.state.lock();
        Self::set(&mut state, stage);
        drop(state);
        self.advanced.notify_all();
    }

    /// Like [`StageGate::advance_to`], but leaves a failed gate untouched and
    /// returns the error stage it holds.
    pub fn try_advance(&self, stage: Stage) -> Result<(), Stage> {
        let mut state = self.state.lock();
        if state.current.is_error() {
            return Err(state.current);
        }
        Self::set(&mut state, stage);
        drop(state);
        self.advanced.notify_all();
        Ok(())
    }

    /// Move to `error` unless the gate already reached `reached`.
    /// Returns true if the gate was moved.
    pub fn fail_unless_reached(&self, reached: Stage, error: Stage) -> bool {
        debug_assert!(error.is_error());
        let mut state = self.state.lock();
        if state.current >= reached {
            return false;
        }
        Self::set(&mut state, error);
        drop(state);
        self.advanced.notify_all();
        true
    }

    /// Block until the gate holds `stage` or anything above it, including an
    /// error stage. Returns the stage observed.
    pub fn wait_until(&self, stage: Stage) -> Stage {
        let mut state = self.state.lock();
        while state.current < stage {
            self.advanced.wait(&mut state);
        }
        state.current
    }

    fn set(state: &mut GateState, stage: Stage) {
        assert!(
            stage >= state.current,
            "stage gate cannot move back from {} to {}",
            state.current,
            stage
        );
        if stage != state.current {
            log::trace!("stage {} -> {}", state.current, stage);
            state.current = stage;
            state.history.push(stage);
        }
    }
}
