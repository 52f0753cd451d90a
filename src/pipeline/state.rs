//! Pipeline state machine.
//!
//! Each phase is its own struct and every transition consumes the phase it
//! leaves, so an impossible jump (e.g. `Idle` straight to `Ready`) does not
//! type-check.  [`PipelineState`] wraps the phases for storage and display.
//!
//! ```text
//! Idle ──prepare──▶ Preparing ──render──▶ Rendering ──finish──▶ Ready
//!                       │                     │
//!                       └──fail──▶ Failed ◀───┘
//!
//! Ready / Failed ──reset──▶ Idle
//! ```

use crate::pipeline::runner::PipelineError;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Nothing in flight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Idle;

/// Sources are being fetched and decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Preparing {
    track_count: usize,
}

/// Decoded buffers are being mixed and encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendering {
    track_count: usize,
}

/// An asset has been issued.
///
/// Only reachable through [`Rendering::finish`]:
///
/// ```compile_fail
/// use voice_mixdown::pipeline::state::{PipelineState, Ready};
///
/// let _ = PipelineState::from(Ready { asset_id: 1 });
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Ready {
    asset_id: u64,
}

/// The last mix failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Failed {
    error: PipelineError,
}

impl Idle {
    pub fn prepare(self, track_count: usize) -> Preparing {
        Preparing { track_count }
    }
}

impl Preparing {
    pub fn track_count(&self) -> usize {
        self.track_count
    }

    pub fn render(self) -> Rendering {
        Rendering {
            track_count: self.track_count,
        }
    }

    pub fn fail(self, error: PipelineError) -> Failed {
        Failed { error }
    }

    /// Abandon preparation (cancellation).
    pub fn abort(self) -> Idle {
        Idle
    }
}

impl Rendering {
    pub fn track_count(&self) -> usize {
        self.track_count
    }

    pub fn finish(self, asset_id: u64) -> Ready {
        Ready { asset_id }
    }

    pub fn fail(self, error: PipelineError) -> Failed {
        Failed { error }
    }
}

impl Ready {
    pub fn asset_id(&self) -> u64 {
        self.asset_id
    }

    pub fn reset(self) -> Idle {
        Idle
    }
}

impl Failed {
    pub fn error(&self) -> &PipelineError {
        &self.error
    }

    pub fn reset(self) -> Idle {
        Idle
    }
}

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    Idle(Idle),
    Preparing(Preparing),
    Rendering(Rendering),
    Ready(Ready),
    Failed(Failed),
}

impl PipelineState {
    /// Returns `true` while a mix is in flight.
    ///
    /// ```
    /// use voice_mixdown::pipeline::state::{Idle, PipelineState};
    ///
    /// let preparing = Idle.prepare(2);
    /// assert!(!PipelineState::from(Idle).is_busy());
    /// assert!(PipelineState::from(preparing.clone()).is_busy());
    /// assert!(PipelineState::from(preparing.render()).is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        matches!(self, PipelineState::Preparing(_) | PipelineState::Rendering(_))
    }

    /// A short human-readable label for logs and status output.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineState::Idle(_) => "Idle",
            PipelineState::Preparing(_) => "Preparing",
            PipelineState::Rendering(_) => "Rendering",
            PipelineState::Ready(_) => "Ready",
            PipelineState::Failed(_) => "Error",
        }
    }

    /// The error that put the pipeline in `Failed`, if any.
    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            PipelineState::Failed(failed) => Some(failed.error()),
            _ => None,
        }
    }

    /// Return to `Idle` from a settled state.  A busy state is handed back
    /// unchanged as the error.
    pub fn settle(self) -> Result<Idle, Self> {
        match self {
            PipelineState::Idle(idle) => Ok(idle),
            PipelineState::Ready(ready) => Ok(ready.reset()),
            PipelineState::Failed(failed) => Ok(failed.reset()),
            busy => Err(busy),
        }
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        PipelineState::Idle(Idle)
    }
}

impl From<Idle> for PipelineState {
    fn from(s: Idle) -> Self {
        PipelineState::Idle(s)
    }
}

impl From<Preparing> for PipelineState {
    fn from(s: Preparing) -> Self {
        PipelineState::Preparing(s)
    }
}

impl From<Rendering> for PipelineState {
    fn from(s: Rendering) -> Self {
        PipelineState::Rendering(s)
    }
}

impl From<Ready> for PipelineState {
    fn from(s: Ready) -> Self {
        PipelineState::Ready(s)
    }
}

impl From<Failed> for PipelineState {
    fn from(s: Failed) -> Self {
        PipelineState::Failed(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(asset_id: u64) -> Ready {
        Idle.prepare(1).render().finish(asset_id)
    }

    fn failed() -> Failed {
        Idle.prepare(1).fail(PipelineError::Cancelled)
    }

    #[test]
    fn default_pipeline_state_is_idle() {
        assert_eq!(PipelineState::default(), PipelineState::Idle(Idle));
    }

    #[test]
    fn happy_path_transitions() {
        let preparing = Idle.prepare(3);
        assert_eq!(preparing.track_count(), 3);
        let rendering = preparing.render();
        assert_eq!(rendering.track_count(), 3);
        let ready = rendering.finish(7);
        assert_eq!(ready.asset_id(), 7);
        assert_eq!(ready.reset(), Idle);
    }

    #[test]
    fn failure_from_either_busy_phase() {
        assert_eq!(failed().error(), &PipelineError::Cancelled);
        let failed = Idle.prepare(1).render().fail(PipelineError::Cancelled);
        assert_eq!(PipelineState::from(failed).label(), "Error");
    }

    #[test]
    fn busy_only_while_in_flight() {
        assert!(!PipelineState::from(Idle).is_busy());
        assert!(PipelineState::from(Idle.prepare(1)).is_busy());
        assert!(PipelineState::from(Idle.prepare(1).render()).is_busy());
        assert!(!PipelineState::from(ready(1)).is_busy());
        assert!(!PipelineState::from(failed()).is_busy());
    }

    #[test]
    fn labels() {
        assert_eq!(PipelineState::from(Idle).label(), "Idle");
        assert_eq!(PipelineState::from(Idle.prepare(0)).label(), "Preparing");
        assert_eq!(PipelineState::from(Idle.prepare(0).render()).label(), "Rendering");
        assert_eq!(PipelineState::from(ready(0)).label(), "Ready");
    }

    #[test]
    fn settle_refuses_busy_states() {
        assert!(PipelineState::from(ready(1)).settle().is_ok());
        assert!(PipelineState::from(failed()).settle().is_ok());
        let busy = PipelineState::from(Idle.prepare(2));
        assert_eq!(busy.clone().settle().unwrap_err(), busy);
    }

    #[test]
    fn error_is_exposed_only_when_failed() {
        let state = PipelineState::from(failed());
        assert_eq!(state.error(), Some(&PipelineError::Cancelled));
        assert!(PipelineState::default().error().is_none());
    }
}
