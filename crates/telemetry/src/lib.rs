//! Trajectory context and span recording for Cadence turns.
//!
//! A trajectory step is the correlation unit for one action step's
//! execution. The executor binds it ambiently (see [`trajectory`]); anything
//! that runs underneath, model calls included, tags its spans with it so the
//! [`TrajectoryRecorder`] can answer "what did step X cause?".

pub mod model;
pub mod recorder;
pub mod trajectory;

pub use model::{Span, SpanKind, Trace};
pub use recorder::{TraceGuard, TrajectoryRecorder};
pub use trajectory::{TrajectoryStepId, current_step, with_step};
