//! Round lifecycle: types, the growth curve, the state machine and its clock.

pub mod clock;
pub mod curve;
pub mod events;
pub mod state;
pub mod types;

pub use clock::RoundClock;
pub use curve::MultiplierCurve;
pub use events::RoundEvent;
pub use state::{LiveRead, RoundStateMachine, RoundTimings, RoundView};
pub use types::{Multiplier, RoundId, RoundPhase, RoundReveal, RoundSnapshot};
