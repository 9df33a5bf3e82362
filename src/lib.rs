//! linelock crate root: re-exports and module wiring.
//!
//! This crate locks a laser's frequency to a spectroscopic reference
//! feature through a remote feedback board. The host owns the hardware
//! transport and any UI; this engine owns the algorithms and the state:
//! - `align`: cross-correlation, resampling and affine matching of traces
//! - `catalog`: the in-memory reference-line store
//! - `locate`: scanning a voltage range and scoring each catalog line
//! - `center`: the search-and-center feedback loop and autolock handoff
//! - `unlock`: loss-of-lock detection from control-signal history
//! - `supervisor`: the tick-driven state machine tying it all together
//! - `sink`: the packet/event streams hosts subscribe to

pub mod align;
pub mod catalog;
pub mod center;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod locate;
pub mod sink;
pub mod supervisor;
pub mod unlock;

// Public re-exports for a compact external API
pub use align::{correlate, find_shift, overlap_window, CorrelationResult};
pub use catalog::{ReferenceLine, ReferenceLineCatalog};
pub use center::{CenterStep, CenteringController, LockIssued};
pub use config::LockConfig;
pub use data::Trace;
pub use error::LockError;
pub use hardware::{ControlHistory, HardwareError, HardwareLink};
pub use locate::{LineScan, LockCandidate};
pub use sink::{EventHub, LockPacket};
pub use supervisor::{LockState, LockSupervisor, StopHandle};
pub use unlock::{ControlChannel, UnlockDetector, UnlockEvent};
