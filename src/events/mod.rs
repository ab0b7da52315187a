//! # Event Bus
//!
//! Resources travel through the engine as [`Event`]s: one `Discovered` per declared
//! resource, `Created`/`Updated`/`Unchanged` once reconciled, and a single
//! `PostProcessRequested` after every discovery has been published. Processors subscribe
//! by [`EventKind`] and may publish follow-up events from inside their handlers.

pub mod bus;
pub mod event;

pub use bus::{EventBus, Handler, HandlerFuture};
pub use event::{Event, EventKind, ReconcileOutcome};
