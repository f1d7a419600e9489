//! Request admission: one global FIFO plus one live request per unit.

pub mod cancellation;
pub mod sequential;

pub use cancellation::{CancellationRegistry, UnitLease};
pub use sequential::{QueueSlot, QueueTurn, SequentialQueue};
