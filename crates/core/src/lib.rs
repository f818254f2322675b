//! Small, dependency-light utilities shared by every crate in the workspace.
//!
//! Nothing in here knows about services, endpoints or envelopes — it is the
//! kind of thing that would otherwise get copy-pasted into three different
//! modules.

pub mod bow;
pub mod ids;
pub mod tokio_metrics;

pub mod prelude {
	pub use std::sync::Arc;
	pub use std::time::{Duration, Instant};

	pub use crate::bow::OwnedOrBorrowed;
	pub use crate::ids::new_id;
}
