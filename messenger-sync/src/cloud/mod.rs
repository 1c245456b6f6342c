//! The cloud container seam.
//!
//! A [`CloudContainer`] is the remote side of sync: it delivers change
//! notifications and accepts pushed local edits. The transport behind it
//! (push notifications, periodic fetch) is out of scope here.

mod container;
mod memory;

pub use container::{CloudContainer, NOTIFICATION_BUFFER};
pub use memory::InMemoryContainer;
