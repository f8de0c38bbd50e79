pub mod entry;
pub mod error;

pub use entry::{Envelope, ListFieldAccess, StatePayload, append_bounded};
pub use error::{Result, StoreError};

pub(crate) use entry::{Entry, now_ms};
