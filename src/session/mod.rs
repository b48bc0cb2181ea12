//! Ephemeral modelling sessions.

mod clock;
mod key;
mod model;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::SessionKey;
pub use model::{ColumnPair, JoinSpec, Message, ModelDraft, Role, Session};
pub use store::{ReaperHandle, SessionStore};
