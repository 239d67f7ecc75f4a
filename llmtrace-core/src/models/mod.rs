pub mod record;
pub mod replay_record;
pub mod replay_session;
pub mod session;

pub use record::{Record, TraceStatus};
pub use replay_record::ReplayRecord;
pub use replay_session::{ReplaySession, ReplaySessionStatus};
pub use session::Session;
