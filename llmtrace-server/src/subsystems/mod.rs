pub mod replay;
pub mod replay_sessions;
pub mod store;
pub mod trace;
