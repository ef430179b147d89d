pub mod change;
pub mod manager;
pub mod session;

pub use change::ChangeOp;
pub use manager::{SessionInfo, SessionManager};
pub use session::{Session, SessionId};
