//! Background timekeeping: the heartbeat that refreshes elapsed time while
//! a session runs, and the once-a-minute maintenance sweep.

mod coordinator;
mod maintenance;

pub use coordinator::HeartbeatCoordinator;
pub use maintenance::MaintenanceTicker;
