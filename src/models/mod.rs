pub mod endpoint;
pub mod execution;
pub mod inbound_event;
pub mod monitor;
pub mod organization;
pub mod task;

pub use endpoint::Endpoint;
pub use execution::{Execution, ExecutionStatus};
pub use inbound_event::InboundEvent;
pub use monitor::{Monitor, MonitorPing, MonitorStatus};
pub use organization::{Organization, Tier};
pub use task::{ScheduleType, Task};
