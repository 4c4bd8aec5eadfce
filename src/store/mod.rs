pub mod endpoint_store;
pub mod execution_store;
pub mod monitor_store;
pub mod organization_store;
pub mod task_store;

pub use endpoint_store::EndpointStore;
pub use execution_store::ExecutionStore;
pub use monitor_store::MonitorStore;
pub use organization_store::OrganizationStore;
pub use task_store::TaskStore;
