// Application Layer - Use Cases and Business Logic

pub mod aggregator;
pub mod dispatch;
pub mod exporter;
pub mod resolver;
pub mod retry;

// Re-exports
pub use aggregator::{EventKind, ExecutionEvent, ResultAggregator};
pub use dispatch::{DispatchConfig, DispatchEngine, DispatchRequest};
pub use exporter::{ArtifactDescriptor, ExportFormat, Exporter};
pub use resolver::TargetResolver;
pub use retry::RetrySelection;
