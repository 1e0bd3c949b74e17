pub mod collectors;
pub mod middleware;
pub mod registry;

pub use collectors::AuthMetricsCollector;
pub use middleware::metrics_middleware;
pub use registry::MetricsRegistry;
