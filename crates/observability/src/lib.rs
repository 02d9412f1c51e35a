pub mod logging;
pub mod metrics_collector;
pub mod resource_sampler;

pub use logging::{init_logging, init_metrics_exporter};
pub use metrics_collector::MetricsCollector;
pub use resource_sampler::{local_hostname, SysinfoSampler};
