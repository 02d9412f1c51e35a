pub mod control;
pub mod executor;
pub mod extractors;
pub mod loaders;
pub mod registry;
pub mod transform;

pub use control::JobControl;
pub use executor::{PipelineExecutor, PipelineRequest};
pub use extractors::{FileExtractor, HttpExtractor, SimulatedExtractor};
pub use loaders::{ApiLoader, FileLoader};
pub use registry::StrategyRegistry;
pub use transform::{TransformOutcome, Transformer};
