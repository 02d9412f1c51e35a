//! Test data builders with sensible defaults

use harvest_domain::{
    DestinationKind, JurisdictionLevel, PipelineConfig, ScraperDescriptor, SourceKind, StepSpec,
    TransformConfig, WorkflowSpec,
};
use serde_json::Value;

/// Builder for scraper descriptors
///
/// Defaults to an enabled scraper with a simulated source and a database destination.
pub struct ScraperBuilder {
    scraper: ScraperDescriptor,
}

impl ScraperBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            scraper: ScraperDescriptor::new(id, format!("https://example.org/{id}")),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.scraper.name = name.to_string();
        self
    }

    pub fn with_source_url(mut self, url: &str) -> Self {
        self.scraper.source_url = url.to_string();
        self
    }

    pub fn with_data_type(mut self, data_type: &str) -> Self {
        self.scraper.data_type = data_type.to_string();
        self
    }

    pub fn with_jurisdiction(mut self, level: JurisdictionLevel) -> Self {
        self.scraper.jurisdiction_level = level;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.scraper.enabled = false;
        self
    }

    pub fn with_source(mut self, source: SourceKind) -> Self {
        self.scraper.pipeline.extract.source = source;
        self
    }

    pub fn with_extract_options(mut self, options: Value) -> Self {
        self.scraper.pipeline.extract.options = options;
        self
    }

    pub fn with_transform(mut self, transform: TransformConfig) -> Self {
        self.scraper.pipeline.transform = transform;
        self
    }

    pub fn with_destination(mut self, destination: DestinationKind) -> Self {
        self.scraper.pipeline.load.destination = destination;
        self
    }

    pub fn with_load_options(mut self, options: Value) -> Self {
        self.scraper.pipeline.load.options = options;
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.scraper.pipeline = pipeline;
        self
    }

    pub fn build(self) -> ScraperDescriptor {
        self.scraper
    }
}

/// Builder for workflow step specs
pub struct StepSpecBuilder {
    step: StepSpec,
}

impl StepSpecBuilder {
    fn typed(step_type: &str, name: &str) -> Self {
        Self {
            step: StepSpec {
                step_type: Some(step_type.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn extract(name: &str, source: &str) -> Self {
        let mut builder = Self::typed("extract", name);
        builder.step.source = Some(source.to_string());
        builder
    }

    pub fn transform(name: &str) -> Self {
        Self::typed("transform", name)
    }

    pub fn load(name: &str, destination: &str) -> Self {
        let mut builder = Self::typed("load", name);
        builder.step.destination = Some(destination.to_string());
        builder
    }

    pub fn custom(name: &str, handler: &str) -> Self {
        let mut builder = Self::typed("custom", name);
        builder.step.handler = Some(handler.to_string());
        builder
    }

    /// A spec with no fields set, for validation tests
    pub fn empty() -> Self {
        Self {
            step: StepSpec::default(),
        }
    }

    pub fn with_type(mut self, step_type: &str) -> Self {
        self.step.step_type = Some(step_type.to_string());
        self
    }

    pub fn without_name(mut self) -> Self {
        self.step.name = None;
        self
    }

    pub fn without_source(mut self) -> Self {
        self.step.source = None;
        self
    }

    pub fn without_destination(mut self) -> Self {
        self.step.destination = None;
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.step.config = config;
        self
    }

    pub fn build(self) -> StepSpec {
        self.step
    }
}

/// Builder for workflow specs
///
/// Defaults to a named, immediately scheduled workflow without steps.
pub struct WorkflowSpecBuilder {
    spec: WorkflowSpec,
}

impl WorkflowSpecBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            spec: WorkflowSpec {
                name: Some(name.to_string()),
                description: None,
                steps: Some(Vec::new()),
                schedule: Some("immediate".to_string()),
                max_retries: None,
            },
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.spec.description = Some(description.to_string());
        self
    }

    pub fn with_schedule(mut self, schedule: &str) -> Self {
        self.spec.schedule = Some(schedule.to_string());
        self
    }

    pub fn without_schedule(mut self) -> Self {
        self.spec.schedule = None;
        self
    }

    pub fn without_name(mut self) -> Self {
        self.spec.name = None;
        self
    }

    pub fn with_step(mut self, step: StepSpec) -> Self {
        self.spec.steps.get_or_insert_with(Vec::new).push(step);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.spec.max_retries = Some(max_retries);
        self
    }

    /// extract(simulated) → transform → load(file)
    pub fn etl(name: &str) -> Self {
        Self::new(name)
            .with_step(StepSpecBuilder::extract("extract", "simulated").build())
            .with_step(StepSpecBuilder::transform("transform").build())
            .with_step(StepSpecBuilder::load("load", "file").build())
    }

    pub fn build(self) -> WorkflowSpec {
        self.spec
    }
}
