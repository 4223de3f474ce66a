//! Builder for [`SchedulerInstance`]

use serde_json::{Map, Value};
use std::sync::Arc;

use super::config::SchedulerConfig;
use super::cron::CronSchedule;
use super::instance::SchedulerInstance;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::repository::Repository;
use crate::task::Pipeline;

/// Builder for creating a SchedulerInstance
pub struct SchedulerBuilder {
    name: String,
    description: String,
    cron: Option<String>,
    config: SchedulerConfig,
    pipeline: Option<Pipeline>,
    arguments: Map<String, Value>,
    repository: Option<Arc<dyn Repository>>,
}

impl SchedulerBuilder {
    /// Create a new builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            cron: None,
            config: SchedulerConfig::default(),
            pipeline: None,
            arguments: Map::new(),
            repository: None,
        }
    }

    /// Set the description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the cron expression. An empty expression means no cron.
    pub fn cron(mut self, expression: impl Into<String>) -> Self {
        let expression = expression.into();
        self.cron = (!expression.trim().is_empty()).then_some(expression);
        self
    }

    /// Set the configuration
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the pipeline
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Add one static argument
    pub fn argument(mut self, key: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    /// Replace the static arguments
    pub fn arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Set the repository
    pub fn repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Build the scheduler
    pub fn build(self) -> Result<Arc<SchedulerInstance>> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("Scheduler name is required".to_string()));
        }
        self.config.validate()?;

        let repository = self
            .repository
            .ok_or_else(|| Error::InvalidConfig("Repository is required".to_string()))?;
        let pipeline = self
            .pipeline
            .ok_or_else(|| Error::JobNotRegistered(self.name.clone()))?;
        let cron = self.cron.as_deref().map(CronSchedule::parse).transpose()?;

        let config = Arc::new(self.config);
        let job = Job::new(
            self.name.clone(),
            pipeline,
            self.arguments,
            config.clone(),
            repository.clone(),
        )?;

        Ok(Arc::new(SchedulerInstance::new(
            self.name,
            self.description,
            cron,
            config,
            job,
            repository,
        )))
    }
}
