//! Owns the single running pipeline and serializes start/stop requests.

use std::sync::{Arc, Mutex};

use log::{debug, info};
use serde::Serialize;

use crate::config::{Config, ConfigError, ConfigPatch, ConfigStore};
use crate::pipeline::{Backends, ConfiguredBackends, Pipeline, StartError, Variant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    pub running: bool,
    pub variant: Option<Variant>,
}

impl Status {
    const STOPPED: Self = Self {
        running: false,
        variant: None,
    };
}

pub struct Controller {
    config: Arc<ConfigStore>,
    backends: Box<dyn Backends>,
    slot: Mutex<Option<Pipeline>>,
}

impl Controller {
    #[must_use]
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self::with_backends(config, Box::new(ConfiguredBackends))
    }

    #[must_use]
    pub fn with_backends(config: Arc<ConfigStore>, backends: Box<dyn Backends>) -> Self {
        Self {
            config,
            backends,
            slot: Mutex::new(None),
        }
    }

    /// Start `variant`, replacing whatever runs now.
    ///
    /// The old pipeline is fully stopped and joined before the new one starts
    /// connecting. Asking for the variant that is already running is a no-op.
    pub fn start(&self, variant: Variant) -> Result<Status, StartError> {
        let mut slot = self.slot.lock().unwrap();
        if let Some(current) = slot.as_ref() {
            if current.variant() == variant && current.is_running() {
                debug!("{variant} pipeline already running");
                return Ok(status_of(current));
            }
        }
        if let Some(mut old) = slot.take() {
            info!("Replacing {} pipeline with {variant}", old.variant());
            old.stop();
            old.join();
        }

        let pipeline = Pipeline::start(variant, self.config.clone(), self.backends.as_ref())?;
        let status = status_of(&pipeline);
        *slot = Some(pipeline);
        Ok(status)
    }

    /// Stop the running pipeline, if any, and wait for its teardown.
    pub fn stop(&self) -> Status {
        let mut slot = self.slot.lock().unwrap();
        match slot.take() {
            Some(mut pipeline) => {
                pipeline.stop();
                pipeline.join();
            }
            None => debug!("Stop requested but nothing is running"),
        }
        Status::STOPPED
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.slot
            .lock()
            .unwrap()
            .as_ref()
            .map_or(Status::STOPPED, status_of)
    }

    #[must_use]
    pub fn config(&self) -> Config {
        self.config.snapshot()
    }

    /// Apply a partial config update and persist it.
    ///
    /// A running pipeline picks up the change on its next tick.
    pub fn mutate_config(&self, patch: ConfigPatch) -> Result<(), ConfigError> {
        let log_level = patch.log_level;
        self.config.mutate(patch)?;
        if let Some(level) = log_level {
            log::set_max_level(level.as_level_filter());
            info!("Log level set to {level:?}");
        }
        Ok(())
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn status_of(pipeline: &Pipeline) -> Status {
    let running = pipeline.is_running();
    Status {
        running,
        variant: running.then(|| pipeline.variant()),
    }
}
