//! One running instance: a producer thread (sampler or rainbow generator) and
//! an emitter thread joined by a mailbox.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use atomic_enum::atomic_enum;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigStore};
use crate::emitter::{Emitter, LastSent};
use crate::mailbox::Mailbox;
use crate::rainbow::RainbowGenerator;
use crate::sampler::Sampler;
use crate::source::{source_from_config, FrameSource};
use crate::transport::{transport_from_config, Transport, TransportError};

/// Polls for the first published frame during startup
const FIRST_FRAME_ATTEMPTS: u32 = 10;
const FIRST_FRAME_POLL: Duration = Duration::from_millis(100);

#[atomic_enum]
#[derive(PartialEq, Eq)]
pub enum PipelineState {
    Stopped = 0,
    Starting,
    Running,
    Stopping,
}

/// What produces the colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Sample a camera (or other frame source)
    Camera,
    /// Generated dots, no frame source
    Rainbow,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Camera => f.write_str("camera"),
            Self::Rainbow => f.write_str("rainbow"),
        }
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "camera" => Ok(Self::Camera),
            "rainbow" => Ok(Self::Rainbow),
            other => Err(format!("unknown variant '{other}' (expected camera or rainbow)")),
        }
    }
}

#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum StartError {
    #[display("transport connect failed: {_0}")]
    Transport(TransportError),
    #[display("{_0} frame source failed to connect")]
    #[from(ignore)]
    Source(#[error(not(source))] &'static str),
    #[display("failed to spawn thread: {_0}")]
    Spawn(std::io::Error),
    #[display("no frame within {_0:?}")]
    #[from(ignore)]
    NoFrame(#[error(not(source))] Duration),
}

/// Creates the I/O ends of a pipeline.
pub trait Backends: Send + Sync {
    fn frame_source(&self, config: &Config) -> Box<dyn FrameSource>;

    fn transport(&self, config: &Config) -> Box<dyn Transport>;
}

/// Builds sources and transports from the `source` and `server` config sections.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredBackends;

impl Backends for ConfiguredBackends {
    fn frame_source(&self, config: &Config) -> Box<dyn FrameSource> {
        source_from_config(config)
    }

    fn transport(&self, config: &Config) -> Box<dyn Transport> {
        transport_from_config(&config.server)
    }
}

enum Producer {
    Camera(Sampler),
    Rainbow(RainbowGenerator),
}

pub struct Pipeline {
    variant: Variant,
    state: AtomicPipelineState,
    running: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
    emitter: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Connect both ends, spawn the loops and wait for the first frame.
    ///
    /// On error everything that was started is torn down again.
    pub fn start(
        variant: Variant,
        config: Arc<ConfigStore>,
        backends: &dyn Backends,
    ) -> Result<Self, StartError> {
        info!("Starting {variant} pipeline");
        let snapshot = config.snapshot();
        let mailbox = Arc::new(Mailbox::new());
        let last_sent = Arc::new(LastSent::new());

        let mut transport = backends.transport(&snapshot);
        transport.connect()?;

        let producer = match variant {
            Variant::Camera => {
                let mut sampler = Sampler::new(
                    backends.frame_source(&snapshot),
                    config.clone(),
                    mailbox.clone(),
                    last_sent.clone(),
                );
                if !sampler.connect() {
                    transport.disconnect();
                    return Err(StartError::Source(sampler.source_name()));
                }
                Producer::Camera(sampler)
            }
            Variant::Rainbow => Producer::Rainbow(RainbowGenerator::new(snapshot.led_count())),
        };

        // From here on dropping `pipeline` stops and joins whatever was spawned
        let mut pipeline = Self {
            variant,
            state: AtomicPipelineState::new(PipelineState::Starting),
            running: Arc::new(AtomicBool::new(true)),
            producer: None,
            emitter: None,
        };

        let mut emitter = Emitter::new(transport, config.clone(), mailbox.clone(), last_sent);
        let running = pipeline.running.clone();
        match thread::Builder::new()
            .name("emitter".to_string())
            .spawn(move || emitter.run(&running))
        {
            Ok(handle) => pipeline.emitter = Some(handle),
            Err(e) => return Err(e.into()),
        }

        let (first_tx, first_rx) = oneshot::channel();
        let running = pipeline.running.clone();
        let spawned = thread::Builder::new()
            .name(format!("{variant}-producer"))
            .spawn(move || match producer {
                Producer::Camera(mut sampler) => sampler.run(&running, Some(first_tx)),
                Producer::Rainbow(mut generator) => {
                    generator.run(&config, &mailbox, &running, Some(first_tx));
                }
            });
        match spawned {
            Ok(handle) => pipeline.producer = Some(handle),
            Err(e) => return Err(e.into()),
        }

        for attempt in 1..=FIRST_FRAME_ATTEMPTS {
            match first_rx.recv_timeout(FIRST_FRAME_POLL) {
                Ok(()) => {
                    pipeline.state.store(PipelineState::Running, Ordering::Release);
                    info!("{variant} pipeline running");
                    return Ok(pipeline);
                }
                Err(oneshot::RecvTimeoutError::Timeout) => {
                    debug!("Waiting for first frame ({attempt}/{FIRST_FRAME_ATTEMPTS})");
                }
                Err(oneshot::RecvTimeoutError::Disconnected) => {
                    warn!("Producer exited before delivering a frame");
                    break;
                }
            }
        }

        Err(StartError::NoFrame(FIRST_FRAME_POLL * FIRST_FRAME_ATTEMPTS))
    }

    #[must_use]
    pub fn variant(&self) -> Variant {
        self.variant
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state.load(Ordering::Acquire)
    }

    /// Running state, and both loops still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
            && [&self.producer, &self.emitter]
                .into_iter()
                .all(|handle| handle.as_ref().is_some_and(|h| !h.is_finished()))
    }

    /// Ask both loops to stop. Returns immediately; repeated calls are no-ops.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("Stopping {} pipeline", self.variant);
            self.state.store(PipelineState::Stopping, Ordering::Release);
        }
    }

    /// Wait for both loops to finish their teardown.
    pub fn join(&mut self) {
        for (name, handle) in [("producer", self.producer.take()), ("emitter", self.emitter.take())] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!("{} {name} thread panicked", self.variant);
                }
            }
        }
        if self.state() != PipelineState::Stopped {
            self.state.store(PipelineState::Stopped, Ordering::Release);
            info!("{} pipeline stopped", self.variant);
        }
    }

    fn abort(&mut self) {
        self.stop();
        self.join();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.abort();
    }
}
