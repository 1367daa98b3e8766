//! Recording transports and scripted frame sources shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::color::{Color, ColorVector};
use crate::frame::Frame;
use crate::source::FrameSource;
use crate::transport::{Sent, Transport, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    TransportConnect(String),
    Sent(String, ColorVector),
    TransportDisconnect(String),
    SourceConnect(String),
    SourceDisconnect(String),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub(crate) fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    /// Color vectors sent, in order.
    pub(crate) fn sent(&self) -> Vec<ColorVector> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Sent(_, colors) => Some(colors),
                _ => None,
            })
            .collect()
    }
}

type SendHook = Box<dyn FnMut(usize) + Send>;

pub(crate) struct RecordingTransport {
    label: String,
    log: EventLog,
    pub(crate) fail_connect: bool,
    /// Zero-based index of a send that fails with an I/O error
    pub(crate) fail_send: Option<usize>,
    /// Called with the send index after each successful send
    pub(crate) on_send: Option<SendHook>,
    sends: usize,
}

impl RecordingTransport {
    pub(crate) fn new(label: impl Into<String>, log: EventLog) -> Self {
        Self {
            label: label.into(),
            log,
            fail_connect: false,
            fail_send: None,
            on_send: None,
            sends: 0,
        }
    }
}

impl Transport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        if self.fail_connect {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )));
        }
        self.log.push(Event::TransportConnect(self.label.clone()));
        Ok(())
    }

    fn send(&mut self, colors: &[Color]) -> Result<Sent, TransportError> {
        let index = self.sends;
        self.sends += 1;
        if self.fail_send == Some(index) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            )));
        }
        self.log
            .push(Event::Sent(self.label.clone(), colors.to_vec()));
        if let Some(hook) = &mut self.on_send {
            hook(index);
        }
        Ok(Sent::Written)
    }

    fn disconnect(&mut self) {
        self.log.push(Event::TransportDisconnect(self.label.clone()));
    }
}

/// Plays back a fixed list of frames, then repeats `fallback` forever.
pub(crate) struct ScriptedSource {
    label: String,
    log: EventLog,
    pub(crate) connect_ok: bool,
    pub(crate) script: VecDeque<Option<Frame>>,
    pub(crate) fallback: Option<Frame>,
}

impl ScriptedSource {
    pub(crate) fn new(label: impl Into<String>, log: EventLog) -> Self {
        Self {
            label: label.into(),
            log,
            connect_ok: true,
            script: VecDeque::new(),
            fallback: None,
        }
    }

    pub(crate) fn repeating(label: impl Into<String>, log: EventLog, frame: Frame) -> Self {
        Self {
            fallback: Some(frame),
            ..Self::new(label, log)
        }
    }
}

impl FrameSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn connect(&mut self) -> bool {
        if self.connect_ok {
            self.log.push(Event::SourceConnect(self.label.clone()));
        }
        self.connect_ok
    }

    fn disconnect(&mut self) {
        self.log.push(Event::SourceDisconnect(self.label.clone()));
    }

    fn get_frame(&mut self) -> Option<Frame> {
        match self.script.pop_front() {
            Some(frame) => frame,
            None => self.fallback.clone(),
        }
    }
}
