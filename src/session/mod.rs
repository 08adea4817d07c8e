pub mod events;
pub mod pipeline;
pub mod scheduler;
pub mod tools;

use std::sync::Arc;

use crate::audio::{AudioDevices, Microphone, OutputSink};
use crate::config::SessionConfig;
use crate::error::{LifelineError, Result};
use crate::net::protocol::{InboundMessage, Modality};
use crate::net::{Connector, OpenRequest, TransportHandle};

use self::events::{Envelope, EventSender, SessionEvent};
use self::pipeline::CapturePipeline;
use self::scheduler::PlaybackScheduler;
use self::tools::{EmergencyReport, ToolCallMediator, report_emergency_declaration};

/// Instruction the remote agent receives unless the config overrides it.
pub const DISPATCHER_INSTRUCTION: &str = "You are a calm emergency dispatcher. \
Ask the caller short, clear questions to find out what kind of emergency this is, \
what is happening and where, how many people are affected, and what they need most. \
Reassure the caller while you listen. As soon as you know the type of emergency and \
have a description, call reportEmergency with everything you have learned, then tell \
the caller the report was filed and read them the ticket number.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initializing,
    AwaitingMicrophone,
    Connecting,
    Live,
    Disconnected,
}

impl SessionState {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Initializing => "Initializing audio",
            Self::AwaitingMicrophone => "Requesting microphone",
            Self::Connecting => "Connecting",
            Self::Live => "Live",
            Self::Disconnected => "Disconnected",
        }
    }

    /// Whether a session currently owns (or is acquiring) resources.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Initializing | Self::AwaitingMicrophone | Self::Connecting | Self::Live
        )
    }
}

/// Notifications the host application receives from a session.
pub trait SessionObserver {
    fn on_status_change(&mut self, status: &str);

    /// RMS level of one captured frame, in [0, 1].
    fn on_audio_level(&mut self, level: f32);

    fn on_report_submitted(&mut self, report: &EmergencyReport);
}

/// What the remote agent is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            model: config.model.clone(),
            voice: config.voice.clone(),
            system_instruction: config
                .system_instruction
                .clone()
                .unwrap_or_else(|| DISPATCHER_INSTRUCTION.to_string()),
        }
    }

    #[must_use]
    pub fn open_request(&self) -> OpenRequest {
        OpenRequest {
            model: self.model.clone(),
            modality: Modality::Audio,
            voice: self.voice.clone(),
            system_instruction: self.system_instruction.clone(),
            tools: vec![report_emergency_declaration()],
        }
    }
}

/// Resources owned by one session. Each is taken exactly once on teardown.
#[derive(Default)]
struct ActiveSession {
    output: Option<Box<dyn OutputSink>>,
    microphone: Option<Box<dyn Microphone>>,
    transport: Option<Arc<dyn TransportHandle>>,
    capture: CapturePipeline,
    playback: PlaybackScheduler,
}

/// Owns the session lifecycle and routes events between the audio hardware,
/// the transport and the host application.
///
/// All methods run on one thread; events are handled strictly one at a time
/// in the order they were received.
pub struct SessionController {
    devices: Box<dyn AudioDevices>,
    connector: Box<dyn Connector>,
    observer: Box<dyn SessionObserver>,
    events: EventSender,
    settings: SessionSettings,
    state: SessionState,
    generation: u64,
    session: ActiveSession,
    mediator: ToolCallMediator,
}

impl SessionController {
    #[must_use]
    pub fn new(
        devices: Box<dyn AudioDevices>,
        connector: Box<dyn Connector>,
        observer: Box<dyn SessionObserver>,
        events: EventSender,
        settings: SessionSettings,
    ) -> Self {
        Self {
            devices,
            connector,
            observer,
            events,
            settings,
            state: SessionState::Idle,
            generation: 0,
            session: ActiveSession::default(),
            mediator: ToolCallMediator::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Generation of the most recent session; events stamped with any other
    /// generation are ignored.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Acquire audio hardware and start opening the transport.
    ///
    /// Returns once the open request is in flight; the session goes `Live`
    /// when the matching `ConnectionOpened` event is handled. On failure every
    /// resource acquired so far is released and the session ends
    /// `Disconnected`.
    pub fn connect(&mut self) -> Result<()> {
        if self.state.is_active() {
            return Err(LifelineError::SessionActive(self.state.label()));
        }

        self.generation += 1;
        self.session = ActiveSession::default();
        tracing::info!("starting session {}", self.generation);
        self.transition(SessionState::Initializing);

        if let Err(e) = self.acquire() {
            tracing::error!("session {} failed to start: {e}", self.generation);
            self.teardown(&format!("Error: {e}"));
            return Err(e);
        }
        Ok(())
    }

    fn acquire(&mut self) -> Result<()> {
        let events = self.events.for_generation(self.generation);

        let output = self.session.output.insert(self.devices.open_output()?);
        output.resume()?;
        self.session.playback = PlaybackScheduler::new(output.current_time());

        self.transition(SessionState::AwaitingMicrophone);
        let microphone = self
            .session
            .microphone
            .insert(self.devices.open_microphone()?);
        microphone.start(events.clone())?;

        self.transition(SessionState::Connecting);
        let transport = self.connector.open(self.settings.open_request(), events)?;
        self.session.transport = Some(transport);
        Ok(())
    }

    /// End the current session. Does nothing unless a session is active.
    pub fn stop(&mut self) {
        if !self.state.is_active() {
            tracing::debug!("stop ignored in state {:?}", self.state);
            return;
        }
        tracing::info!("stopping session {}", self.generation);
        self.teardown(SessionState::Disconnected.label());
    }

    /// React to one event from the hardware or transport.
    pub fn handle_event(&mut self, envelope: Envelope) {
        if envelope.generation != self.generation || !self.state.is_active() {
            tracing::debug!(
                "ignoring event from session {} (current {}, {:?})",
                envelope.generation,
                self.generation,
                self.state
            );
            return;
        }

        match envelope.event {
            SessionEvent::FrameCaptured(frame) => self.on_frame(&frame),
            SessionEvent::ConnectionOpened => self.on_opened(),
            SessionEvent::MessageReceived(message) => self.on_message(&message),
            SessionEvent::ConnectionClosed { reason } => {
                let status = reason.map_or_else(
                    || SessionState::Disconnected.label().to_string(),
                    |r| format!("Disconnected: {r}"),
                );
                tracing::info!("connection closed by peer");
                self.teardown(&status);
            }
            SessionEvent::ConnectionError(e) => {
                let e = LifelineError::Connection(e);
                tracing::error!("{e}");
                self.teardown(&format!("Error: {e}"));
            }
        }
    }

    fn on_frame(&mut self, frame: &[f32]) {
        let observer = &mut self.observer;
        if let Err(e) = self
            .session
            .capture
            .process_frame(frame, |level| observer.on_audio_level(level))
        {
            tracing::warn!("failed to send audio frame: {e}");
        }
    }

    fn on_opened(&mut self) {
        if self.state != SessionState::Connecting {
            return;
        }
        let Some(transport) = self.session.transport.as_ref() else {
            return;
        };
        self.session.capture.attach(Arc::clone(transport));
        self.transition(SessionState::Live);
    }

    fn on_message(&mut self, message: &InboundMessage) {
        if self.state != SessionState::Live {
            tracing::debug!("dropping message received while {:?}", self.state);
            return;
        }

        if let Some(data) = message.audio() {
            if let Some(output) = self.session.output.as_deref_mut() {
                self.session.playback.enqueue(data, output);
            }
        }

        let calls = message.tool_calls();
        if calls.is_empty() {
            return;
        }
        let observer = &mut self.observer;
        let Some(response) = self
            .mediator
            .handle(calls, |report| observer.on_report_submitted(report))
        else {
            return;
        };
        if let Some(transport) = &self.session.transport {
            if let Err(e) = transport.send_tool_response(response) {
                tracing::warn!("failed to send tool response: {e}");
            }
        }
    }

    fn transition(&mut self, state: SessionState) {
        tracing::debug!("session {}: {:?} -> {state:?}", self.generation, self.state);
        self.state = state;
        self.observer.on_status_change(state.label());
    }

    fn teardown(&mut self, status: &str) {
        let mut session = std::mem::take(&mut self.session);
        session.capture.detach();

        if let Some(mut microphone) = session.microphone.take() {
            microphone.stop();
        }
        if let Some(transport) = session.transport.take() {
            transport.close();
        }
        if let Some(mut output) = session.output.take() {
            output.close();
        }

        self.state = SessionState::Disconnected;
        tracing::info!("session {} ended: {status}", self.generation);
        self.observer.on_status_change(status);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}
