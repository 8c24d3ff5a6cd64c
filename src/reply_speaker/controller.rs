//! Session controller: the façade that turns a growing reply into speech.
//!
//! [`SpeechController`] owns the segmenter, scheduler and playback engine and
//! is driven from a single task. Synthesis completions and playback finishes
//! arrive as [`SpeechEvent`]s on its own channel, so every state mutation
//! happens in one place and needs no locking. Callers outside that task talk
//! to it through a cloneable [`SpeechHandle`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::client::Synthesizer;
use super::event::{EventReceiver, SpeechEvent};
use super::playback::{AudioOutput, PlaybackEngine};
use super::scheduler::{OrderedScheduler, SchedulerSettings};
use super::segmenter::{Segment, Segmenter};
use crate::config::{clamp_speed, TTSConfig};
use crate::error::{ControlError, PlaybackError};

const COMMAND_BUFFER: usize = 64;

/// Composite status reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SpeechStatus {
    pub is_streaming: bool,
    pub is_playing: bool,
    pub is_paused: bool,
    pub output_available: bool,
}

/// Identifies one reply. Text for a superseded session is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for SessionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type StatusCallback = Box<dyn Fn(SpeechStatus) + Send + Sync>;

/// User-facing settings, as reported by the control API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechSettings {
    pub enabled: bool,
    pub voice: Option<String>,
    pub speed: f32,
}

pub struct SpeechController {
    segmenter: Segmenter,
    scheduler: OrderedScheduler,
    playback: PlaybackEngine,
    events: EventReceiver,

    enabled: bool,
    voice: Option<String>,
    speed: f32,

    session: Option<SessionId>,
    next_session: u64,
    streaming: bool,

    observers: Vec<(SubscriptionId, StatusCallback)>,
    next_subscription: u64,
    last_status: SpeechStatus,
}

impl SpeechController {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        output: Result<Box<dyn AudioOutput>, PlaybackError>,
        config: &TTSConfig,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let scheduler = OrderedScheduler::new(synthesizer, SchedulerSettings::from(config), tx.clone());
        let playback = PlaybackEngine::new(output, tx);
        let last_status = SpeechStatus {
            output_available: playback.output_available(),
            ..SpeechStatus::default()
        };

        Self {
            segmenter: Segmenter::new(),
            scheduler,
            playback,
            events,
            enabled: config.enabled,
            voice: config.voice.clone(),
            speed: clamp_speed(config.speed),
            session: None,
            next_session: 0,
            streaming: false,
            observers: Vec::new(),
            next_subscription: 0,
            last_status,
        }
    }

    // --- Settings ---

    /// Blank clears the voice, which disables speech until a new one is set.
    pub fn set_voice(&mut self, voice: &str) {
        let voice = voice.trim();
        if voice.is_empty() {
            info!("Voice cleared");
            self.voice = None;
        } else {
            info!("Voice set to {voice}");
            self.voice = Some(voice.to_string());
        }
    }

    /// Applies to segments submitted from now on.
    pub fn set_speed(&mut self, speed: f32) {
        self.speed = clamp_speed(speed);
        info!("Speech speed set to {:.2}", self.speed);
    }

    pub fn enable(&mut self) {
        if !self.enabled {
            info!("Speech enabled");
        }
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        if self.enabled {
            info!("Speech disabled");
        }
        self.enabled = false;
        self.cancel_session();
    }

    pub fn settings(&self) -> SpeechSettings {
        SpeechSettings {
            enabled: self.enabled,
            voice: self.voice.clone(),
            speed: self.speed,
        }
    }

    // --- Observers ---

    pub fn on_status_change(&mut self, callback: StatusCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, callback));
        id
    }

    pub fn remove_observer(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sub, _)| *sub != id);
        self.observers.len() != before
    }

    pub fn status(&self) -> SpeechStatus {
        SpeechStatus {
            is_streaming: self.streaming,
            is_playing: self.playback.is_playing(),
            is_paused: self.playback.is_paused(),
            output_available: self.playback.output_available(),
        }
    }

    // --- Sessions ---

    /// Begin a new reply, superseding any current one.
    ///
    /// Returns `None` without touching any state when speech is disabled or
    /// no voice is configured.
    pub fn start_session(&mut self, initial_text: &str) -> Option<SessionId> {
        if !self.can_speak() {
            debug!("Speech inactive, not starting a session");
            return None;
        }

        self.cancel_session();
        let id = SessionId(self.next_session);
        self.next_session += 1;
        self.session = Some(id);
        self.streaming = true;
        info!("Speech session {} started", id.0);

        self.feed(initial_text);
        self.emit_status();
        Some(id)
    }

    pub fn add_text(&mut self, session: SessionId, delta: &str) {
        if !self.can_speak() || !self.is_current(session) {
            debug!("Ignoring text for inactive session {}", session.0);
            return;
        }
        self.feed(delta);
    }

    /// Flush trailing text as the last segment. Repeated calls do nothing.
    pub fn finish_session(&mut self, session: SessionId) {
        if !self.is_current(session) {
            debug!("Ignoring finish for inactive session {}", session.0);
            return;
        }
        if let Some(segment) = self.segmenter.finalize() {
            self.submit(segment);
        }
        self.streaming = false;
        info!("Speech session {} finished streaming", session.0);
        self.emit_status();
    }

    /// Drop everything for the current reply: text, pending synthesis and audio.
    pub fn cancel_session(&mut self) {
        if let Some(id) = self.session.take() {
            info!("Speech session {} cancelled", id.0);
        }
        self.scheduler.reset();
        self.playback.stop();
        self.segmenter.reset();
        self.streaming = false;
        self.emit_status();
    }

    pub fn pause(&mut self) {
        self.playback.pause();
        self.emit_status();
    }

    pub fn resume(&mut self) {
        self.playback.resume();
        self.emit_status();
    }

    pub fn stop(&mut self) {
        self.cancel_session();
    }

    /// Nothing streaming, synthesizing, playing or queued.
    pub fn is_idle(&self) -> bool {
        !self.streaming
            && self.scheduler.is_empty()
            && !self.playback.is_playing()
            && self.playback.queued() == 0
    }

    // --- Event loop ---

    pub async fn next_event(&mut self) -> Option<SpeechEvent> {
        self.events.recv().await
    }

    pub fn handle_event(&mut self, event: SpeechEvent) {
        match event {
            SpeechEvent::Synthesized(outcome) => {
                for audio in self.scheduler.on_outcome(outcome) {
                    self.playback.enqueue(audio);
                }
            }
            SpeechEvent::PlaybackFinished { token } => self.playback.on_finished(token),
        }
        self.emit_status();
    }

    /// Serve `commands` until every handle is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SpeechCommand>) {
        info!("Speech controller running");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
                Some(event) = self.events.recv() => self.handle_event(event),
            }
        }
        self.cancel_session();
        info!("Speech controller stopped");
    }

    /// Move the controller onto its own task.
    pub fn spawn(self) -> SpeechHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(self.run(rx));
        SpeechHandle { tx }
    }

    fn apply(&mut self, command: SpeechCommand) {
        match command {
            SpeechCommand::SetVoice(voice) => self.set_voice(&voice),
            SpeechCommand::SetSpeed(speed) => self.set_speed(speed),
            SpeechCommand::Enable => self.enable(),
            SpeechCommand::Disable => self.disable(),
            SpeechCommand::StartSession { text, reply } => {
                let _ = reply.send(self.start_session(&text));
            }
            SpeechCommand::AddText { session, delta } => self.add_text(session, &delta),
            SpeechCommand::FinishSession { session } => self.finish_session(session),
            SpeechCommand::CancelSession => self.cancel_session(),
            SpeechCommand::Pause => self.pause(),
            SpeechCommand::Resume => self.resume(),
            SpeechCommand::Stop => self.stop(),
            SpeechCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            SpeechCommand::Settings { reply } => {
                let _ = reply.send(self.settings());
            }
            SpeechCommand::IsIdle { reply } => {
                let _ = reply.send(self.is_idle());
            }
            SpeechCommand::Subscribe { callback, reply } => {
                let _ = reply.send(self.on_status_change(callback));
            }
            SpeechCommand::Unsubscribe(id) => {
                self.remove_observer(id);
            }
        }
    }

    fn can_speak(&self) -> bool {
        self.enabled && self.voice.is_some()
    }

    fn is_current(&self, session: SessionId) -> bool {
        self.streaming && self.session == Some(session)
    }

    fn feed(&mut self, text: &str) {
        for segment in self.segmenter.push(text) {
            self.submit(segment);
        }
    }

    fn submit(&mut self, segment: Segment) {
        let Some(voice) = self.voice.as_deref() else {
            return;
        };
        self.scheduler.submit(segment, voice, self.speed);
    }

    fn emit_status(&mut self) {
        let status = self.status();
        if status == self.last_status {
            return;
        }
        self.last_status = status;
        for (_, callback) in &self.observers {
            callback(status);
        }
    }
}

/// Requests accepted by a running controller.
pub enum SpeechCommand {
    SetVoice(String),
    SetSpeed(f32),
    Enable,
    Disable,
    StartSession {
        text: String,
        reply: oneshot::Sender<Option<SessionId>>,
    },
    AddText {
        session: SessionId,
        delta: String,
    },
    FinishSession {
        session: SessionId,
    },
    CancelSession,
    Pause,
    Resume,
    Stop,
    Status {
        reply: oneshot::Sender<SpeechStatus>,
    },
    Settings {
        reply: oneshot::Sender<SpeechSettings>,
    },
    IsIdle {
        reply: oneshot::Sender<bool>,
    },
    Subscribe {
        callback: StatusCallback,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe(SubscriptionId),
}

/// Cloneable async handle to a spawned [`SpeechController`].
#[derive(Clone)]
pub struct SpeechHandle {
    tx: mpsc::Sender<SpeechCommand>,
}

impl SpeechHandle {
    async fn send(&self, command: SpeechCommand) -> Result<(), ControlError> {
        self.tx.send(command).await.map_err(|_| ControlError::Closed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SpeechCommand,
    ) -> Result<T, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).await?;
        rx.await.map_err(|_| ControlError::Closed)
    }

    pub async fn set_voice(&self, voice: impl Into<String>) -> Result<(), ControlError> {
        self.send(SpeechCommand::SetVoice(voice.into())).await
    }

    pub async fn set_speed(&self, speed: f32) -> Result<(), ControlError> {
        self.send(SpeechCommand::SetSpeed(speed)).await
    }

    pub async fn enable(&self) -> Result<(), ControlError> {
        self.send(SpeechCommand::Enable).await
    }

    pub async fn disable(&self) -> Result<(), ControlError> {
        self.send(SpeechCommand::Disable).await
    }

    pub async fn start_session(&self, text: impl Into<String>) -> Result<Option<SessionId>, ControlError> {
        let text = text.into();
        self.request(|reply| SpeechCommand::StartSession { text, reply }).await
    }

    pub async fn add_text(&self, session: SessionId, delta: impl Into<String>) -> Result<(), ControlError> {
        self.send(SpeechCommand::AddText {
            session,
            delta: delta.into(),
        })
        .await
    }

    pub async fn finish_session(&self, session: SessionId) -> Result<(), ControlError> {
        self.send(SpeechCommand::FinishSession { session }).await
    }

    pub async fn cancel_session(&self) -> Result<(), ControlError> {
        self.send(SpeechCommand::CancelSession).await
    }

    pub async fn pause(&self) -> Result<(), ControlError> {
        self.send(SpeechCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<(), ControlError> {
        self.send(SpeechCommand::Resume).await
    }

    pub async fn stop(&self) -> Result<(), ControlError> {
        self.send(SpeechCommand::Stop).await
    }

    pub async fn status(&self) -> Result<SpeechStatus, ControlError> {
        self.request(|reply| SpeechCommand::Status { reply }).await
    }

    pub async fn settings(&self) -> Result<SpeechSettings, ControlError> {
        self.request(|reply| SpeechCommand::Settings { reply }).await
    }

    /// Whether the reply has been fully spoken (or dropped).
    pub async fn is_idle(&self) -> Result<bool, ControlError> {
        self.request(|reply| SpeechCommand::IsIdle { reply }).await
    }

    pub async fn on_status_change(&self, callback: StatusCallback) -> Result<SubscriptionId, ControlError> {
        self.request(|reply| SpeechCommand::Subscribe { callback, reply }).await
    }

    pub async fn remove_observer(&self, id: SubscriptionId) -> Result<(), ControlError> {
        self.send(SpeechCommand::Unsubscribe(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{PlaybackLog, RecordingOutput, ScriptedSynthesizer};
    use std::sync::Mutex;
    use std::time::Duration;

    const PLAY_TIME: Duration = Duration::from_millis(100);

    fn config() -> TTSConfig {
        TTSConfig {
            voice: Some("qiniu_zh_female_wwxkjx".into()),
            ..TTSConfig::default()
        }
    }

    fn controller_with(
        synth: ScriptedSynthesizer,
        config: &TTSConfig,
    ) -> (SpeechController, Arc<ScriptedSynthesizer>, PlaybackLog) {
        let synth = Arc::new(synth);
        let (output, log) = RecordingOutput::auto(PLAY_TIME);
        let controller = SpeechController::new(synth.clone(), Ok(Box::new(output)), config);
        (controller, synth, log)
    }

    fn controller(synth: ScriptedSynthesizer) -> (SpeechController, Arc<ScriptedSynthesizer>, PlaybackLog) {
        controller_with(synth, &config())
    }

    /// Process events until nothing is left to synthesize or play.
    async fn settle(controller: &mut SpeechController) {
        while !controller.is_idle() {
            match controller.next_event().await {
                Some(event) => controller.handle_event(event),
                None => break,
            }
        }
    }

    /// Process events until `done` holds.
    async fn run_until(controller: &mut SpeechController, done: impl Fn(&SpeechController) -> bool) {
        while !done(controller) {
            match controller.next_event().await {
                Some(event) => controller.handle_event(event),
                None => break,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn incremental_reply_plays_in_order() {
        let synth = ScriptedSynthesizer::new()
            .audio("Hello.", 0, 300)
            .audio("World?", 1, 20)
            .audio("Really!", 2, 150);
        let (mut controller, synth, log) = controller(synth);

        let session = controller.start_session("").unwrap();
        for ch in "Hello. World? Really!".chars() {
            controller.add_text(session, &ch.to_string());
        }
        controller.finish_session(session);
        settle(&mut controller).await;

        assert_eq!(log.played(), vec![0, 1, 2]);
        assert_eq!(log.overlaps(), 0);
        let texts: Vec<String> = synth.calls().into_iter().map(|c| c.text).collect();
        assert_eq!(texts, vec!["Hello.", "World?", "Really!"]);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_text_is_segmented() {
        let synth = ScriptedSynthesizer::new().audio("你好。", 0, 10).audio("再见", 1, 10);
        let (mut controller, _synth, log) = controller(synth);

        let session = controller.start_session("你好。再见").unwrap();
        controller.finish_session(session);
        settle(&mut controller).await;

        assert_eq!(log.played(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn finishing_twice_adds_nothing() {
        let synth = ScriptedSynthesizer::new().audio("Tail", 0, 10);
        let (mut controller, synth, log) = controller(synth);

        let session = controller.start_session("Tail").unwrap();
        controller.finish_session(session);
        controller.finish_session(session);
        settle(&mut controller).await;
        controller.finish_session(session);

        assert_eq!(synth.calls().len(), 1);
        assert_eq!(log.played(), vec![0]);
        assert!(controller.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_session_results_never_play() {
        let synth = ScriptedSynthesizer::new()
            .audio("Old news.", 7, 500)
            .audio("Fresh.", 8, 100);
        let (mut controller, _synth, log) = controller(synth);

        let a = controller.start_session("Old news. Still").unwrap();
        assert_eq!(controller.scheduler.in_flight(), 1);
        controller.cancel_session();
        let b = controller.start_session("Fresh.").unwrap();
        assert_ne!(a, b);
        controller.finish_session(b);
        settle(&mut controller).await;

        // Let the abandoned call's deadline pass too.
        tokio::time::sleep(Duration::from_secs(1)).await;
        while let Ok(event) = controller.events.try_recv() {
            controller.handle_event(event);
        }
        assert_eq!(log.played(), vec![8]);
    }

    #[tokio::test(start_paused = true)]
    async fn new_session_barges_in_on_old_audio() {
        let synth = ScriptedSynthesizer::new()
            .audio("First.", 1, 10)
            .audio("Second.", 2, 10)
            .audio("Other.", 3, 10);
        let (mut controller, _synth, log) = controller(synth);

        let a = controller.start_session("First. Second. And").unwrap();
        run_until(&mut controller, |c| c.status().is_playing).await;

        let b = controller.start_session("Other.").unwrap();
        assert!(log.halts() >= 1);
        // Text for the superseded reply goes nowhere.
        controller.add_text(a, "Late. ");
        controller.finish_session(b);
        settle(&mut controller).await;

        assert_eq!(log.played(), vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_segment_is_skipped_and_rest_plays() {
        let synth = ScriptedSynthesizer::new()
            .audio("One.", 0, 30)
            .fail("Two.", 10)
            .audio("Three.", 2, 20);
        let (mut controller, _synth, log) = controller(synth);

        let session = controller.start_session("One. Two. Three.").unwrap();
        controller.finish_session(session);
        settle(&mut controller).await;

        assert_eq!(log.played(), vec![0, 2]);
        assert_eq!(log.played().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_play_nothing_twice() {
        let synth = ScriptedSynthesizer::new()
            .audio("A.", 0, 5)
            .audio("B.", 1, 5)
            .audio("C.", 2, 5);
        let (mut controller, _synth, log) = controller(synth);

        let session = controller.start_session("A. B. C.").unwrap();
        controller.finish_session(session);
        run_until(&mut controller, |_| log.played().len() == 2).await;

        controller.pause();
        assert!(controller.status().is_paused);
        assert!(!controller.status().is_playing);

        // Nothing advances while paused.
        tokio::time::sleep(PLAY_TIME * 3).await;
        while let Ok(event) = controller.events.try_recv() {
            controller.handle_event(event);
        }
        assert_eq!(log.played(), vec![0, 1]);

        controller.resume();
        settle(&mut controller).await;

        assert_eq!(log.played(), vec![0, 1, 2]);
        assert!(!controller.status().is_paused);
    }

    #[tokio::test(start_paused = true)]
    async fn no_voice_makes_sessions_no_ops() {
        let synth = ScriptedSynthesizer::new().audio("Fresh.", 1, 10);
        let (mut controller, synth, log) = controller_with(synth, &TTSConfig::default());

        assert_eq!(controller.start_session("Stale text without an end"), None);
        controller.add_text(SessionId(0), " more stale text.");
        assert!(!controller.status().is_streaming);

        controller.set_voice("qiniu_zh_male_ljfdxz");
        let session = controller.start_session("Fresh.").unwrap();
        controller.finish_session(session);
        settle(&mut controller).await;

        let calls = synth.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].text, "Fresh.");
        assert_eq!(calls[0].voice_type, "qiniu_zh_male_ljfdxz");
        assert_eq!(log.played(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn disable_cancels_and_blocks_new_sessions() {
        let synth = ScriptedSynthesizer::new().audio("Hi.", 0, 10).audio("Back.", 1, 10);
        let (mut controller, synth, log) = controller(synth);

        let session = controller.start_session("Hi").unwrap();
        controller.disable();
        assert!(!controller.status().is_streaming);
        controller.add_text(session, ".");
        controller.finish_session(session);
        assert_eq!(controller.start_session("Hi."), None);
        assert!(synth.calls().is_empty());

        controller.enable();
        let session = controller.start_session("Back.").unwrap();
        controller.finish_session(session);
        settle(&mut controller).await;
        assert_eq!(log.played(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn speed_is_clamped_into_range() {
        let synth = ScriptedSynthesizer::new().audio("Quick.", 0, 1);
        let (mut controller, synth, _log) = controller(synth);
        controller.set_speed(5.0);
        assert_eq!(controller.settings().speed, 2.0);

        let session = controller.start_session("Quick.").unwrap();
        controller.finish_session(session);
        settle(&mut controller).await;
        assert_eq!(synth.calls()[0].speed_ratio, 2.0);

        controller.set_speed(0.1);
        assert_eq!(controller.settings().speed, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn observers_see_transitions_until_removed() {
        let synth = ScriptedSynthesizer::new().audio("Hi.", 0, 10);
        let (mut controller, _synth, _log) = controller(synth);

        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&first);
        let id = controller.on_status_change(Box::new(move |s| sink.lock().unwrap().push(s)));
        let sink = Arc::clone(&second);
        controller.on_status_change(Box::new(move |s| sink.lock().unwrap().push(s)));

        let session = controller.start_session("Hi.").unwrap();
        assert!(controller.remove_observer(id));
        assert!(!controller.remove_observer(id));
        controller.finish_session(session);
        settle(&mut controller).await;

        let first = first.lock().unwrap().clone();
        assert_eq!(first.len(), 1);
        assert!(first[0].is_streaming);

        let second = second.lock().unwrap().clone();
        assert!(second.iter().any(|s| s.is_playing));
        assert!(second.windows(2).all(|w| w[0] != w[1]));
        let last = second.last().unwrap();
        assert!(!last.is_streaming && !last.is_playing && !last.is_paused);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_device_is_reported_in_status() {
        let synth = Arc::new(ScriptedSynthesizer::new().audio("Hi.", 0, 10));
        let mut controller = SpeechController::new(
            synth,
            Err(PlaybackError::DeviceUnavailable("no default output".into())),
            &config(),
        );
        assert!(!controller.status().output_available);

        let session = controller.start_session("Hi.").unwrap();
        controller.finish_session(session);
        settle(&mut controller).await;
        assert!(!controller.status().is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn handle_drives_a_spawned_controller() {
        let synth = ScriptedSynthesizer::new().audio("One.", 0, 10).audio("Two.", 1, 10);
        let (controller, _synth, log) = controller_with(synth, &TTSConfig::default());
        let handle = controller.spawn();

        assert_eq!(handle.start_session("One.").await.unwrap(), None);
        handle.set_voice("qiniu_zh_female_tmjxxy").await.unwrap();
        handle.set_speed(1.5).await.unwrap();

        let session = handle.start_session("One.").await.unwrap().unwrap();
        handle.add_text(session, " Two.").await.unwrap();
        handle.finish_session(session).await.unwrap();

        let mut status = handle.status().await.unwrap();
        for _ in 0..100 {
            if !status.is_streaming && !status.is_playing && log.played().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            status = handle.status().await.unwrap();
        }
        assert_eq!(log.played(), vec![0, 1]);

        let settings = handle.settings().await.unwrap();
        assert_eq!(settings.voice.as_deref(), Some("qiniu_zh_female_tmjxxy"));
        assert_eq!(settings.speed, 1.5);
    }

    #[tokio::test]
    async fn handle_reports_closed_controller() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = SpeechHandle { tx };
        assert!(matches!(handle.pause().await, Err(ControlError::Closed)));
        assert!(matches!(handle.status().await, Err(ControlError::Closed)));
    }
}
