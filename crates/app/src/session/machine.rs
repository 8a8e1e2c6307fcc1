use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use magic_link::{
    ASPECT_RATIOS, AgentLink, InboundEvent, LinkEvent, LinkSender, MediaBlob, OutboundMessage,
    encode, encode_pair,
};
use snafu::{ResultExt, ensure};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::context::{LocalImage, OperationContext};
use super::events::{EditRequest, UserAction};
use super::fetch::{DefaultImageFetcher, ImageFetcher};
use super::screen::{GeneratedImageResult, Phase, Screen};
use crate::error::{
    ActionNotAllowedSnafu, EncodingSnafu, InvalidEditRequestSnafu, NoImageSelectedSnafu,
    SessionError, SessionResult, TransportSnafu,
};
use crate::settings::ClientSettings;

/// Identifier for one top-level submission or edit.
///
/// The wire protocol carries no correlation ids, so this only tags log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "op-{}", self.0)
    }
}

#[derive(Clone)]
pub struct SessionOptions {
    pub generating_timeout: Option<Duration>,
    pub fetcher: Arc<dyn ImageFetcher>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            generating_timeout: None,
            fetcher: Arc::new(DefaultImageFetcher::new()),
        }
    }
}

impl SessionOptions {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            generating_timeout: settings.generating_timeout(),
            ..Self::default()
        }
    }

    pub fn with_generating_timeout(mut self, timeout: Duration) -> Self {
        self.generating_timeout = Some(timeout);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ImageFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }
}

/// The single live workflow: current screen, operation context and the agent link.
///
/// Every transition goes through `&mut self`, so user actions and agent events are
/// applied one at a time in arrival order.
pub struct Session {
    screen: Screen,
    context: OperationContext,
    sender: LinkSender,
    fetcher: Arc<dyn ImageFetcher>,
    generating_timeout: Option<Duration>,
    watchdog_deadline: Option<Instant>,
    subscribers: Vec<mpsc::UnboundedSender<Screen>>,
    next_operation_id: u64,
    active_operation: Option<OperationId>,
}

impl Session {
    pub fn new(sender: LinkSender, options: SessionOptions) -> Self {
        Self {
            screen: Screen::home(),
            context: OperationContext::default(),
            sender,
            fetcher: options.fetcher,
            generating_timeout: options.generating_timeout,
            watchdog_deadline: None,
            subscribers: Vec::new(),
            next_operation_id: 1,
            active_operation: None,
        }
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn context(&self) -> &OperationContext {
        &self.context
    }

    pub fn active_operation(&self) -> Option<OperationId> {
        self.active_operation
    }

    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.watchdog_deadline
    }

    pub fn uploaded_images(&self) -> &[LocalImage] {
        match &self.screen {
            Screen::Home { uploaded_images } => uploaded_images.as_slice(),
            _ => &[],
        }
    }

    /// Receives a snapshot after every screen change and every thought append.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Screen> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub async fn dispatch(&mut self, action: UserAction) -> SessionResult<()> {
        match action {
            UserAction::SubmitVoice { audio } => self.submit_voice(audio).await,
            UserAction::SubmitText { text } => self.submit_text(text),
            UserAction::SubmitImagePrompt { prompt, images } => {
                self.submit_image_prompt(prompt, images).await
            }
            UserAction::SubmitVoiceWithImage { audio, images } => {
                self.submit_voice_with_image(audio, images).await
            }
            UserAction::SubmitEdit(request) => self.submit_edit(request).await,
            UserAction::UploadImages(images) => self.upload_images(images),
            UserAction::RemoveImage(index) => self.remove_image(index),
            UserAction::OpenPromptIdeas => self.open_prompt_ideas(),
            UserAction::Reset => {
                self.reset();
                Ok(())
            }
        }
    }

    pub async fn submit_voice(&mut self, audio: MediaBlob) -> SessionResult<()> {
        self.require(self.screen.accepts_submission(), "submit_voice")?;

        let operation = self.begin_operation(OperationContext::default());
        tracing::info!(%operation, mime = %audio.mime, "submitting voice prompt");

        let outcome = match encode(&audio).await.context(EncodingSnafu {
            stage: "encode-voice-audio",
        }) {
            Ok(audio_data) => self.send_outbound(OutboundMessage::Transcribe { audio_data }),
            Err(error) => Err(error),
        };
        self.settle(outcome)
    }

    pub fn submit_text(&mut self, text: impl Into<String>) -> SessionResult<()> {
        self.require(self.screen.accepts_submission(), "submit_text")?;

        let text = text.into();
        let operation = self.begin_operation(OperationContext::for_prompt(text.clone()));
        tracing::info!(%operation, prompt_len = text.len(), "submitting text prompt");

        let outcome = self.send_outbound(OutboundMessage::EnhancePrompt {
            original_prompt: text,
        });
        self.settle(outcome)
    }

    /// Edits the first of `images` according to `prompt`.
    pub async fn submit_image_prompt(
        &mut self,
        prompt: impl Into<String>,
        images: Vec<LocalImage>,
    ) -> SessionResult<()> {
        self.require(self.screen.accepts_submission(), "submit_image_prompt")?;
        let Some(image) = images.into_iter().next() else {
            return NoImageSelectedSnafu {
                stage: "submit-image-prompt",
            }
            .fail();
        };

        let prompt = prompt.into();
        let operation = self.begin_operation(OperationContext::for_image(
            Some(prompt.clone()),
            image.reference.clone(),
        ));
        tracing::info!(%operation, image = %image.reference, "submitting image with prompt");

        let outcome = match encode(&image.blob).await.context(EncodingSnafu {
            stage: "encode-base-image",
        }) {
            Ok(base_image) => self.send_outbound(OutboundMessage::EditImage {
                prompt: Some(prompt),
                audio_data: None,
                base_image,
                additional_images: Vec::new(),
            }),
            Err(error) => Err(error),
        };
        self.settle(outcome)
    }

    /// Edits the first of `images` according to a spoken instruction.
    pub async fn submit_voice_with_image(
        &mut self,
        audio: MediaBlob,
        images: Vec<LocalImage>,
    ) -> SessionResult<()> {
        let on_home = matches!(self.screen, Screen::Home { .. });
        self.require(on_home, "submit_voice_with_image")?;
        let Some(image) = images.into_iter().next() else {
            return NoImageSelectedSnafu {
                stage: "submit-voice-with-image",
            }
            .fail();
        };

        let operation =
            self.begin_operation(OperationContext::for_image(None, image.reference.clone()));
        tracing::info!(%operation, image = %image.reference, "submitting image with voice");

        // Both payloads must exist before anything goes out.
        let outcome = match encode_pair(&audio, &image.blob)
            .await
            .context(EncodingSnafu {
                stage: "encode-voice-and-image",
            }) {
            Ok((audio_data, base_image)) => self.send_outbound(OutboundMessage::EditImage {
                prompt: None,
                audio_data: Some(audio_data),
                base_image,
                additional_images: Vec::new(),
            }),
            Err(error) => Err(error),
        };
        self.settle(outcome)
    }

    /// Edits the image on the Display screen.
    ///
    /// Audio takes precedence over text; extra images ride along either way. A request
    /// with none of the three fails locally without contacting the agent.
    pub async fn submit_edit(&mut self, request: EditRequest) -> SessionResult<()> {
        let Screen::Display(shown) = &self.screen else {
            return self.require(false, "submit_edit");
        };
        let shown = shown.clone();

        if request.is_empty() {
            let error = InvalidEditRequestSnafu {
                stage: "validate-edit-request",
            }
            .build();
            self.fail(&error);
            return Err(error);
        }

        let operation = self.begin_operation(OperationContext::continue_from(&shown));
        tracing::info!(
            %operation,
            has_audio = request.audio.is_some(),
            has_text = request.text().is_some(),
            extra_images = request.images.len(),
            "submitting edit of displayed image"
        );

        let outcome = self.send_edit(&shown, &request).await;
        self.settle(outcome)
    }

    pub fn upload_images(&mut self, images: Vec<LocalImage>) -> SessionResult<()> {
        let on_home = matches!(self.screen, Screen::Home { .. });
        self.require(on_home, "upload_images")?;

        if let Screen::Home { uploaded_images } = &mut self.screen {
            let dropped = uploaded_images.extend(images);
            if dropped > 0 {
                tracing::warn!(dropped, kept = uploaded_images.len(), "upload limit reached");
            }
        }
        self.notify();
        Ok(())
    }

    /// Out-of-range indices are a no-op.
    pub fn remove_image(&mut self, index: usize) -> SessionResult<()> {
        let on_home = matches!(self.screen, Screen::Home { .. });
        self.require(on_home, "remove_image")?;

        let removed = match &mut self.screen {
            Screen::Home { uploaded_images } => uploaded_images.remove(index),
            _ => None,
        };
        match removed {
            Some(image) => {
                tracing::debug!(index, image = %image.reference, "removed uploaded image");
                self.notify();
            }
            None => tracing::debug!(index, "ignoring removal of missing image"),
        }
        Ok(())
    }

    pub fn open_prompt_ideas(&mut self) -> SessionResult<()> {
        self.require(self.screen.accepts_submission(), "open_prompt_ideas")?;
        self.set_screen(Screen::PromptIdeas);
        Ok(())
    }

    /// Returns to an empty Home screen from anywhere.
    pub fn reset(&mut self) {
        if let Some(operation) = self.active_operation.take() {
            tracing::info!(%operation, "abandoning operation on reset");
        }
        self.context = OperationContext::default();
        self.set_screen(Screen::home());
    }

    pub fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Ready => tracing::info!("agent link ready"),
            LinkEvent::Inbound(event) => self.handle_inbound(event),
            LinkEvent::Closed => self.fail(&SessionError::LinkDropped {
                stage: "link-closed",
                message: "agent closed the connection".to_string(),
            }),
            LinkEvent::Failed(message) => self.fail(&SessionError::LinkDropped {
                stage: "link-failed",
                message,
            }),
        }
    }

    /// Applies one agent event against the current context.
    ///
    /// Events that arrive outside `Generating` are stale and only logged.
    pub fn handle_inbound(&mut self, event: InboundEvent) {
        let Some(phase) = self.screen.phase() else {
            tracing::warn!(
                kind = event.kind(),
                screen = self.screen.name(),
                "ignoring agent event outside of generation"
            );
            return;
        };
        let operation = self.active_operation.unwrap_or(OperationId(0));

        match event {
            InboundEvent::TranscriptionComplete { transcribed_text } => {
                tracing::info!(%operation, "transcription complete; requesting enhancement");
                self.context.record_transcription(transcribed_text.clone());
                self.arm_watchdog();
                let outcome = self.send_outbound(OutboundMessage::EnhancePrompt {
                    original_prompt: transcribed_text,
                });
                if let Err(error) = outcome {
                    self.fail(&error);
                }
            }
            InboundEvent::PromptEnhanced {
                magic_prompt,
                aspect_ratio,
            } => {
                if !ASPECT_RATIOS.contains(&aspect_ratio.as_str()) {
                    tracing::warn!(%operation, %aspect_ratio, "agent chose an unexpected aspect ratio");
                }
                tracing::info!(%operation, %aspect_ratio, "prompt enhanced; requesting image");
                self.context.record_magic_prompt(magic_prompt.clone());
                let outcome = self.send_outbound(OutboundMessage::GenerateImage {
                    prompt: magic_prompt,
                    aspect_ratio,
                });
                match outcome {
                    Ok(()) => self.set_screen(Screen::generating(Phase::Image)),
                    Err(error) => self.fail(&error),
                }
            }
            InboundEvent::ThoughtUpdate { chunk } => {
                if phase != Phase::Enhance {
                    tracing::debug!(%operation, "dropping thought chunk outside enhancement");
                    return;
                }
                if let Screen::Generating { thought, .. } = &mut self.screen {
                    thought.push_str(&chunk);
                }
                self.arm_watchdog();
                self.notify();
            }
            InboundEvent::ImageGenerated { image_data } => {
                let result = self.context.generated_result(image_data);
                self.complete(operation, result);
            }
            InboundEvent::ImageEdited { image_data } => {
                let result = self.context.edited_result(image_data);
                self.complete(operation, result);
            }
        }
    }

    /// Fails a generation that has waited past its deadline.
    pub fn expire_watchdog(&mut self) {
        self.watchdog_deadline = None;
        let Some(timeout) = self.generating_timeout else {
            return;
        };
        if !self.screen.is_generating() {
            return;
        }

        self.fail(&SessionError::WatchdogExpired {
            stage: "generating-watchdog",
            timeout,
        });
    }

    /// Serializes user actions and agent events onto one loop until the action
    /// channel closes, then disconnects the link.
    pub async fn run(
        mut self,
        mut link: AgentLink,
        mut actions: mpsc::UnboundedReceiver<UserAction>,
    ) -> Self {
        let mut link_open = true;

        loop {
            let deadline = self.watchdog_deadline;
            tokio::select! {
                event = link.recv(), if link_open => match event {
                    Some(event) => self.handle_link_event(event),
                    None => {
                        tracing::debug!("agent link event stream ended");
                        link_open = false;
                    }
                },
                action = actions.recv() => {
                    let Some(action) = action else {
                        break;
                    };
                    let name = action.name();
                    if let Err(error) = self.dispatch(action).await {
                        tracing::warn!(action = name, error = %error, "user action failed");
                    }
                }
                _ = sleep_until(deadline) => self.expire_watchdog(),
            }
        }

        link.disconnect();
        self
    }

    async fn send_edit(
        &mut self,
        shown: &GeneratedImageResult,
        request: &EditRequest,
    ) -> SessionResult<()> {
        let base = self.fetcher.fetch(&shown.image_url).await?;

        let (base_image, audio_data) = match &request.audio {
            Some(audio) => {
                let (base_image, audio_data) =
                    encode_pair(&base, audio).await.context(EncodingSnafu {
                        stage: "encode-edit-base-and-audio",
                    })?;
                (base_image, Some(audio_data))
            }
            None => {
                let base_image = encode(&base).await.context(EncodingSnafu {
                    stage: "encode-edit-base",
                })?;
                (base_image, None)
            }
        };

        let additional_images = try_join_all(request.images.iter().map(|image| encode(&image.blob)))
            .await
            .context(EncodingSnafu {
                stage: "encode-edit-extra-images",
            })?;

        let prompt = match audio_data {
            Some(_) => None,
            None => request.text().map(str::to_string),
        };

        self.send_outbound(OutboundMessage::EditImage {
            prompt,
            audio_data,
            base_image,
            additional_images,
        })
    }

    fn send_outbound(&mut self, message: OutboundMessage) -> SessionResult<()> {
        let action = message.action();
        self.sender.send(message).context(TransportSnafu {
            stage: "send-outbound-message",
        })?;
        tracing::debug!(action, operation = ?self.active_operation, "sent request to agent");
        Ok(())
    }

    fn require(&self, allowed: bool, action: &'static str) -> SessionResult<()> {
        if !allowed {
            tracing::warn!(action, screen = self.screen.name(), "rejecting action on current screen");
        }
        ensure!(
            allowed,
            ActionNotAllowedSnafu {
                stage: "check-action-screen",
                action,
                screen: self.screen.name(),
            }
        );
        Ok(())
    }

    /// Replaces the context wholesale and enters the enhancement phase.
    fn begin_operation(&mut self, context: OperationContext) -> OperationId {
        let operation = OperationId(self.next_operation_id);
        self.next_operation_id += 1;

        if let Some(previous) = self.active_operation.replace(operation) {
            tracing::warn!(%previous, %operation, "starting operation while another is pending");
        }
        self.context = context;
        self.set_screen(Screen::generating(Phase::Enhance));
        operation
    }

    fn settle(&mut self, outcome: SessionResult<()>) -> SessionResult<()> {
        if let Err(error) = &outcome {
            self.fail(error);
        }
        outcome
    }

    fn complete(&mut self, operation: OperationId, result: GeneratedImageResult) {
        tracing::info!(
            %operation,
            edited = result.base_image_url.is_some(),
            "operation finished; displaying result"
        );
        self.active_operation = None;
        self.set_screen(Screen::Display(result));
    }

    fn fail(&mut self, error: &SessionError) {
        tracing::error!(
            operation = ?self.active_operation,
            kind = ?error.kind(),
            error = %error,
            "session failed"
        );
        self.active_operation = None;
        self.set_screen(Screen::Error {
            message: error.user_message(),
        });
    }

    fn arm_watchdog(&mut self) {
        self.watchdog_deadline = self
            .generating_timeout
            .map(|timeout| Instant::now() + timeout);
    }

    fn set_screen(&mut self, screen: Screen) {
        tracing::debug!(from = self.screen.name(), to = screen.name(), "screen transition");
        self.screen = screen;

        if self.screen.is_generating() {
            self.arm_watchdog();
        } else {
            self.watchdog_deadline = None;
        }
        self.notify();
    }

    fn notify(&mut self) {
        let snapshot = &self.screen;
        self.subscribers
            .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
