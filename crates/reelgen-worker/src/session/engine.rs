//! Generation session state machine.
//!
//! Sessions live in memory, one per user. Every state change bumps the
//! slot's epoch and only succeeds against the epoch it was computed from, so
//! a cancel or a new trigger makes any in-flight adapter result stale. The
//! slot lock is never held across an await.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use reelgen_media::unique_path;
use reelgen_models::{
    find_style, BackgroundSelector, ContentProfile, GenerationId, GenerationRecord,
    GenerationStatus, GenerationUpdate, PlanTier, ProfileField, PurchaseKind, UserId,
    UserIdentity, VideoStyle, VoiceSelector, SUBSCRIPTION_PLANS, VIDEO_PACKS, VIDEO_STYLES,
};
use tracing::{debug, warn, Instrument};
use validator::Validate;

use super::events::{Choice, MenuOption, OutgoingMessage, UserEvent};
use super::state::{Draft, Selections, SessionState};
use super::transport::Transport;
use crate::composer::VideoComposer;
use crate::error::{WorkerError, WorkerResult};
use crate::ledger::{Consumption, EntitlementLedger};
use crate::logging::SessionLogger;
use crate::metrics::{record_generation, record_generation_duration};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::script::ScriptWriter;
use crate::speech::Narrator;
use crate::store::Store;

const WELCOME: &str = "Welcome to ReelGen! Send /generate to create a short video, \
/profile to describe your content, /status to see your plan and /buy for more videos.";
const ASK_IDEA: &str = "Describe your video idea in a sentence or two.";
const BUSY: &str = "Working on it, please wait.";

/// Filesystem and notification settings for the pipeline.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Narration audio is written here.
    pub work_dir: PathBuf,
    /// Finished videos are written here until delivered.
    pub output_dir: PathBuf,
    pub admin_ids: Vec<UserId>,
    /// Currency catalog prices are shown in.
    pub price_currency: String,
}

/// Collaborators the engine drives.
pub struct SessionDeps {
    pub store: Arc<dyn Store>,
    pub ledger: Arc<EntitlementLedger>,
    pub writer: Arc<dyn ScriptWriter>,
    pub narrator: Arc<dyn Narrator>,
    pub composer: Arc<dyn VideoComposer>,
    pub reconciler: Arc<Reconciler>,
    pub transport: Arc<dyn Transport>,
}

#[derive(Debug, Default)]
struct Slot {
    state: SessionState,
    epoch: u64,
}

pub struct SessionEngine {
    deps: SessionDeps,
    settings: SessionSettings,
    slots: Mutex<HashMap<UserId, Slot>>,
}

impl SessionEngine {
    pub fn new(deps: SessionDeps, settings: SessionSettings) -> Self {
        Self {
            deps,
            settings,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<UserId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state of a user's session.
    pub fn state(&self, user_id: UserId) -> SessionState {
        self.slots()
            .get(&user_id)
            .map(|slot| slot.state.clone())
            .unwrap_or_default()
    }

    fn snapshot(&self, user_id: UserId) -> (SessionState, u64) {
        self.slots()
            .get(&user_id)
            .map(|slot| (slot.state.clone(), slot.epoch))
            .unwrap_or_default()
    }

    /// Move to `next` if nothing changed since `seen`. Returns the new epoch.
    fn advance(&self, user_id: UserId, seen: u64, next: SessionState) -> Option<u64> {
        let mut slots = self.slots();
        let slot = slots.entry(user_id).or_default();
        if slot.epoch != seen {
            debug!(user_id = %user_id, state = slot.state.name(), "Discarding stale session update");
            return None;
        }
        slot.epoch += 1;
        slot.state = next;
        Some(slot.epoch)
    }

    /// Replace the session unconditionally.
    fn reset(&self, user_id: UserId, next: SessionState) -> u64 {
        let mut slots = self.slots();
        let slot = slots.entry(user_id).or_default();
        slot.epoch += 1;
        slot.state = next;
        slot.epoch
    }

    async fn say(&self, user_id: UserId, message: OutgoingMessage) -> WorkerResult<()> {
        self.deps.transport.send(user_id, message).await
    }

    async fn say_text(&self, user_id: UserId, text: impl Into<String>) -> WorkerResult<()> {
        self.say(user_id, OutgoingMessage::text(text)).await
    }

    /// Handle one transport event.
    pub async fn handle(&self, user_id: UserId, event: UserEvent) -> WorkerResult<()> {
        match event {
            UserEvent::Start(identity) => self.on_start(identity).await,
            UserEvent::Generate => self.on_generate(user_id).await,
            UserEvent::EditProfile => self.on_edit_profile(user_id).await,
            UserEvent::Status => self.on_status(user_id).await,
            UserEvent::Buy => self.on_buy(user_id).await,
            UserEvent::Cancel => self.on_cancel(user_id).await,
            UserEvent::Select(Choice::Purchase(kind)) => self.on_purchase(user_id, kind).await,
            UserEvent::Select(Choice::CheckPayment(id)) => self.on_check_payment(user_id, &id).await,
            event => self.on_step(user_id, event).await,
        }
    }

    async fn on_start(&self, identity: UserIdentity) -> WorkerResult<()> {
        let user_id = identity.user_id;
        self.deps.store.upsert_account(&identity).await?;
        self.say_text(user_id, WELCOME).await
    }

    async fn on_generate(&self, user_id: UserId) -> WorkerResult<()> {
        let epoch = self.reset(user_id, SessionState::Idle);
        match self.deps.store.get_profile(user_id).await? {
            Some(stored) => {
                let next = SessionState::AwaitingIdea {
                    profile: stored.profile,
                };
                if self.advance(user_id, epoch, next).is_some() {
                    self.say_text(user_id, ASK_IDEA).await?;
                }
                Ok(())
            }
            None => {
                self.start_questionnaire(
                    user_id,
                    epoch,
                    "Before your first video, tell us about your content. Send - to skip a question.",
                    true,
                )
                .await
            }
        }
    }

    async fn on_edit_profile(&self, user_id: UserId) -> WorkerResult<()> {
        let epoch = self.reset(user_id, SessionState::Idle);
        self.start_questionnaire(
            user_id,
            epoch,
            "Let's update your content profile. Send - to skip a question.",
            false,
        )
        .await
    }

    async fn start_questionnaire(
        &self,
        user_id: UserId,
        epoch: u64,
        intro: &str,
        then_generate: bool,
    ) -> WorkerResult<()> {
        let field = ProfileField::first();
        let next = SessionState::Profiling {
            field,
            answers: ContentProfile::default(),
            then_generate,
        };
        if self.advance(user_id, epoch, next).is_some() {
            self.say_text(user_id, intro).await?;
            self.say_text(user_id, field.question()).await?;
        }
        Ok(())
    }

    async fn finish_questionnaire(
        &self,
        user_id: UserId,
        epoch: u64,
        answers: ContentProfile,
        then_generate: bool,
    ) -> WorkerResult<()> {
        if answers.validate().is_err() {
            self.advance(user_id, epoch, SessionState::Idle);
            return self
                .say_text(
                    user_id,
                    "Some answers are too long (500 characters max). Send /profile to try again.",
                )
                .await;
        }

        if let Err(e) = self.deps.store.save_profile(user_id, &answers).await {
            warn!(user_id = %user_id, error = %e, "Failed to save profile");
            self.advance(user_id, epoch, SessionState::Idle);
            self.say_text(user_id, e.user_message()).await?;
            return Err(e);
        }

        if then_generate {
            let next = SessionState::AwaitingIdea { profile: answers };
            if self.advance(user_id, epoch, next).is_some() {
                self.say_text(user_id, format!("Profile saved. {}", ASK_IDEA))
                    .await?;
            }
        } else if self.advance(user_id, epoch, SessionState::Idle).is_some() {
            self.say_text(user_id, "Profile saved.").await?;
        }
        Ok(())
    }

    async fn on_status(&self, user_id: UserId) -> WorkerResult<()> {
        let summary = self.deps.ledger.status(user_id).await?;
        self.say_text(user_id, summary.render()).await
    }

    async fn on_buy(&self, user_id: UserId) -> WorkerResult<()> {
        let currency = &self.settings.price_currency;
        let options = SUBSCRIPTION_PLANS
            .iter()
            .map(|plan| {
                MenuOption::new(
                    format!("{}: {} {}", plan.title, plan.price, currency),
                    Choice::Purchase(PurchaseKind::subscription(plan.id)),
                )
            })
            .chain(VIDEO_PACKS.iter().map(|pack| {
                MenuOption::new(
                    format!("{}: {} {}", pack.title, pack.price, currency),
                    Choice::Purchase(PurchaseKind::pack(pack.id)),
                )
            }))
            .collect();
        self.say(
            user_id,
            OutgoingMessage::options("Choose a plan or a video pack:", options),
        )
        .await
    }

    async fn on_purchase(&self, user_id: UserId, kind: PurchaseKind) -> WorkerResult<()> {
        match self.deps.reconciler.start_purchase(user_id, kind).await {
            Ok(intent) => {
                let title = intent.kind.title().unwrap_or("your purchase");
                let text = format!(
                    "Invoice for {}: {:.2} {}. Pay using the link, then press Check payment.",
                    title, intent.amount, intent.asset
                );
                let url = intent.pay_url.clone().unwrap_or_default();
                let options = vec![MenuOption::new(
                    "Check payment",
                    Choice::CheckPayment(intent.id.clone()),
                )];
                self.say(user_id, OutgoingMessage::Link { text, url, options })
                    .await
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to start purchase");
                self.say_text(user_id, e.user_message()).await
            }
        }
    }

    async fn on_check_payment(&self, user_id: UserId, invoice_id: &str) -> WorkerResult<()> {
        match self.deps.reconciler.check_for_user(user_id, invoice_id).await {
            // The reconciler notifies the user itself on completion.
            Ok(ReconcileOutcome::Completed(_)) => Ok(()),
            Ok(outcome) => self.say_text(user_id, outcome.user_message()).await,
            Err(e) => {
                warn!(user_id = %user_id, invoice_id, error = %e, "Payment check failed");
                self.say_text(user_id, e.user_message()).await
            }
        }
    }

    async fn on_cancel(&self, user_id: UserId) -> WorkerResult<()> {
        let (state, epoch) = self.snapshot(user_id);
        if !state.is_cancellable() {
            return self
                .say_text(user_id, "Your video is already being made. It will arrive shortly.")
                .await;
        }
        if state == SessionState::Idle {
            return self.say_text(user_id, "Nothing to cancel.").await;
        }
        if self.advance(user_id, epoch, SessionState::Idle).is_some() {
            self.say_text(user_id, "Cancelled. Send /generate to start again.")
                .await?;
        }
        Ok(())
    }

    async fn on_step(&self, user_id: UserId, event: UserEvent) -> WorkerResult<()> {
        let (state, epoch) = self.snapshot(user_id);

        match (state, event) {
            (state, _) if state.is_busy() => self.say_text(user_id, BUSY).await,

            (SessionState::Idle, _) => {
                self.say_text(user_id, "Send /generate to create a video.")
                    .await
            }

            (
                SessionState::Profiling {
                    field,
                    mut answers,
                    then_generate,
                },
                UserEvent::Text(answer),
            ) => {
                answers.set_answer(field, &answer);
                match field.next() {
                    Some(next_field) => {
                        let next = SessionState::Profiling {
                            field: next_field,
                            answers,
                            then_generate,
                        };
                        if self.advance(user_id, epoch, next).is_some() {
                            self.say_text(user_id, next_field.question()).await?;
                        }
                        Ok(())
                    }
                    None => {
                        self.finish_questionnaire(user_id, epoch, answers, then_generate)
                            .await
                    }
                }
            }
            (SessionState::Profiling { .. }, _) => {
                self.say_text(user_id, "Please answer with text, or send - to skip.")
                    .await
            }

            (SessionState::AwaitingIdea { profile }, UserEvent::Text(idea))
                if !idea.trim().is_empty() =>
            {
                let next = SessionState::AwaitingStyle {
                    idea: idea.trim().to_string(),
                    profile,
                };
                if self.advance(user_id, epoch, next).is_some() {
                    self.say(user_id, style_options()).await?;
                }
                Ok(())
            }
            (SessionState::AwaitingIdea { .. }, _) => {
                self.say_text(user_id, "Please send your idea as a text message.")
                    .await
            }

            (SessionState::AwaitingStyle { idea, profile }, UserEvent::Select(Choice::Style(id))) => {
                match find_style(&id) {
                    Some(style) => {
                        let next = SessionState::AwaitingVoice {
                            idea,
                            style,
                            profile,
                        };
                        if self.advance(user_id, epoch, next).is_some() {
                            self.say(user_id, voice_options()).await?;
                        }
                        Ok(())
                    }
                    None => self.say(user_id, style_options()).await,
                }
            }
            (SessionState::AwaitingStyle { .. }, _) => self.say(user_id, style_options()).await,

            (
                SessionState::AwaitingVoice {
                    idea,
                    style,
                    profile,
                },
                UserEvent::Select(choice @ (Choice::Voice(_) | Choice::DefaultVoice)),
            ) => {
                let voice = match choice {
                    Choice::Voice(gender) => VoiceSelector::gendered(gender),
                    _ => VoiceSelector::default(),
                };
                let next = SessionState::AwaitingBackground {
                    idea,
                    style,
                    voice,
                    profile,
                };
                if self.advance(user_id, epoch, next).is_some() {
                    self.say(user_id, self.background_options(style)).await?;
                }
                Ok(())
            }
            (SessionState::AwaitingVoice { .. }, _) => self.say(user_id, voice_options()).await,

            (
                SessionState::AwaitingBackground { style, .. },
                UserEvent::Select(Choice::PreviewBackground(name)),
            ) => self.send_preview(user_id, style, &name).await,
            (
                SessionState::AwaitingBackground {
                    idea,
                    style,
                    voice,
                    profile,
                },
                UserEvent::Select(
                    choice @ (Choice::Background(_) | Choice::DefaultBackground | Choice::NoBackground),
                ),
            ) => match self.resolve_background(style, choice) {
                Ok(background) => {
                    let selections = Selections {
                        idea,
                        style,
                        voice,
                        background,
                        profile,
                    };
                    self.write_script(user_id, epoch, selections).await
                }
                Err(reason) => self.say_text(user_id, reason).await,
            },
            (SessionState::AwaitingBackground { style, .. }, _) => {
                self.say(user_id, self.background_options(style)).await
            }

            (SessionState::PreviewingScript(draft), UserEvent::Select(Choice::Approve)) => {
                self.approve(user_id, epoch, draft).await
            }
            (SessionState::PreviewingScript(draft), UserEvent::Select(Choice::Edit)) => {
                if self
                    .advance(user_id, epoch, SessionState::EditingScript(draft))
                    .is_some()
                {
                    self.say_text(user_id, "Send what to change in the script.")
                        .await?;
                }
                Ok(())
            }
            (SessionState::PreviewingScript(draft), UserEvent::Select(Choice::Regenerate)) => {
                self.rewrite(user_id, epoch, draft, None).await
            }
            (SessionState::PreviewingScript(draft), _) => {
                self.say(user_id, script_preview(&draft)).await
            }

            (SessionState::EditingScript(draft), UserEvent::Text(feedback))
                if !feedback.trim().is_empty() =>
            {
                self.rewrite(user_id, epoch, draft, Some(feedback)).await
            }
            (SessionState::EditingScript(_), _) => {
                self.say_text(user_id, "Please describe the changes as a text message.")
                    .await
            }

            // Busy states are handled by the first arm.
            (_, _) => self.say_text(user_id, BUSY).await,
        }
    }

    fn background_options(&self, style: &VideoStyle) -> OutgoingMessage {
        let mut options = Vec::new();
        for asset in self.deps.composer.backgrounds(style) {
            options.push(MenuOption::new(
                asset.display_name.clone(),
                Choice::Background(asset.file_name.clone()),
            ));
            options.push(MenuOption::new(
                format!("Preview: {}", asset.display_name),
                Choice::PreviewBackground(asset.file_name),
            ));
        }
        options.push(MenuOption::new("Default for style", Choice::DefaultBackground));
        options.push(MenuOption::new("No background", Choice::NoBackground));
        OutgoingMessage::options("Choose a background:", options)
    }

    async fn send_preview(&self, user_id: UserId, style: &VideoStyle, name: &str) -> WorkerResult<()> {
        if !style.has_background(name) {
            return self
                .say_text(user_id, "This background is not part of the chosen style.")
                .await;
        }
        match self.deps.composer.preview(name).await {
            Ok(bytes) => {
                self.say(
                    user_id,
                    OutgoingMessage::Preview {
                        file_name: name.to_string(),
                        bytes,
                    },
                )
                .await
            }
            Err(e) => {
                warn!(user_id = %user_id, background = name, error = %e, "Preview unavailable");
                self.say_text(user_id, "Preview unavailable. Pick another background.")
                    .await
            }
        }
    }

    fn resolve_background(&self, style: &VideoStyle, choice: Choice) -> Result<BackgroundSelector, &'static str> {
        match choice {
            Choice::NoBackground => Ok(BackgroundSelector::None),
            Choice::DefaultBackground => {
                let name = style.default_background();
                if self.deps.composer.has_background(name) {
                    Ok(BackgroundSelector::asset(name))
                } else {
                    Err("The default background is unavailable. Pick another one or choose no background.")
                }
            }
            Choice::Background(name)
                if style.has_background(&name) && self.deps.composer.has_background(&name) =>
            {
                Ok(BackgroundSelector::Asset(name))
            }
            _ => Err("This background is unavailable. Pick another one."),
        }
    }

    async fn write_script(&self, user_id: UserId, epoch: u64, selections: Selections) -> WorkerResult<()> {
        let Some(busy) = self.advance(user_id, epoch, SessionState::WritingScript(selections.clone())) else {
            return Ok(());
        };
        self.say_text(user_id, "Writing your script...").await?;

        match self
            .deps
            .writer
            .generate(&selections.idea, &selections.profile)
            .await
        {
            Ok(script) => {
                let draft = selections.with_script(script);
                let preview = script_preview(&draft);
                if self
                    .advance(user_id, busy, SessionState::PreviewingScript(draft))
                    .is_some()
                {
                    self.say(user_id, preview).await?;
                }
                Ok(())
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Script generation failed");
                if self.advance(user_id, busy, SessionState::Idle).is_some() {
                    self.say_text(user_id, e.user_message()).await?;
                }
                Ok(())
            }
        }
    }

    /// Regenerate (`feedback` is `None`) or revise the script. A failure
    /// keeps the previous draft.
    async fn rewrite(
        &self,
        user_id: UserId,
        epoch: u64,
        draft: Draft,
        feedback: Option<String>,
    ) -> WorkerResult<()> {
        let Some(busy) = self.advance(user_id, epoch, SessionState::Regenerating(draft.clone())) else {
            return Ok(());
        };

        let result = match &feedback {
            None => self.deps.writer.generate(&draft.idea, &draft.profile).await,
            Some(notes) => {
                self.deps
                    .writer
                    .improve(&draft.script, notes, &draft.profile)
                    .await
            }
        };

        match result {
            Ok(script) => {
                let draft = Draft { script, ..draft };
                let preview = script_preview(&draft);
                if self
                    .advance(user_id, busy, SessionState::PreviewingScript(draft))
                    .is_some()
                {
                    self.say(user_id, preview).await?;
                }
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Script rewrite failed");
                let preview = script_preview(&draft);
                if self
                    .advance(user_id, busy, SessionState::PreviewingScript(draft))
                    .is_some()
                {
                    self.say_text(
                        user_id,
                        "Sorry, we could not update the script. Your previous version is kept.",
                    )
                    .await?;
                    self.say(user_id, preview).await?;
                }
            }
        }
        Ok(())
    }

    /// The only place an entitlement is spent.
    async fn approve(&self, user_id: UserId, epoch: u64, draft: Draft) -> WorkerResult<()> {
        let Some(busy) = self.advance(user_id, epoch, SessionState::Synthesizing) else {
            return Ok(());
        };

        let consumption = match self.deps.ledger.consume(user_id).await {
            Ok(consumption) => consumption,
            Err(e) if e.is_limit_exceeded() => {
                self.advance(user_id, busy, SessionState::PreviewingScript(draft));
                return self.say_text(user_id, e.user_message()).await;
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Entitlement check failed");
                self.advance(user_id, busy, SessionState::Idle);
                self.say_text(user_id, e.user_message()).await?;
                return Err(e);
            }
        };

        self.say_text(
            user_id,
            "Script approved. Creating your video, this takes a minute or two.",
        )
        .await?;

        let record = GenerationRecord::new(user_id, &draft.idea)
            .with_script(&draft.script)
            .with_status(GenerationStatus::Processing);
        let logger = SessionLogger::new(user_id, "pipeline").with_generation(&record.id);
        let span = logger.create_span();
        self.run_pipeline(user_id, busy, record, draft, consumption, logger)
            .instrument(span)
            .await
    }

    async fn run_pipeline(
        &self,
        user_id: UserId,
        epoch: u64,
        record: GenerationRecord,
        draft: Draft,
        consumption: Consumption,
        logger: SessionLogger,
    ) -> WorkerResult<()> {
        let started = Instant::now();
        if let Err(e) = self.deps.store.insert_generation(&record).await {
            logger.log_error(&format!("Failed to create generation record: {}", e));
            self.advance(user_id, epoch, SessionState::Idle);
            self.say_text(user_id, e.user_message()).await?;
            return Err(e);
        }
        record_generation("started");
        logger.log_start(&format!(
            "source={} tier={}",
            consumption.source.as_str(),
            consumption.tier
        ));

        let audio_path = unique_path(&self.settings.work_dir, "narration", "mp3");
        let video_path = unique_path(&self.settings.output_dir, "video", "mp4");

        match self
            .produce(&record.id, &draft, consumption.tier, &audio_path, &video_path, &logger)
            .await
        {
            Ok(video) => {
                self.deliver(user_id, epoch, &record.id, &audio_path, &video, &logger)
                    .await;
                record_generation_duration(started.elapsed().as_secs_f64());
            }
            Err(e) => {
                self.fail(&record.id, &e, &logger).await;
                reelgen_media::remove_files(&[&audio_path, &video_path]).await;
                self.advance(user_id, epoch, SessionState::Idle);
                self.say_text(user_id, e.user_message()).await?;
            }
        }
        Ok(())
    }

    async fn produce(
        &self,
        id: &GenerationId,
        draft: &Draft,
        tier: PlanTier,
        audio_path: &Path,
        video_path: &Path,
        logger: &SessionLogger,
    ) -> WorkerResult<PathBuf> {
        tokio::fs::create_dir_all(&self.settings.work_dir).await?;
        tokio::fs::create_dir_all(&self.settings.output_dir).await?;

        self.deps
            .narrator
            .narrate(&draft.script, &draft.voice, tier, audio_path)
            .await?;
        self.deps
            .store
            .update_generation(
                id,
                &GenerationUpdate::status(GenerationStatus::AudioReady)
                    .with_audio_path(audio_path.display().to_string()),
            )
            .await?;
        logger.log_progress("narration ready");

        let video = self
            .deps
            .composer
            .compose(&draft.script, audio_path, video_path, &draft.background)
            .await?;
        logger.log_progress(&format!("composed with background {}", draft.background.display_name()));
        Ok(video)
    }

    async fn fail(&self, id: &GenerationId, error: &WorkerError, logger: &SessionLogger) {
        logger.log_error(&error.to_string());
        record_generation("failed");
        if let Err(e) = self
            .deps
            .store
            .update_generation(id, &GenerationUpdate::failed(error.to_string()))
            .await
        {
            logger.log_warning(&format!("Failed to mark generation failed: {}", e));
        }
    }

    async fn deliver(
        &self,
        user_id: UserId,
        epoch: u64,
        id: &GenerationId,
        audio_path: &Path,
        video_path: &Path,
        logger: &SessionLogger,
    ) {
        // A newer session may already own the slot; the video is still delivered.
        let delivering = self.advance(user_id, epoch, SessionState::Delivering);

        let completed = self
            .deps
            .store
            .update_generation(
                id,
                &GenerationUpdate::status(GenerationStatus::Completed)
                    .with_video_path(video_path.display().to_string()),
            )
            .await;

        let outcome = match completed {
            Err(e) => Err(e),
            Ok(_) => self
                .deps
                .transport
                .send(
                    user_id,
                    OutgoingMessage::Video {
                        path: video_path.to_path_buf(),
                        caption: "Your video is ready!".to_string(),
                    },
                )
                .await
                .map_err(|e| WorkerError::DeliveryFailed(e.to_string())),
        };

        reelgen_media::remove_files(&[audio_path, video_path]).await;

        match outcome {
            Ok(()) => {
                record_generation("completed");
                logger.log_completion("video delivered");
            }
            Err(e @ WorkerError::DeliveryFailed(_)) => {
                logger.log_error(&e.to_string());
                let text = format!(
                    "Delivery failed for user {} (generation {}): {}",
                    user_id, id, e
                );
                if let Err(notify_err) = self
                    .deps
                    .transport
                    .notify_admins(&self.settings.admin_ids, &text)
                    .await
                {
                    logger.log_warning(&format!("Admin notification failed: {}", notify_err));
                }
                let _ = self.say_text(user_id, e.user_message()).await;
            }
            Err(e) => {
                self.fail(id, &e, logger).await;
                let _ = self.say_text(user_id, e.user_message()).await;
            }
        }

        match self.deps.ledger.status(user_id).await {
            Ok(summary) => {
                let _ = self.say_text(user_id, summary.remaining_line()).await;
            }
            Err(e) => logger.log_warning(&format!("Failed to load status: {}", e)),
        }

        if let Some(epoch) = delivering {
            self.advance(user_id, epoch, SessionState::Idle);
        }
    }
}

fn style_options() -> OutgoingMessage {
    let options = VIDEO_STYLES
        .iter()
        .map(|style| MenuOption::new(style.name, Choice::Style(style.id.to_string())))
        .collect();
    OutgoingMessage::options("Choose a video style:", options)
}

fn voice_options() -> OutgoingMessage {
    use reelgen_models::VoiceGender;
    OutgoingMessage::options(
        "Choose a narrator voice:",
        vec![
            MenuOption::new("Male", Choice::Voice(VoiceGender::Male)),
            MenuOption::new("Female", Choice::Voice(VoiceGender::Female)),
            MenuOption::new("Default", Choice::DefaultVoice),
        ],
    )
}

fn script_preview(draft: &Draft) -> OutgoingMessage {
    let text = format!(
        "Your script:\n\n{}\n\nStyle: {}. Background: {}.\nSend /cancel to stop.",
        draft.script,
        draft.style.name,
        draft.background.display_name()
    );
    OutgoingMessage::options(
        text,
        vec![
            MenuOption::new("Approve", Choice::Approve),
            MenuOption::new("Edit", Choice::Edit),
            MenuOption::new("Regenerate", Choice::Regenerate),
        ],
    )
}
