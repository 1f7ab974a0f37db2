use crate::backend::{AiBackend, BackendError, SpeechEngine};
use crate::bus::{BusSender, Change, Command, EventBus, Message};
use crate::log_buffer::LogLevel;
use crate::model::{CollectionKind, SessionError};
use crate::session::SessionState;
use crate::storage::{default_project_name, PersistenceManager};
use log::debug;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

/// Single consumer of the bus. Applies intents and backend events to the
/// session in arrival order, performs the side effects they need, and
/// fans the resulting changes out to subscribers.
pub struct Controller {
    session: SessionState,
    store: PersistenceManager,
    bus: EventBus,
    ai: Box<dyn AiBackend>,
    speech: Option<Box<dyn SpeechEngine>>,
}

impl Controller {
    pub fn new(
        session: SessionState,
        store: PersistenceManager,
        bus: EventBus,
        ai: Box<dyn AiBackend>,
    ) -> Self {
        Controller {
            session,
            store,
            bus,
            ai,
            speech: None,
        }
    }

    pub fn with_speech(mut self, engine: Box<dyn SpeechEngine>) -> Self {
        self.speech = Some(engine);
        self
    }

    pub fn sender(&self) -> BusSender {
        self.bus.sender()
    }

    pub fn subscribe(&mut self) -> Receiver<Change> {
        self.bus.subscribe()
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn store(&self) -> &PersistenceManager {
        &self.store
    }

    /// Drains every queued message without blocking. Messages posted while
    /// draining are handled in the same call.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(message) = self.bus.try_next() {
            self.process(message);
            handled += 1;
        }
        handled
    }

    /// Processes messages until `done` holds for the session or the timeout
    /// elapses. Returns whether `done` was reached.
    pub fn wait_until<F>(&mut self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut(&SessionState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.session) {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.bus.next_timeout(remaining) {
                Some(message) => {
                    self.process(message);
                }
                None => return done(&self.session),
            }
        }
    }

    pub fn process(&mut self, message: Message) -> Vec<Change> {
        let changes = match message {
            Message::Intent(command) => {
                debug!("event=intent command={:?}", command);
                match self.execute(command) {
                    Ok(changes) => changes,
                    Err(err) => {
                        let reason = err.to_string();
                        self.session
                            .record(LogLevel::Error, format!("Operation failed: {reason}"));
                        vec![Change::Rejected { reason }]
                    }
                }
            }
            Message::Backend(event) => self.session.on_backend_event(event),
        };
        for change in &changes {
            self.bus.publish(change);
        }
        if !changes.is_empty() {
            debug!(
                "event=changes_published count={} subscribers={}",
                changes.len(),
                self.bus.subscriber_count()
            );
        }
        changes
    }

    pub fn execute(&mut self, command: Command) -> Result<Vec<Change>, SessionError> {
        let changes = match command {
            Command::AddNote { collection, text } => {
                let note = self.session.add_note(collection, &text)?;
                vec![Change::NoteAdded { collection, note }]
            }
            Command::RemoveNote { collection, id } => self
                .session
                .remove_note(collection, &id)
                .map(|note| Change::NoteRemoved {
                    collection,
                    id: note.id,
                })
                .into_iter()
                .collect(),
            Command::RemoveAt { collection, index } => {
                let note = self.session.remove_at(collection, index)?;
                vec![Change::NoteRemoved {
                    collection,
                    id: note.id,
                }]
            }
            Command::UpdateNote {
                collection,
                id,
                text,
            } => self
                .session
                .update_note(collection, &id, &text)?
                .map(|note| Change::NoteUpdated { collection, note })
                .into_iter()
                .collect(),
            Command::MoveNote {
                collection,
                id,
                to_index,
            } => {
                if self.session.move_note(collection, &id, to_index)? {
                    vec![Change::NoteMoved {
                        collection,
                        id,
                        to_index,
                    }]
                } else {
                    Vec::new()
                }
            }
            Command::TransferNote { from, id } => self
                .session
                .transfer(from, &id)
                .map(|note| Change::NoteTransferred {
                    from,
                    to: from.other(),
                    note,
                })
                .into_iter()
                .collect(),
            Command::ClearCollection(kind) => {
                self.session.clear(kind);
                vec![Change::CollectionCleared(kind)]
            }
            Command::SendPrompt(prompt) => self.send_prompt(&prompt)?,
            Command::RephraseNote { collection, id } => {
                let prompt = self.session.rephrase_prompt(collection, &id)?;
                self.send_prompt(&prompt)?
            }
            Command::SelectModel(model) => {
                if self.session.select_model(&model) {
                    vec![Change::ModelSelected(
                        self.session.selected_model().to_string(),
                    )]
                } else {
                    Vec::new()
                }
            }
            Command::RefreshModels => {
                self.ai.load_models();
                Vec::new()
            }
            Command::ClearFinishedRequests => {
                vec![Change::RequestsPruned(self.session.clear_finished_requests())]
            }
            Command::SetTheme(index) => {
                self.session.set_theme(index)?;
                vec![Change::ThemeChanged(index)]
            }
            Command::RandomTheme => vec![Change::ThemeChanged(self.session.random_theme())],
            Command::ResetTheme => {
                self.session.reset_theme();
                vec![Change::ThemeChanged(self.session.theme().index())]
            }
            Command::SetLogPanel(enabled) => {
                self.session.set_log_enabled(enabled);
                vec![Change::LogPanelToggled(enabled)]
            }
            Command::ClearLog => {
                self.session.clear_log();
                vec![Change::LogCleared]
            }
            Command::SaveProject { name } => {
                let name = name
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .or_else(|| self.session.project_name().map(str::to_string))
                    .unwrap_or_else(default_project_name);
                let project = self.session.to_project(&name);
                let file_id = self.store.save(&project)?;
                self.session.mark_saved(&name, &file_id);
                vec![Change::ProjectSaved { file_id }]
            }
            Command::LoadProject(file_id) => {
                let project = self.store.load(&file_id)?;
                let name = project.metadata.name.clone();
                self.session.apply_project(project);
                vec![Change::ProjectLoaded { name }]
            }
            Command::ExportInbox => {
                let notes = self.session.export_snapshot(CollectionKind::Inbox);
                let path = self.store.export_inbox(&notes)?;
                self.session.record(
                    LogLevel::Info,
                    format!("Exported {} notes to {}", notes.len(), path.display()),
                );
                vec![Change::InboxExported(path)]
            }
            Command::ToggleSpeech { kind, text } => {
                let engine = self
                    .speech
                    .as_ref()
                    .ok_or_else(|| BackendError::Unavailable(format!("{} engine", kind.label())))?;
                if self.session.speech_active(kind) {
                    engine.stop(kind)?;
                } else {
                    engine.start(kind, text.as_deref())?;
                }
                Vec::new()
            }
        };
        Ok(changes)
    }

    fn send_prompt(&mut self, prompt: &str) -> Result<Vec<Change>, SessionError> {
        let handle = self.session.submit_prompt(prompt)?;
        let mut changes = Vec::new();
        if let Some(request) = self.session.requests().get(handle) {
            self.ai
                .send_prompt(&request.id, &request.prompt, self.session.selected_model());
            changes.push(Change::RequestSubmitted {
                handle,
                id: request.id.clone(),
            });
        }
        Ok(changes)
    }
}
