use crate::backend::SpeechKind;
use crate::bus::{BackendEvent, Change};
use crate::config::Settings;
use crate::correlator::{RequestCorrelator, RequestHandle, Resolution};
use crate::log_buffer::{LogLevel, LogRingBuffer};
use crate::logging::single_line;
use crate::model::{CollectionKind, Note, NoteCollection, SessionError};
use crate::storage::Project;
use crate::theme::ThemeIndex;
use log::{debug, error, info, warn};

pub const REPHRASE_PREFIX: &str = "Riformula intensamente il seguente testo mantenendo il \
    significato ma migliorando lo stile e la chiarezza:";

/// Everything the user is working on in this process. Owned by the
/// controller; every mutation goes through `&mut self`.
#[derive(Debug)]
pub struct SessionState {
    inbox: NoteCollection,
    workspace: NoteCollection,
    requests: RequestCorrelator,
    log: LogRingBuffer,
    theme: ThemeIndex,
    log_enabled: bool,
    project_name: Option<String>,
    models: Vec<String>,
    selected_model: String,
    backend_status: String,
    tts_active: bool,
    recognition_active: bool,
    dirty: bool,
}

impl SessionState {
    pub fn new(theme: ThemeIndex, model: impl Into<String>, log_enabled: bool) -> Self {
        SessionState {
            inbox: NoteCollection::new(CollectionKind::Inbox),
            workspace: NoteCollection::new(CollectionKind::Workspace),
            requests: RequestCorrelator::new(),
            log: LogRingBuffer::default(),
            theme,
            log_enabled,
            project_name: None,
            models: Vec::new(),
            selected_model: model.into(),
            backend_status: "Not connected".to_string(),
            tts_active: false,
            recognition_active: false,
            dirty: false,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let theme = ThemeIndex::new(settings.theme).unwrap_or_default();
        SessionState::new(theme, settings.ai_model.clone(), settings.log_panel_enabled)
    }

    pub fn collection(&self, kind: CollectionKind) -> &NoteCollection {
        match kind {
            CollectionKind::Inbox => &self.inbox,
            CollectionKind::Workspace => &self.workspace,
        }
    }

    fn collection_mut(&mut self, kind: CollectionKind) -> &mut NoteCollection {
        match kind {
            CollectionKind::Inbox => &mut self.inbox,
            CollectionKind::Workspace => &mut self.workspace,
        }
    }

    pub fn add_note(&mut self, kind: CollectionKind, text: &str) -> Result<Note, SessionError> {
        let note = self.collection_mut(kind).add(text)?;
        self.dirty = true;
        self.record(
            LogLevel::Info,
            format!("Added note to {}: {}", kind, single_line(&note.text, 50)),
        );
        Ok(note)
    }

    pub fn remove_note(&mut self, kind: CollectionKind, id: &str) -> Option<Note> {
        let removed = self.collection_mut(kind).remove(id);
        match &removed {
            Some(note) => {
                self.dirty = true;
                self.record(LogLevel::Info, format!("Removed note {} from {}", note.id, kind));
            }
            None => debug!("event=remove_ignored collection={} id={}", kind, id),
        }
        removed
    }

    pub fn remove_at(&mut self, kind: CollectionKind, index: usize) -> Result<Note, SessionError> {
        let note = self.collection_mut(kind).remove_at(index)?;
        self.dirty = true;
        self.record(LogLevel::Info, format!("Removed note {} from {}", note.id, kind));
        Ok(note)
    }

    /// Returns `None` when the note no longer exists; a removed note is never
    /// brought back by a late edit.
    pub fn update_note(
        &mut self,
        kind: CollectionKind,
        id: &str,
        text: &str,
    ) -> Result<Option<Note>, SessionError> {
        let updated = self.collection_mut(kind).update(id, text)?;
        match &updated {
            Some(note) => {
                self.dirty = true;
                self.record(LogLevel::Info, format!("Updated note {} in {}", note.id, kind));
            }
            None => debug!("event=update_ignored collection={} id={}", kind, id),
        }
        Ok(updated)
    }

    pub fn move_note(
        &mut self,
        kind: CollectionKind,
        id: &str,
        to_index: usize,
    ) -> Result<bool, SessionError> {
        let moved = self.collection_mut(kind).move_to(id, to_index)?;
        if moved {
            self.dirty = true;
        }
        Ok(moved)
    }

    pub fn transfer(&mut self, from: CollectionKind, id: &str) -> Option<Note> {
        let note = self.collection_mut(from).remove(id)?;
        let to = from.other();
        let note = self.collection_mut(to).adopt(note);
        self.dirty = true;
        self.record(LogLevel::Info, format!("Moved note {} from {} to {}", note.id, from, to));
        Some(note)
    }

    pub fn clear(&mut self, kind: CollectionKind) {
        let count = self.collection(kind).len();
        self.collection_mut(kind).clear();
        if count > 0 {
            self.dirty = true;
        }
        self.record(LogLevel::Info, format!("Cleared {} ({} notes)", kind, count));
    }

    pub fn export_snapshot(&self, kind: CollectionKind) -> Vec<Note> {
        self.collection(kind).snapshot()
    }

    pub fn submit_prompt(&mut self, prompt: &str) -> Result<RequestHandle, SessionError> {
        let handle = self.requests.submit(prompt)?;
        let message = self.requests.get(handle).map(|request| {
            format!(
                "AI request sent: {} (model: {})",
                request.preview, self.selected_model
            )
        });
        if let Some(message) = message {
            self.record(LogLevel::Info, message);
        }
        Ok(handle)
    }

    /// Builds the rewrite prompt for a note. Submitting it is left to the caller.
    pub fn rephrase_prompt(
        &self,
        collection: CollectionKind,
        id: &str,
    ) -> Result<String, SessionError> {
        let note = self
            .collection(collection)
            .get(id)
            .ok_or_else(|| SessionError::NoteNotFound {
                collection,
                id: id.to_string(),
            })?;
        Ok(format!("{REPHRASE_PREFIX}\n\n{}", note.text))
    }

    pub fn requests(&self) -> &RequestCorrelator {
        &self.requests
    }

    pub fn clear_finished_requests(&mut self) -> usize {
        self.requests.clear_finished()
    }

    pub fn on_backend_event(&mut self, event: BackendEvent) -> Vec<Change> {
        match event {
            BackendEvent::ResponseReceived {
                request,
                prompt,
                response,
            } => {
                let resolution = match &request {
                    Some(id) => self.requests.resolve_id(id, &response),
                    None => self.requests.resolve(&prompt, &response),
                };
                vec![self.report_resolution(resolution, &prompt)]
            }
            BackendEvent::ErrorOccurred {
                request,
                prompt,
                message,
            } => {
                let resolution = match (&request, &prompt) {
                    (Some(id), _) => self.requests.error_id(id, &message),
                    (None, Some(prompt)) => self.requests.error(prompt, &message),
                    (None, None) => {
                        self.record(LogLevel::Error, format!("AI service error: {message}"));
                        return vec![Change::BackendError(message)];
                    }
                };
                vec![self.report_resolution(resolution, prompt.as_deref().unwrap_or(""))]
            }
            BackendEvent::ModelsLoaded(models) => {
                self.record(LogLevel::Info, format!("{} AI models available", models.len()));
                if !models.is_empty() && !models.contains(&self.selected_model) {
                    warn!(
                        "event=selected_model_missing model={}",
                        self.selected_model
                    );
                }
                self.models = models.clone();
                vec![Change::ModelsLoaded(models)]
            }
            BackendEvent::StatusChanged(status) => {
                debug!("event=backend_status status={}", status);
                self.backend_status = status.clone();
                vec![Change::BackendStatus(status)]
            }
            BackendEvent::SpeechStatus { kind, active } => {
                match kind {
                    SpeechKind::Synthesis => self.tts_active = active,
                    SpeechKind::Recognition => self.recognition_active = active,
                }
                vec![Change::SpeechStatus { kind, active }]
            }
            BackendEvent::SpeechRecognized(text) => {
                match self.add_note(CollectionKind::Inbox, &text) {
                    Ok(note) => vec![Change::NoteAdded {
                        collection: CollectionKind::Inbox,
                        note,
                    }],
                    Err(err) => {
                        self.record(LogLevel::Warn, format!("Recognized speech ignored: {err}"));
                        vec![Change::Rejected {
                            reason: err.to_string(),
                        }]
                    }
                }
            }
        }
    }

    fn report_resolution(&mut self, resolution: Resolution, prompt: &str) -> Change {
        match resolution {
            Resolution::Resolved(handle) => {
                let chars = self
                    .requests
                    .get(handle)
                    .and_then(|r| r.response.as_ref())
                    .map(|r| r.chars().count())
                    .unwrap_or(0);
                self.record(
                    LogLevel::Info,
                    format!("AI response received ({chars} characters)"),
                );
                Change::RequestResolved(handle)
            }
            Resolution::Errored(handle) => {
                let message = self
                    .requests
                    .get(handle)
                    .and_then(|r| r.response.clone())
                    .unwrap_or_default();
                self.record(LogLevel::Error, message);
                Change::RequestErrored(handle)
            }
            Resolution::Duplicate(handle) => {
                self.record(
                    LogLevel::Warn,
                    format!("Duplicate AI result ignored for request #{}", handle.0 + 1),
                );
                Change::DuplicateResolution(handle)
            }
            Resolution::Miss => {
                self.record(
                    LogLevel::Warn,
                    format!("AI result without pending request: {}", single_line(prompt, 50)),
                );
                Change::CorrelationMiss
            }
        }
    }

    pub fn theme(&self) -> ThemeIndex {
        self.theme
    }

    pub fn set_theme(&mut self, index: usize) -> Result<(), SessionError> {
        self.theme.set(index)?;
        self.record(
            LogLevel::Info,
            format!("Theme set to {}", self.theme.palette().name),
        );
        Ok(())
    }

    pub fn random_theme(&mut self) -> usize {
        let index = self.theme.randomize();
        self.record(
            LogLevel::Info,
            format!("Random theme: {}", self.theme.palette().name),
        );
        index
    }

    pub fn reset_theme(&mut self) {
        self.theme.reset();
        self.record(LogLevel::Info, "Theme reset");
    }

    pub fn log(&self) -> &LogRingBuffer {
        &self.log
    }

    pub fn log_snapshot(&self) -> String {
        self.log.snapshot(self.log_enabled)
    }

    pub fn log_enabled(&self) -> bool {
        self.log_enabled
    }

    pub fn set_log_enabled(&mut self, enabled: bool) {
        self.log_enabled = enabled;
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Appends to the in-app log and mirrors the line to the file log.
    pub fn record(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Warn => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
        self.log.append(level, message);
    }

    pub fn to_project(&self, name: &str) -> Project {
        Project::new(
            name,
            self.inbox.snapshot(),
            self.workspace.snapshot(),
        )
    }

    /// Replaces both collections wholesale. Callers confirm discarding
    /// unsaved edits before getting here.
    pub fn apply_project(&mut self, project: Project) {
        let Project {
            metadata,
            inbox,
            workspace,
        } = project;
        self.inbox.replace_all(inbox);
        self.workspace.replace_all(workspace);
        self.record(
            LogLevel::Info,
            format!(
                "Project '{}' loaded ({} inbox, {} workspace)",
                metadata.name,
                self.inbox.len(),
                self.workspace.len()
            ),
        );
        self.project_name = Some(metadata.name);
        self.dirty = false;
    }

    pub fn mark_saved(&mut self, name: &str, file_id: &str) {
        self.project_name = Some(name.to_string());
        self.dirty = false;
        self.record(LogLevel::Info, format!("Project '{name}' saved as {file_id}"));
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn project_name(&self) -> Option<&str> {
        self.project_name.as_deref()
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn selected_model(&self) -> &str {
        &self.selected_model
    }

    pub fn select_model(&mut self, model: &str) -> bool {
        let model = model.trim();
        if model.is_empty() {
            return false;
        }
        self.selected_model = model.to_string();
        self.record(LogLevel::Info, format!("AI model: {model}"));
        true
    }

    pub fn backend_status(&self) -> &str {
        &self.backend_status
    }

    pub fn speech_active(&self, kind: SpeechKind) -> bool {
        match kind {
            SpeechKind::Synthesis => self.tts_active,
            SpeechKind::Recognition => self.recognition_active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::{RequestId, RequestStatus};
    use crate::model::ValidationError;

    fn session() -> SessionState {
        SessionState::new(ThemeIndex::default(), "llama2:7b", true)
    }

    fn texts(session: &SessionState, kind: CollectionKind) -> Vec<String> {
        session
            .collection(kind)
            .notes()
            .iter()
            .map(|n| n.text.clone())
            .collect()
    }

    enum Op {
        Add(CollectionKind, &'static str),
        RemoveNth(CollectionKind, usize),
        UpdateNth(CollectionKind, usize, &'static str),
        Transfer(CollectionKind, usize),
    }

    fn replay(ops: &[Op]) -> (Vec<String>, Vec<String>) {
        let mut s = session();
        for op in ops {
            match op {
                Op::Add(kind, text) => {
                    let _ = s.add_note(*kind, text);
                }
                Op::RemoveNth(kind, n) => {
                    if let Some(id) = s.collection(*kind).notes().get(*n).map(|n| n.id.clone()) {
                        s.remove_note(*kind, &id);
                    }
                }
                Op::UpdateNth(kind, n, text) => {
                    if let Some(id) = s.collection(*kind).notes().get(*n).map(|n| n.id.clone()) {
                        let _ = s.update_note(*kind, &id, text);
                    }
                }
                Op::Transfer(kind, n) => {
                    if let Some(id) = s.collection(*kind).notes().get(*n).map(|n| n.id.clone()) {
                        s.transfer(*kind, &id);
                    }
                }
            }
        }
        (
            texts(&s, CollectionKind::Inbox),
            texts(&s, CollectionKind::Workspace),
        )
    }

    #[test]
    fn replaying_the_same_sequence_gives_the_same_state() {
        use CollectionKind::{Inbox, Workspace};
        let ops = [
            Op::Add(Inbox, "a"),
            Op::Add(Inbox, "b"),
            Op::Add(Inbox, "  "),
            Op::Add(Workspace, "w"),
            Op::Transfer(Inbox, 0),
            Op::UpdateNth(Workspace, 1, "a2"),
            Op::Add(Inbox, "c"),
            Op::RemoveNth(Inbox, 0),
            Op::RemoveNth(Inbox, 9),
        ];
        let first = replay(&ops);
        let second = replay(&ops);
        assert_eq!(first, second);
        assert_eq!(first.0, vec!["c"]);
        assert_eq!(first.1, vec!["w", "a2"]);
    }

    #[test]
    fn clear_only_touches_named_collection() {
        let mut s = session();
        for t in ["1", "2", "3"] {
            s.add_note(CollectionKind::Workspace, t).unwrap();
        }
        for t in ["a", "b"] {
            s.add_note(CollectionKind::Inbox, t).unwrap();
        }
        s.clear(CollectionKind::Workspace);
        assert_eq!(s.collection(CollectionKind::Workspace).len(), 0);
        assert_eq!(s.collection(CollectionKind::Inbox).len(), 2);
    }

    #[test]
    fn removal_wins_over_late_update() {
        let mut s = session();
        let note = s.add_note(CollectionKind::Inbox, "draft").unwrap();
        s.remove_note(CollectionKind::Inbox, &note.id);
        let result = s
            .update_note(CollectionKind::Inbox, &note.id, "edited")
            .unwrap();
        assert!(result.is_none());
        assert!(s.collection(CollectionKind::Inbox).is_empty());
    }

    #[test]
    fn remove_at_stale_index_fails() {
        let mut s = session();
        s.add_note(CollectionKind::Inbox, "only").unwrap();
        assert!(matches!(
            s.remove_at(CollectionKind::Inbox, 1),
            Err(SessionError::IndexOutOfRange { .. })
        ));
        assert_eq!(s.collection(CollectionKind::Inbox).len(), 1);
    }

    #[test]
    fn response_event_resolves_by_request_id() {
        let mut s = session();
        let first = s.submit_prompt("same").unwrap();
        let second = s.submit_prompt("same").unwrap();
        let id = s.requests().get(second).unwrap().id.clone();

        let changes = s.on_backend_event(BackendEvent::ResponseReceived {
            request: Some(id),
            prompt: "same".into(),
            response: "R".into(),
        });
        assert_eq!(changes, vec![Change::RequestResolved(second)]);
        assert_eq!(
            s.requests().get(first).unwrap().status,
            RequestStatus::Pending
        );
    }

    #[test]
    fn unmatched_response_is_logged_miss() {
        let mut s = session();
        s.submit_prompt("X").unwrap();
        let before = s.log().len();
        let changes = s.on_backend_event(BackendEvent::ResponseReceived {
            request: None,
            prompt: "Y".into(),
            response: "R".into(),
        });
        assert_eq!(changes, vec![Change::CorrelationMiss]);
        assert_eq!(s.requests().miss_count(), 1);
        assert_eq!(s.requests().pending_count(), 1);
        assert_eq!(s.log().len(), before + 1);
        let last = s.log().entries().last().unwrap();
        assert_eq!(last.level, LogLevel::Warn);
    }

    #[test]
    fn error_without_request_is_reported_not_correlated() {
        let mut s = session();
        let handle = s.submit_prompt("X").unwrap();
        let changes = s.on_backend_event(BackendEvent::ErrorOccurred {
            request: None,
            prompt: None,
            message: "offline".into(),
        });
        assert_eq!(changes, vec![Change::BackendError("offline".into())]);
        assert_eq!(
            s.requests().get(handle).unwrap().status,
            RequestStatus::Pending
        );

        let changes = s.on_backend_event(BackendEvent::ErrorOccurred {
            request: None,
            prompt: Some("X".into()),
            message: "boom".into(),
        });
        assert_eq!(changes, vec![Change::RequestErrored(handle)]);
    }

    #[test]
    fn late_response_for_unknown_id_is_miss() {
        let mut s = session();
        let changes = s.on_backend_event(BackendEvent::ResponseReceived {
            request: Some(RequestId::for_tests("req-gone")),
            prompt: "whatever".into(),
            response: "R".into(),
        });
        assert_eq!(changes, vec![Change::CorrelationMiss]);
    }

    #[test]
    fn recognized_speech_lands_in_inbox() {
        let mut s = session();
        let changes = s.on_backend_event(BackendEvent::SpeechRecognized(" ciao ".into()));
        assert!(matches!(
            changes.as_slice(),
            [Change::NoteAdded {
                collection: CollectionKind::Inbox,
                ..
            }]
        ));
        assert_eq!(texts(&s, CollectionKind::Inbox), vec!["ciao"]);

        let changes = s.on_backend_event(BackendEvent::SpeechRecognized("   ".into()));
        assert!(matches!(changes.as_slice(), [Change::Rejected { .. }]));
    }

    #[test]
    fn speech_and_status_events_update_flags() {
        let mut s = session();
        s.on_backend_event(BackendEvent::SpeechStatus {
            kind: SpeechKind::Synthesis,
            active: true,
        });
        s.on_backend_event(BackendEvent::StatusChanged("Connected".into()));
        assert!(s.speech_active(SpeechKind::Synthesis));
        assert!(!s.speech_active(SpeechKind::Recognition));
        assert_eq!(s.backend_status(), "Connected");
    }

    #[test]
    fn invalid_theme_keeps_previous() {
        let mut s = session();
        s.set_theme(2).unwrap();
        let err = s.set_theme(11).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(ValidationError::ThemeOutOfRange { index: 11, .. })
        ));
        assert_eq!(s.theme().index(), 2);
    }

    #[test]
    fn apply_project_replaces_wholesale_and_clears_dirty() {
        let mut s = session();
        s.add_note(CollectionKind::Inbox, "old").unwrap();
        s.add_note(CollectionKind::Workspace, "old ws").unwrap();
        assert!(s.is_dirty());

        let mut donor = session();
        donor.add_note(CollectionKind::Inbox, "new").unwrap();
        let project = donor.to_project("loaded");

        s.apply_project(project);
        assert_eq!(texts(&s, CollectionKind::Inbox), vec!["new"]);
        assert!(s.collection(CollectionKind::Workspace).is_empty());
        assert_eq!(s.project_name(), Some("loaded"));
        assert!(!s.is_dirty());
    }

    #[test]
    fn log_snapshot_respects_enabled_flag() {
        let mut s = session();
        s.add_note(CollectionKind::Inbox, "x").unwrap();
        assert!(s.log_snapshot().contains("Added note to inbox"));
        s.set_log_enabled(false);
        assert_eq!(s.log_snapshot(), crate::log_buffer::DISABLED_PLACEHOLDER);
        s.clear_log();
        assert_eq!(s.log_snapshot(), crate::log_buffer::EMPTY_PLACEHOLDER);
    }
}
