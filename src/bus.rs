use crate::backend::SpeechKind;
use crate::correlator::{RequestHandle, RequestId};
use crate::model::{CollectionKind, Note, NoteId};
use crate::storage::FileId;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Intents originating from a front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddNote {
        collection: CollectionKind,
        text: String,
    },
    RemoveNote {
        collection: CollectionKind,
        id: NoteId,
    },
    RemoveAt {
        collection: CollectionKind,
        index: usize,
    },
    UpdateNote {
        collection: CollectionKind,
        id: NoteId,
        text: String,
    },
    MoveNote {
        collection: CollectionKind,
        id: NoteId,
        to_index: usize,
    },
    TransferNote {
        from: CollectionKind,
        id: NoteId,
    },
    ClearCollection(CollectionKind),
    SendPrompt(String),
    /// Ask the AI service to rewrite a note's text.
    RephraseNote {
        collection: CollectionKind,
        id: NoteId,
    },
    SelectModel(String),
    RefreshModels,
    ClearFinishedRequests,
    SetTheme(usize),
    RandomTheme,
    ResetTheme,
    SetLogPanel(bool),
    ClearLog,
    SaveProject {
        name: Option<String>,
    },
    LoadProject(FileId),
    ExportInbox,
    ToggleSpeech {
        kind: SpeechKind,
        text: Option<String>,
    },
}

/// Outcomes reported by backend collaborators, possibly from other threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    ResponseReceived {
        request: Option<RequestId>,
        prompt: String,
        response: String,
    },
    ErrorOccurred {
        request: Option<RequestId>,
        prompt: Option<String>,
        message: String,
    },
    ModelsLoaded(Vec<String>),
    StatusChanged(String),
    SpeechStatus {
        kind: SpeechKind,
        active: bool,
    },
    SpeechRecognized(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Intent(Command),
    Backend(BackendEvent),
}

/// State changes published to subscribers after a message is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    NoteAdded {
        collection: CollectionKind,
        note: Note,
    },
    NoteRemoved {
        collection: CollectionKind,
        id: NoteId,
    },
    NoteUpdated {
        collection: CollectionKind,
        note: Note,
    },
    NoteMoved {
        collection: CollectionKind,
        id: NoteId,
        to_index: usize,
    },
    NoteTransferred {
        from: CollectionKind,
        to: CollectionKind,
        note: Note,
    },
    CollectionCleared(CollectionKind),
    RequestSubmitted {
        handle: RequestHandle,
        id: RequestId,
    },
    RequestResolved(RequestHandle),
    RequestErrored(RequestHandle),
    RequestsPruned(usize),
    CorrelationMiss,
    DuplicateResolution(RequestHandle),
    BackendError(String),
    ModelsLoaded(Vec<String>),
    ModelSelected(String),
    BackendStatus(String),
    ThemeChanged(usize),
    LogPanelToggled(bool),
    LogCleared,
    ProjectSaved {
        file_id: FileId,
    },
    ProjectLoaded {
        name: String,
    },
    InboxExported(PathBuf),
    SpeechStatus {
        kind: SpeechKind,
        active: bool,
    },
    Rejected {
        reason: String,
    },
}

/// Cloneable producer handle. Sends fail silently once the bus is gone so
/// late backend threads never panic.
#[derive(Debug, Clone)]
pub struct BusSender(Sender<Message>);

impl BusSender {
    pub fn intent(&self, command: Command) -> bool {
        self.0.send(Message::Intent(command)).is_ok()
    }

    pub fn backend(&self, event: BackendEvent) -> bool {
        self.0.send(Message::Backend(event)).is_ok()
    }
}

/// Single-consumer queue for incoming messages plus fan-out of changes.
pub struct EventBus {
    tx: Sender<Message>,
    rx: Receiver<Message>,
    subscribers: Vec<Sender<Change>>,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        EventBus {
            tx,
            rx,
            subscribers: Vec::new(),
        }
    }

    pub fn sender(&self) -> BusSender {
        BusSender(self.tx.clone())
    }

    pub fn subscribe(&mut self) -> Receiver<Change> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Delivers to every live subscriber and drops the ones whose receiver
    /// has gone away. Returns how many received the change.
    pub fn publish(&mut self, change: &Change) -> usize {
        self.subscribers
            .retain(|subscriber| subscriber.send(change.clone()).is_ok());
        self.subscribers.len()
    }

    pub fn try_next(&self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    pub fn next_timeout(&self, timeout: Duration) -> Option<Message> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}
