use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use std::fmt;

pub type NoteId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Inbox,
    Workspace,
}

impl CollectionKind {
    pub fn label(&self) -> &'static str {
        match self {
            CollectionKind::Inbox => "inbox",
            CollectionKind::Workspace => "workspace",
        }
    }

    pub fn other(&self) -> CollectionKind {
        match self {
            CollectionKind::Inbox => CollectionKind::Workspace,
            CollectionKind::Workspace => CollectionKind::Inbox,
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: NoteId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("note text cannot be empty")]
    EmptyNote,
    #[error("prompt cannot be empty")]
    EmptyPrompt,
    #[error("theme index {index} out of range (0..{len})")]
    ThemeOutOfRange { index: usize, len: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("index {index} out of range for {collection} ({len} notes)")]
    IndexOutOfRange {
        collection: CollectionKind,
        index: usize,
        len: usize,
    },
    #[error("no note {id} in {collection}")]
    NoteNotFound {
        collection: CollectionKind,
        id: NoteId,
    },
    #[error(transparent)]
    Persistence(#[from] crate::storage::PersistenceError),
    #[error(transparent)]
    Backend(#[from] crate::backend::BackendError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteCollection {
    kind: CollectionKind,
    notes: Vec<Note>,
}

impl NoteCollection {
    pub fn new(kind: CollectionKind) -> Self {
        NoteCollection {
            kind,
            notes: Vec::new(),
        }
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.notes.iter().position(|n| n.id == id)
    }

    pub fn add(&mut self, text: &str) -> Result<Note, SessionError> {
        let text = normalize_text(text)?;
        let note = Note::new(self.fresh_id(), text);
        self.notes.push(note.clone());
        Ok(note)
    }

    /// Appends an existing note, keeping its timestamps. The id is replaced
    /// only if it collides with one already in this collection.
    pub fn adopt(&mut self, mut note: Note) -> Note {
        if self.get(&note.id).is_some() {
            note.id = self.fresh_id();
        }
        self.notes.push(note.clone());
        note
    }

    pub fn remove(&mut self, id: &str) -> Option<Note> {
        let idx = self.position(id)?;
        Some(self.notes.remove(idx))
    }

    pub fn remove_at(&mut self, index: usize) -> Result<Note, SessionError> {
        self.check_index(index, self.notes.len())?;
        Ok(self.notes.remove(index))
    }

    pub fn update(&mut self, id: &str, text: &str) -> Result<Option<Note>, SessionError> {
        let text = normalize_text(text)?;
        let note = match self.notes.iter_mut().find(|n| n.id == id) {
            Some(note) => note,
            None => return Ok(None),
        };
        note.text = text;
        note.updated_at = Utc::now();
        Ok(Some(note.clone()))
    }

    pub fn move_to(&mut self, id: &str, to_index: usize) -> Result<bool, SessionError> {
        let from = match self.position(id) {
            Some(idx) => idx,
            None => return Ok(false),
        };
        self.check_index(to_index, self.notes.len())?;
        if from != to_index {
            let note = self.notes.remove(from);
            self.notes.insert(to_index, note);
        }
        Ok(true)
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }

    /// Deep copy, detached from later mutations of this collection.
    pub fn snapshot(&self) -> Vec<Note> {
        self.notes.clone()
    }

    pub fn replace_all(&mut self, notes: Vec<Note>) {
        self.notes.clear();
        for note in notes {
            self.adopt(note);
        }
    }

    fn check_index(&self, index: usize, len: usize) -> Result<(), SessionError> {
        if index >= len {
            return Err(SessionError::IndexOutOfRange {
                collection: self.kind,
                index,
                len,
            });
        }
        Ok(())
    }

    fn fresh_id(&self) -> NoteId {
        loop {
            let id = generate_id();
            if self.get(&id).is_none() {
                return id;
            }
        }
    }
}

impl Note {
    pub fn new(id: NoteId, text: String) -> Self {
        let now = Utc::now();
        Note {
            id,
            text,
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn generate_id() -> NoteId {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect()
}

fn normalize_text(text: &str) -> Result<String, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyNote);
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(collection: &NoteCollection) -> Vec<&str> {
        collection.notes().iter().map(|n| n.text.as_str()).collect()
    }

    #[test]
    fn add_trims_and_rejects_blank_text() {
        let mut inbox = NoteCollection::new(CollectionKind::Inbox);
        let note = inbox.add("  hello  ").unwrap();
        assert_eq!(note.text, "hello");
        assert_eq!(note.created_at, note.updated_at);
        assert_eq!(note.id.len(), 6);

        let err = inbox.add("   \n").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(ValidationError::EmptyNote)
        ));
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn remove_missing_id_is_noop_but_bad_index_fails() {
        let mut inbox = NoteCollection::new(CollectionKind::Inbox);
        inbox.add("a").unwrap();
        assert!(inbox.remove("nope").is_none());
        assert_eq!(inbox.len(), 1);

        let err = inbox.remove_at(3).unwrap_err();
        assert!(matches!(
            err,
            SessionError::IndexOutOfRange {
                index: 3,
                len: 1,
                ..
            }
        ));
        assert_eq!(inbox.remove_at(0).unwrap().text, "a");
        assert!(inbox.is_empty());
    }

    #[test]
    fn update_refreshes_timestamp_and_ignores_missing() {
        let mut ws = NoteCollection::new(CollectionKind::Workspace);
        let note = ws.add("draft").unwrap();
        let updated = ws.update(&note.id, "final").unwrap().unwrap();
        assert_eq!(updated.text, "final");
        assert!(updated.updated_at >= note.updated_at);
        assert_eq!(updated.created_at, note.created_at);

        assert!(ws.update("missing", "x").unwrap().is_none());
        assert!(ws.update(&note.id, " ").is_err());
        assert_eq!(texts(&ws), vec!["final"]);
    }

    #[test]
    fn move_to_reorders_and_validates_target() {
        let mut inbox = NoteCollection::new(CollectionKind::Inbox);
        let a = inbox.add("a").unwrap();
        inbox.add("b").unwrap();
        inbox.add("c").unwrap();
        assert!(inbox.move_to(&a.id, 2).unwrap());
        assert_eq!(texts(&inbox), vec!["b", "c", "a"]);
        assert!(inbox.move_to(&a.id, 3).is_err());
        assert!(!inbox.move_to("missing", 0).unwrap());
    }

    #[test]
    fn snapshot_is_independent_copy() {
        let mut inbox = NoteCollection::new(CollectionKind::Inbox);
        inbox.add("a").unwrap();
        let snap = inbox.snapshot();
        inbox.clear();
        assert_eq!(snap.len(), 1);
        assert!(inbox.is_empty());
    }

    #[test]
    fn adopt_regenerates_colliding_id() {
        let mut ws = NoteCollection::new(CollectionKind::Workspace);
        let first = ws.add("a").unwrap();
        let clash = Note::new(first.id.clone(), "b".into());
        let adopted = ws.adopt(clash);
        assert_ne!(adopted.id, first.id);
        assert_eq!(ws.len(), 2);
    }
}
