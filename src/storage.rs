use crate::model::{CollectionKind, Note, NoteCollection};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use log::{info, warn};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const PROJECT_VERSION: &str = "1.0";
const PROJECT_EXTENSION: &str = "json";

pub type FileId = String;

#[derive(thiserror::Error, Debug)]
pub enum PersistenceError {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt project {file_id}: {reason}")]
    CorruptProject { file_id: String, reason: String },
    #[error("serializing document: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("project not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMetadata {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub metadata: ProjectMetadata,
    pub inbox: Vec<Note>,
    pub workspace: Vec<Note>,
}

impl Project {
    pub fn new(name: impl Into<String>, inbox: Vec<Note>, workspace: Vec<Note>) -> Self {
        Project {
            metadata: ProjectMetadata {
                name: name.into(),
                created_at: Utc::now(),
                version: PROJECT_VERSION.to_string(),
            },
            inbox,
            workspace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSummary {
    pub file_id: FileId,
    pub name: String,
    pub created: Option<DateTime<Utc>>,
    pub modified_at: DateTime<Utc>,
    pub inbox_count: usize,
    pub workspace_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct NoteRecord {
    text: String,
    order: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataDocument {
    name: String,
    #[serde(default)]
    created: Option<String>,
    #[serde(default = "default_version")]
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProjectDocument {
    metadata: MetadataDocument,
    #[serde(alias = "inbox")]
    pensierini: Vec<NoteRecord>,
    workspace: Vec<NoteRecord>,
}

#[derive(Debug, Deserialize)]
struct CatalogMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    created: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    metadata: CatalogMetadata,
    #[serde(alias = "inbox")]
    pensierini: Vec<IgnoredAny>,
    workspace: Vec<IgnoredAny>,
}

#[derive(Debug, Serialize)]
struct ExportDocument {
    export_timestamp: DateTime<Utc>,
    pensierini_count: usize,
    pensierini: Vec<NoteRecord>,
}

#[derive(Debug, Clone)]
pub struct PersistenceManager {
    projects_dir: PathBuf,
    exports_dir: PathBuf,
}

impl PersistenceManager {
    pub fn new(
        projects_dir: impl Into<PathBuf>,
        exports_dir: impl Into<PathBuf>,
    ) -> Result<Self, PersistenceError> {
        let manager = PersistenceManager {
            projects_dir: projects_dir.into(),
            exports_dir: exports_dir.into(),
        };
        create_dir(&manager.projects_dir)?;
        create_dir(&manager.exports_dir)?;
        Ok(manager)
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    pub fn save(&self, project: &Project) -> Result<FileId, PersistenceError> {
        let document = ProjectDocument {
            metadata: MetadataDocument {
                name: project.metadata.name.clone(),
                created: Some(project.metadata.created_at.to_rfc3339()),
                version: project.metadata.version.clone(),
            },
            pensierini: to_records(&project.inbox),
            workspace: to_records(&project.workspace),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        let stem = format!(
            "{}_{}",
            sanitize(&project.metadata.name),
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        let file_id = unused_stem(&self.projects_dir, &stem);
        let path = self.project_path(&file_id);
        write_atomic(&self.projects_dir, &path, &bytes)?;
        info!(
            "event=project_saved file={} inbox={} workspace={}",
            path.display(),
            project.inbox.len(),
            project.workspace.len()
        );
        Ok(file_id)
    }

    pub fn load(&self, file_id: &str) -> Result<Project, PersistenceError> {
        let path = self.existing_project_path(file_id)?;
        let data = fs::read_to_string(&path).map_err(|source| PersistenceError::Io {
            path: path.clone(),
            source,
        })?;
        let document: ProjectDocument =
            serde_json::from_str(&data).map_err(|err| PersistenceError::CorruptProject {
                file_id: file_id.to_string(),
                reason: err.to_string(),
            })?;

        let created_at = match document.metadata.created.as_deref() {
            Some(raw) => parse_timestamp(raw).ok_or_else(|| PersistenceError::CorruptProject {
                file_id: file_id.to_string(),
                reason: format!("invalid created timestamp `{raw}`"),
            })?,
            None => Utc::now(),
        };

        let project = Project {
            metadata: ProjectMetadata {
                name: document.metadata.name,
                created_at,
                version: document.metadata.version,
            },
            inbox: from_records(CollectionKind::Inbox, document.pensierini),
            workspace: from_records(CollectionKind::Workspace, document.workspace),
        };
        info!(
            "event=project_loaded file={} inbox={} workspace={}",
            path.display(),
            project.inbox.len(),
            project.workspace.len()
        );
        Ok(project)
    }

    pub fn list(&self) -> Result<Vec<ProjectSummary>, PersistenceError> {
        let entries = fs::read_dir(&self.projects_dir).map_err(|source| PersistenceError::Io {
            path: self.projects_dir.clone(),
            source,
        })?;
        let mut summaries = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let file_id = match project_file_id(&path) {
                Some(id) => id,
                None => continue,
            };
            match read_summary(&path, &file_id) {
                Ok(summary) => summaries.push(summary),
                Err(err) => warn!("event=project_skipped file={} reason={}", path.display(), err),
            }
        }
        summaries.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| b.file_id.cmp(&a.file_id))
        });
        Ok(summaries)
    }

    pub fn delete(&self, file_id: &str) -> Result<(), PersistenceError> {
        let path = self.existing_project_path(file_id)?;
        fs::remove_file(&path).map_err(|source| PersistenceError::Io {
            path: path.clone(),
            source,
        })?;
        info!("event=project_deleted file={}", path.display());
        Ok(())
    }

    pub fn export_inbox(&self, notes: &[Note]) -> Result<PathBuf, PersistenceError> {
        let now = Utc::now();
        let document = ExportDocument {
            export_timestamp: now,
            pensierini_count: notes.len(),
            pensierini: to_records(notes),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;
        let stem = format!("pensierini_export_{}", now.format("%Y%m%d_%H%M%S"));
        let path = self.exports_dir.join(format!(
            "{}.{PROJECT_EXTENSION}",
            unused_stem(&self.exports_dir, &stem)
        ));
        write_atomic(&self.exports_dir, &path, &bytes)?;
        info!("event=inbox_exported file={} count={}", path.display(), notes.len());
        Ok(path)
    }

    fn project_path(&self, file_id: &str) -> PathBuf {
        self.projects_dir
            .join(format!("{file_id}.{PROJECT_EXTENSION}"))
    }

    fn existing_project_path(&self, file_id: &str) -> Result<PathBuf, PersistenceError> {
        if !is_valid_file_id(file_id) {
            return Err(PersistenceError::NotFound(file_id.to_string()));
        }
        let path = self.project_path(file_id);
        if !path.is_file() {
            return Err(PersistenceError::NotFound(file_id.to_string()));
        }
        Ok(path)
    }
}

/// Replaces anything outside word characters, `-` and `.` with `_`,
/// collapses runs of `_` and of `.` and trims them (and leading dots) from
/// the edges. The result never contains `..`.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        let mapped = if ch.is_alphanumeric() || ch == '-' || ch == '.' {
            ch
        } else {
            '_'
        };
        if (mapped == '_' || mapped == '.') && out.ends_with(mapped) {
            continue;
        }
        out.push(mapped);
    }
    let trimmed = out
        .trim_start_matches(|c| c == '_' || c == '.')
        .trim_end_matches('_');
    if trimmed.is_empty() {
        "progetto".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn default_project_name() -> String {
    format!("progetto_{}", Local::now().format("%Y%m%d_%H%M%S"))
}

fn unused_stem(dir: &Path, stem: &str) -> String {
    let mut candidate = stem.to_string();
    let mut n = 2;
    while dir.join(format!("{candidate}.{PROJECT_EXTENSION}")).exists() {
        candidate = format!("{stem}_{n}");
        n += 1;
    }
    candidate
}

fn is_valid_file_id(file_id: &str) -> bool {
    !file_id.is_empty()
        && !file_id.starts_with('.')
        && !file_id.contains(['/', '\\'])
        && !file_id.contains("..")
}

fn project_file_id(path: &Path) -> Option<FileId> {
    if path.extension().and_then(|e| e.to_str()) != Some(PROJECT_EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if !is_valid_file_id(stem) {
        return None;
    }
    Some(stem.to_string())
}

fn read_summary(path: &Path, file_id: &str) -> Result<ProjectSummary, PersistenceError> {
    let io_err = |source: std::io::Error| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(io_err)?;
    let file = File::open(path).map_err(io_err)?;
    let document: CatalogDocument = serde_json::from_reader(BufReader::new(file)).map_err(|err| {
        PersistenceError::CorruptProject {
            file_id: file_id.to_string(),
            reason: err.to_string(),
        }
    })?;
    Ok(ProjectSummary {
        file_id: file_id.to_string(),
        name: document
            .metadata
            .name
            .unwrap_or_else(|| file_id.to_string()),
        created: document.metadata.created.as_deref().and_then(parse_timestamp),
        modified_at: DateTime::<Utc>::from(modified),
        inbox_count: document.pensierini.len(),
        workspace_count: document.workspace.len(),
    })
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let io_err = |source: std::io::Error| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist_noclobber(path).map_err(|err| io_err(err.error))?;
    Ok(())
}

fn create_dir(dir: &Path) -> Result<(), PersistenceError> {
    fs::create_dir_all(dir).map_err(|source| PersistenceError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn to_records(notes: &[Note]) -> Vec<NoteRecord> {
    notes
        .iter()
        .enumerate()
        .map(|(order, note)| NoteRecord {
            text: note.text.clone(),
            order,
        })
        .collect()
}

fn from_records(kind: CollectionKind, mut records: Vec<NoteRecord>) -> Vec<Note> {
    records.sort_by_key(|r| r.order);
    let mut collection = NoteCollection::new(kind);
    for record in records {
        if collection.add(&record.text).is_err() {
            warn!("event=blank_note_skipped collection={} order={}", kind, record.order);
        }
    }
    collection.snapshot()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn default_version() -> String {
    PROJECT_VERSION.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> PersistenceManager {
        PersistenceManager::new(dir.path().join("projects"), dir.path().join("exports")).unwrap()
    }

    fn notes(kind: CollectionKind, texts: &[&str]) -> Vec<Note> {
        let mut c = NoteCollection::new(kind);
        for t in texts {
            c.add(t).unwrap();
        }
        c.snapshot()
    }

    fn texts(notes: &[Note]) -> Vec<&str> {
        notes.iter().map(|n| n.text.as_str()).collect()
    }

    #[test]
    fn save_then_load_round_trips_text_and_order() {
        let dir = TempDir::new().unwrap();
        let store = manager(&dir);
        let project = Project::new(
            "Compiti di storia",
            notes(CollectionKind::Inbox, &["a", "b", "c"]),
            notes(CollectionKind::Workspace, &["a"]),
        );
        let file_id = store.save(&project).unwrap();
        assert!(file_id.starts_with("Compiti_di_storia_"));

        let loaded = store.load(&file_id).unwrap();
        assert_eq!(texts(&loaded.inbox), vec!["a", "b", "c"]);
        assert_eq!(texts(&loaded.workspace), vec!["a"]);
        assert_eq!(loaded.metadata.name, "Compiti di storia");
        assert_eq!(loaded.metadata.version, PROJECT_VERSION);
    }

    #[test]
    fn saved_document_uses_pensierini_key_and_order() {
        let dir = TempDir::new().unwrap();
        let store = manager(&dir);
        let project = Project::new("x", notes(CollectionKind::Inbox, &["one", "two"]), vec![]);
        let file_id = store.save(&project).unwrap();
        let raw = fs::read_to_string(store.project_path(&file_id)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["pensierini"][1]["text"], "two");
        assert_eq!(value["pensierini"][1]["order"], 1);
        assert_eq!(value["metadata"]["version"], "1.0");
        assert!(value["workspace"].as_array().unwrap().is_empty());
    }

    #[test]
    fn repeated_saves_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let store = manager(&dir);
        let project = Project::new("same", vec![], vec![]);
        let first = store.save(&project).unwrap();
        let second = store.save(&project).unwrap();
        assert_ne!(first, second);
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn load_accepts_legacy_inbox_key_and_sorts_by_order() {
        let dir = TempDir::new().unwrap();
        let store = manager(&dir);
        let doc = r#"{
            "metadata": {
                "name": "legacy",
                "created": "2024-03-01T10:15:30.123456",
                "version": "1.0"
            },
            "inbox": [
                {"text": "second", "order": 1},
                {"text": "first", "order": 0},
                {"text": "  ", "order": 2}
            ],
            "workspace": []
        }"#;
        fs::write(store.projects_dir().join("legacy.json"), doc).unwrap();
        let project = store.load("legacy").unwrap();
        assert_eq!(texts(&project.inbox), vec!["first", "second"]);
        assert!(project.workspace.is_empty());
    }

    #[test]
    fn missing_keys_are_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = manager(&dir);
        fs::write(
            store.projects_dir().join("broken.json"),
            r#"{"metadata": {"name": "b"}, "pensierini": []}"#,
        )
        .unwrap();
        fs::write(store.projects_dir().join("garbage.json"), "{not json").unwrap();

        assert!(matches!(
            store.load("broken"),
            Err(PersistenceError::CorruptProject { .. })
        ));
        assert!(matches!(
            store.load("garbage"),
            Err(PersistenceError::CorruptProject { .. })
        ));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn unknown_or_escaping_ids_are_not_found() {
        let dir = TempDir::new().unwrap();
        let store = manager(&dir);
        assert!(matches!(store.load("missing"), Err(PersistenceError::NotFound(_))));
        assert!(matches!(
            store.load("../projects/x"),
            Err(PersistenceError::NotFound(_))
        ));
        assert!(matches!(store.delete("nope"), Err(PersistenceError::NotFound(_))));
    }

    #[test]
    fn list_reports_counts_most_recent_first() {
        let dir = TempDir::new().unwrap();
        let store = manager(&dir);
        let old = store
            .save(&Project::new("old", notes(CollectionKind::Inbox, &["a"]), vec![]))
            .unwrap();
        let old_path = store.project_path(&old);
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&old_path)
            .unwrap()
            .set_modified(past)
            .unwrap();
        let new = store
            .save(&Project::new(
                "new",
                notes(CollectionKind::Inbox, &["a", "b"]),
                notes(CollectionKind::Workspace, &["c"]),
            ))
            .unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].file_id, new);
        assert_eq!(listed[0].name, "new");
        assert_eq!((listed[0].inbox_count, listed[0].workspace_count), (2, 1));
        assert_eq!(listed[1].file_id, old);
        assert!(listed[1].created.is_some());
    }

    #[test]
    fn delete_removes_project() {
        let dir = TempDir::new().unwrap();
        let store = manager(&dir);
        let id = store.save(&Project::new("gone", vec![], vec![])).unwrap();
        store.delete(&id).unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn export_writes_count_and_records() {
        let dir = TempDir::new().unwrap();
        let store = manager(&dir);
        let path = store
            .export_inbox(&notes(CollectionKind::Inbox, &["x", "y"]))
            .unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["pensierini_count"], 2);
        assert_eq!(value["pensierini"][0]["text"], "x");
        assert!(value["export_timestamp"].is_string());
    }

    #[test]
    fn sanitize_collapses_and_trims() {
        assert_eq!(sanitize("  Il mio / progetto!! "), "Il_mio_progetto");
        assert_eq!(sanitize("../etc"), "etc");
        assert_eq!(sanitize("***"), "progetto");
        assert_eq!(sanitize("città-2.0"), "città-2.0");
        assert_eq!(sanitize("Idee..."), "Idee.");
        assert_eq!(sanitize("a.. .b"), "a._.b");
    }

    #[test]
    fn names_with_dot_runs_stay_listable_and_loadable() {
        let dir = TempDir::new().unwrap();
        let store = manager(&dir);
        let file_id = store
            .save(&Project::new("Idee...", notes(CollectionKind::Inbox, &["a"]), vec![]))
            .unwrap();
        assert!(!file_id.contains(".."));

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].file_id, file_id);
        let loaded = store.load(&file_id).unwrap();
        assert_eq!(loaded.metadata.name, "Idee...");
        assert_eq!(texts(&loaded.inbox), vec!["a"]);
    }
}
