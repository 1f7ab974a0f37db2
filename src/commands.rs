use crate::backend::{AiBackend, CommandSpeech, OllamaBackend};
use crate::bus::{BackendEvent, Change, Command, EventBus, Message};
use crate::config::{save_settings, AppDirs, Settings};
use crate::controller::Controller;
use crate::correlator::RequestStatus;
use crate::model::Note;
use crate::session::SessionState;
use crate::storage::PersistenceManager;
use crate::ui;
use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use log::info;
use std::time::Duration;

pub fn projects(dirs: &AppDirs, settings: &Settings) -> Result<()> {
    let store = open_store(dirs, settings)?;
    let projects = store.list().context("listing projects")?;
    println!("Projects in {}", store.projects_dir().display());
    if projects.is_empty() {
        println!("  (none)");
    }
    for p in projects {
        let created = p
            .created
            .map(|c| c.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".into());
        println!(
            "  {}  {}  [{} inbox, {} workspace]  created {}  modified {}",
            p.file_id,
            p.name,
            p.inbox_count,
            p.workspace_count,
            created,
            p.modified_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

pub fn show(dirs: &AppDirs, settings: &Settings, file_id: String) -> Result<()> {
    let store = open_store(dirs, settings)?;
    let project = store
        .load(&file_id)
        .with_context(|| format!("loading project {}", file_id))?;
    println!(
        "{} (created {}, format {})",
        project.metadata.name,
        project
            .metadata
            .created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M"),
        project.metadata.version
    );
    print_notes("Pensierini", &project.inbox);
    print_notes("Workspace", &project.workspace);
    Ok(())
}

pub fn export(dirs: &AppDirs, settings: &Settings, file_id: String) -> Result<()> {
    let store = open_store(dirs, settings)?;
    let project = store
        .load(&file_id)
        .with_context(|| format!("loading project {}", file_id))?;
    let path = store
        .export_inbox(&project.inbox)
        .context("exporting inbox")?;
    println!(
        "Exported {} notes from {} to {}",
        project.inbox.len(),
        file_id,
        path.display()
    );
    Ok(())
}

pub fn delete(dirs: &AppDirs, settings: &Settings, file_id: String) -> Result<()> {
    let store = open_store(dirs, settings)?;
    store
        .delete(&file_id)
        .with_context(|| format!("deleting project {}", file_id))?;
    println!("Deleted {}", file_id);
    Ok(())
}

pub fn ask(
    dirs: &AppDirs,
    settings: &Settings,
    prompt: String,
    model: Option<String>,
    timeout: Option<u64>,
) -> Result<()> {
    let mut settings = settings.clone();
    if let Some(secs) = timeout {
        settings.request_timeout_secs = secs;
    }
    let mut controller = build_controller(dirs, &settings)?;
    let rx = controller.subscribe();
    let sender = controller.sender();
    if let Some(model) = model {
        sender.intent(Command::SelectModel(model));
    }
    sender.intent(Command::SendPrompt(prompt));
    controller.pump();
    if let Some(reason) = rx.try_iter().find_map(|change| match change {
        Change::Rejected { reason } => Some(reason),
        _ => None,
    }) {
        bail!(reason);
    }

    // HTTP timeout applies inside the backend thread; margin is for delivery.
    let wait = Duration::from_secs(settings.request_timeout_secs + 5);
    let done = controller.wait_until(wait, |session| {
        session.requests().pending_count() == 0
    });
    if !done {
        bail!("no answer within {}s", settings.request_timeout_secs);
    }

    let request = controller
        .session()
        .requests()
        .entries()
        .first()
        .ok_or_else(|| anyhow!("request was not recorded"))?;
    let text = request.response.clone().unwrap_or_default();
    match request.status {
        RequestStatus::Resolved => {
            println!("{}", text);
            Ok(())
        }
        _ => bail!(text),
    }
}

pub fn models(settings: &Settings) -> Result<()> {
    let bus = EventBus::new();
    let timeout = Duration::from_secs(settings.request_timeout_secs);
    let backend = OllamaBackend::new(&settings.ollama_url, timeout, bus.sender())
        .context("creating AI client")?;
    backend.load_models();
    while let Some(message) = bus.next_timeout(timeout + Duration::from_secs(5)) {
        match message {
            Message::Backend(BackendEvent::ModelsLoaded(models)) => {
                if models.is_empty() {
                    println!("No models installed at {}", settings.ollama_url);
                }
                for model in models {
                    let marker = if model == settings.ai_model { "*" } else { " " };
                    println!("{} {}", marker, model);
                }
                return Ok(());
            }
            Message::Backend(BackendEvent::ErrorOccurred { message, .. }) => {
                bail!("AI service error: {}", message);
            }
            _ => {}
        }
    }
    bail!("no answer from {}", settings.ollama_url)
}

pub fn tui(dirs: &AppDirs, settings: Settings) -> Result<()> {
    let controller = build_controller(dirs, &settings)?;
    let controller = ui::run(controller)?;

    let session = controller.session();
    let settings = Settings {
        theme: session.theme().index(),
        ai_model: session.selected_model().to_string(),
        log_panel_enabled: session.log_enabled(),
        ..settings
    };
    save_settings(&dirs.settings_path(), &settings)?;
    info!("event=settings_saved path={}", dirs.settings_path().display());
    Ok(())
}

fn open_store(dirs: &AppDirs, settings: &Settings) -> Result<PersistenceManager> {
    let projects = settings.projects_dir(dirs);
    let exports = settings.exports_dir(dirs);
    PersistenceManager::new(&projects, &exports)
        .with_context(|| format!("opening project store at {}", projects.display()))
}

fn build_controller(dirs: &AppDirs, settings: &Settings) -> Result<Controller> {
    let store = open_store(dirs, settings)?;
    let bus = EventBus::new();
    let ai = OllamaBackend::new(
        &settings.ollama_url,
        Duration::from_secs(settings.request_timeout_secs),
        bus.sender(),
    )
    .context("creating AI client")?;
    let speech = settings
        .tts_command
        .as_ref()
        .map(|program| CommandSpeech::new(program.clone(), bus.sender()));

    let session = SessionState::from_settings(settings);
    let controller = Controller::new(session, store, bus, Box::new(ai));
    Ok(match speech {
        Some(speech) => controller.with_speech(Box::new(speech)),
        None => controller,
    })
}

fn print_notes(title: &str, notes: &[Note]) {
    println!("{} ({})", title, notes.len());
    if notes.is_empty() {
        println!("  (empty)");
    }
    for (idx, note) in notes.iter().enumerate() {
        println!("  {:>3}. {}", idx + 1, note.text);
    }
}
