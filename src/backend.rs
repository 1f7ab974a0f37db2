use crate::bus::{BackendEvent, BusSender};
use crate::correlator::RequestId;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::process::{Child, Command as Process, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpeechKind {
    Synthesis,
    Recognition,
}

impl SpeechKind {
    pub fn label(&self) -> &'static str {
        match self {
            SpeechKind::Synthesis => "tts",
            SpeechKind::Recognition => "voice",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("{0} is not available")]
    Unavailable(String),
    #[error("nothing to read aloud")]
    NothingToSpeak,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

/// AI inference collaborator. Calls return immediately; outcomes arrive
/// later on the bus as [`BackendEvent`]s.
pub trait AiBackend: Send {
    fn send_prompt(&self, request: &RequestId, prompt: &str, model: &str);
    fn load_models(&self);
}

/// Speech collaborator driven by start/stop toggles. Activity is reported
/// asynchronously through [`BackendEvent::SpeechStatus`].
pub trait SpeechEngine: Send {
    fn start(&self, kind: SpeechKind, text: Option<&str>) -> Result<(), BackendError>;
    fn stop(&self, kind: SpeechKind) -> Result<(), BackendError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

pub struct OllamaBackend {
    base_url: String,
    client: reqwest::blocking::Client,
    events: BusSender,
}

impl OllamaBackend {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        events: BusSender,
    ) -> Result<Self, BackendError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;
        Ok(OllamaBackend {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            events,
        })
    }

    fn generate(
        client: &reqwest::blocking::Client,
        base_url: &str,
        model: &str,
        prompt: &str,
    ) -> Result<String, BackendError> {
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
        };
        let response = client
            .post(format!("{base_url}/api/generate"))
            .json(&body)
            .send()?
            .error_for_status()?
            .json::<GenerateResponse>()?;
        Ok(response.response)
    }

    fn tags(
        client: &reqwest::blocking::Client,
        base_url: &str,
    ) -> Result<Vec<String>, BackendError> {
        let response = client
            .get(format!("{base_url}/api/tags"))
            .send()?
            .error_for_status()?
            .json::<TagsResponse>()?;
        Ok(response.models.into_iter().map(|m| m.name).collect())
    }
}

impl AiBackend for OllamaBackend {
    fn send_prompt(&self, request: &RequestId, prompt: &str, model: &str) {
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let events = self.events.clone();
        let request = request.clone();
        let prompt = prompt.to_string();
        let model = model.to_string();
        thread::spawn(move || {
            events.backend(BackendEvent::StatusChanged("Sending request...".into()));
            info!("event=ai_request_sent request={} model={}", request, model);
            match OllamaBackend::generate(&client, &base_url, &model, &prompt) {
                Ok(response) => {
                    debug!(
                        "event=ai_response request={} chars={}",
                        request,
                        response.chars().count()
                    );
                    events.backend(BackendEvent::ResponseReceived {
                        request: Some(request),
                        prompt,
                        response,
                    });
                    events.backend(BackendEvent::StatusChanged("Response received".into()));
                }
                Err(err) => {
                    warn!("event=ai_request_failed request={} error={}", request, err);
                    events.backend(BackendEvent::ErrorOccurred {
                        request: Some(request),
                        prompt: Some(prompt),
                        message: err.to_string(),
                    });
                    events.backend(BackendEvent::StatusChanged("Error".into()));
                }
            }
        });
    }

    fn load_models(&self) {
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let events = self.events.clone();
        thread::spawn(move || {
            events.backend(BackendEvent::StatusChanged("Loading models...".into()));
            match OllamaBackend::tags(&client, &base_url) {
                Ok(models) => {
                    events.backend(BackendEvent::ModelsLoaded(models));
                    events.backend(BackendEvent::StatusChanged("Models loaded".into()));
                }
                Err(err) => {
                    events.backend(BackendEvent::ErrorOccurred {
                        request: None,
                        prompt: None,
                        message: err.to_string(),
                    });
                    events.backend(BackendEvent::StatusChanged("Not connected".into()));
                }
            }
        });
    }
}

/// Reads text aloud with an external program (`espeak-ng`, `say`, ...).
/// Speech recognition has no local engine here and reports unavailable.
pub struct CommandSpeech {
    program: String,
    events: BusSender,
    child: Arc<Mutex<Option<Child>>>,
}

impl CommandSpeech {
    pub fn new(program: impl Into<String>, events: BusSender) -> Self {
        CommandSpeech {
            program: program.into(),
            events,
            child: Arc::new(Mutex::new(None)),
        }
    }
}

impl SpeechEngine for CommandSpeech {
    fn start(&self, kind: SpeechKind, text: Option<&str>) -> Result<(), BackendError> {
        if kind == SpeechKind::Recognition {
            return Err(BackendError::Unavailable("speech recognition".into()));
        }
        let text = text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(BackendError::NothingToSpeak)?;

        let mut slot = self.child.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(mut previous) = slot.take() {
            let _ = previous.kill();
        }
        let child = Process::new(&self.program)
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| BackendError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        *slot = Some(child);
        drop(slot);

        self.events.backend(BackendEvent::SpeechStatus { kind, active: true });
        let events = self.events.clone();
        let shared = Arc::clone(&self.child);
        thread::spawn(move || loop {
            thread::sleep(Duration::from_millis(100));
            let mut slot = shared.lock().unwrap_or_else(|p| p.into_inner());
            let finished = match slot.as_mut() {
                Some(child) => !matches!(child.try_wait(), Ok(None)),
                None => true,
            };
            if finished {
                slot.take();
                drop(slot);
                events.backend(BackendEvent::SpeechStatus { kind, active: false });
                break;
            }
        });
        Ok(())
    }

    fn stop(&self, kind: SpeechKind) -> Result<(), BackendError> {
        if kind == SpeechKind::Recognition {
            return Err(BackendError::Unavailable("speech recognition".into()));
        }
        let mut slot = self.child.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(child) = slot.as_mut() {
            let _ = child.kill();
        }
        Ok(())
    }
}
