use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use magic_link::{AgentLink, MediaBlob, split_data_uri};
use prompt_magic::{
    ClientSettings, EditRequest, LocalImage, Screen, Session, SessionOptions, SettingsError,
    SettingsStore, UserAction,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prompt-magic")]
#[command(about = "Turn a voice note, text or picture into a generated image", long_about = None)]
struct Cli {
    /// Text prompt, or the edit instruction when combined with --image
    #[arg(long, required_unless_present = "audio")]
    prompt: Option<String>,

    /// Recorded audio prompt
    #[arg(long, conflicts_with = "prompt")]
    audio: Option<PathBuf>,

    /// Image to edit instead of generating from scratch
    #[arg(long)]
    image: Option<PathBuf>,

    /// Follow-up edit instruction; repeat to chain edits on each result
    #[arg(long = "edit", value_name = "TEXT")]
    edits: Vec<String>,

    /// Agent WebSocket URL, overriding settings
    #[arg(long)]
    agent_url: Option<String>,

    /// Give up after this many seconds without an agent response
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Settings file to read instead of the per-user default
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write --agent-url and --timeout-secs to the settings file before running
    #[arg(long)]
    save_settings: bool,
}

impl Cli {
    fn settings(&self) -> Result<ClientSettings, SettingsError> {
        let store = match &self.config {
            Some(path) => SettingsStore::new(path.clone()),
            None => SettingsStore::load(),
        };

        let settings = (*store.settings())
            .clone()
            .with_overrides(self.agent_url.as_deref(), self.timeout_secs);
        if !self.save_settings {
            return Ok(settings);
        }

        let saved = store.update(settings)?;
        println!("saved settings to {}", store.config_path().display());
        Ok((*saved).clone())
    }

    fn first_action(&self) -> UserAction {
        let images: Vec<LocalImage> = self.image.iter().map(LocalImage::from_file).collect();
        let audio = self.audio.as_ref().map(|path| {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            MediaBlob::from_file(path).with_mime(mime.essence_str())
        });

        match (audio, &self.prompt) {
            (Some(audio), _) if images.is_empty() => UserAction::SubmitVoice { audio },
            (Some(audio), _) => UserAction::SubmitVoiceWithImage { audio, images },
            (None, Some(prompt)) if images.is_empty() => UserAction::SubmitText {
                text: prompt.clone(),
            },
            (None, prompt) => UserAction::SubmitImagePrompt {
                prompt: prompt.clone().unwrap_or_default(),
                images,
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = match cli.settings() {
        Ok(settings) => settings,
        Err(error) => {
            eprintln!("error: {error}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(agent_url = %settings.agent_url, "connecting to agent");

    let handle = AgentLink::connect(settings.link_config());
    tokio::spawn(handle.worker);

    let mut session = Session::new(
        handle.link.sender(),
        SessionOptions::from_settings(&settings),
    );
    let mut screens = session.subscribe();
    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    let driver = tokio::spawn(session.run(handle.link, actions_rx));

    let _ = actions_tx.send(cli.first_action());
    let mut pending_edits: VecDeque<String> = cli.edits.into();
    let mut printed_thought = 0;

    let code = loop {
        let Some(screen) = screens.recv().await else {
            eprintln!("session ended unexpectedly");
            break ExitCode::FAILURE;
        };

        match &screen {
            Screen::Generating { phase, thought } => {
                if thought.len() < printed_thought || thought.is_empty() {
                    println!("generating ({phase:?})");
                    printed_thought = 0;
                }
                if thought.len() > printed_thought {
                    println!("  thinking: {}", &thought[printed_thought..]);
                    printed_thought = thought.len();
                }
            }
            Screen::Display(result) => {
                printed_thought = 0;
                if let Some(prompt) = &result.magic_prompt {
                    println!("prompt: {prompt}");
                }
                println!("image: {}", describe_image(&result.image_url));

                match pending_edits.pop_front() {
                    Some(edit) => {
                        println!("editing: {edit}");
                        let request = EditRequest::default().with_text(edit);
                        let _ = actions_tx.send(UserAction::SubmitEdit(request));
                    }
                    None => break ExitCode::SUCCESS,
                }
            }
            Screen::Error { message } => {
                eprintln!("error: {message}");
                break ExitCode::FAILURE;
            }
            Screen::Home { .. } | Screen::PromptIdeas => {}
        }
    };

    drop(actions_tx);
    if let Err(error) = driver.await {
        tracing::warn!(error = %error, "session task did not shut down cleanly");
    }
    code
}

fn describe_image(url: &str) -> String {
    match split_data_uri(url) {
        Some((mime, payload)) => format!("{mime}, {} base64 chars", payload.len()),
        None => url.to_string(),
    }
}
