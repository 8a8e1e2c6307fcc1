use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use magic_link::{DEFAULT_AGENT_URL, DEFAULT_CONNECT_TIMEOUT, LinkConfig};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "prompt-magic";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "PROMPT_MAGIC_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_agent_url")]
    pub agent_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Unset means a pending request may stay in `Generating` until reset.
    #[serde(default)]
    pub generating_timeout_secs: Option<u64>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            agent_url: default_agent_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            generating_timeout_secs: None,
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        self.agent_url = if self.agent_url.trim().is_empty() {
            default_agent_url()
        } else {
            self.agent_url.trim().to_string()
        };
        if self.connect_timeout_secs == 0 {
            self.connect_timeout_secs = default_connect_timeout_secs();
        }
        self.generating_timeout_secs = self.generating_timeout_secs.filter(|secs| *secs > 0);
        self
    }

    /// Applies command-line overrides on top of loaded settings.
    pub fn with_overrides(
        mut self,
        agent_url: Option<&str>,
        generating_timeout_secs: Option<u64>,
    ) -> Self {
        if let Some(url) = agent_url {
            self.agent_url = url.to_string();
        }
        if let Some(secs) = generating_timeout_secs {
            self.generating_timeout_secs = Some(secs);
        }
        self.normalized()
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig::new(&self.agent_url)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
    }

    pub fn generating_timeout(&self) -> Option<Duration> {
        self.generating_timeout_secs.map(Duration::from_secs)
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ClientSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".prompt-magic"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        self.settings.load_full()
    }

    /// Normalizes `settings`, writes them to the config file, then makes them current.
    pub fn update(&self, settings: ClientSettings) -> Result<Arc<ClientSettings>, SettingsError> {
        let settings = Arc::new(settings.normalized());
        write_settings_file(&self.config_path, &settings)?;
        self.settings.store(settings.clone());
        tracing::info!(
            path = %self.config_path.display(),
            agent_url = %settings.agent_url,
            "saved client settings"
        );
        Ok(settings)
    }

    fn load_from_disk(path: &Path) -> ClientSettings {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no settings file; using defaults");
        }

        // Missing files are tolerated by figment; environment always wins.
        let figment = Figment::from(Serialized::defaults(ClientSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<ClientSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "ignoring unreadable settings"
                );
                ClientSettings::default()
            }
        }
    }
}

/// Replaces `path` atomically through a staged sibling file.
fn write_settings_file(path: &Path, settings: &ClientSettings) -> Result<(), SettingsError> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&directory).context(CreateDirSnafu {
        stage: "create-settings-directory",
        path: directory.clone(),
    })?;

    let mut staged = tempfile::NamedTempFile::new_in(&directory).context(StageFileSnafu {
        stage: "create-staged-settings",
        path: directory.clone(),
    })?;
    serde_json::to_writer_pretty(staged.as_file_mut(), settings).context(EncodeJsonSnafu {
        stage: "write-staged-settings",
    })?;
    staged.as_file().sync_all().context(StageFileSnafu {
        stage: "sync-staged-settings",
        path: staged.path().to_path_buf(),
    })?;

    staged
        .persist(path)
        .map_err(|error| error.error)
        .context(ReplaceFileSnafu {
            stage: "replace-settings-file",
            path: path.to_path_buf(),
        })?;
    Ok(())
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("cannot create settings directory {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot stage settings next to {path:?} on `{stage}`: {source}"))]
    StageFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot encode settings as JSON on `{stage}`: {source}"))]
    EncodeJson {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("cannot replace settings file {path:?} on `{stage}`: {source}"))]
    ReplaceFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

fn default_agent_url() -> String {
    DEFAULT_AGENT_URL.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));

        let settings = store.settings();
        assert_eq!(settings.agent_url, "ws://localhost:8765");
        assert_eq!(settings.generating_timeout(), None);
        assert_eq!(settings.link_config().connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn update_persists_normalized_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone());

        store
            .update(ClientSettings {
                agent_url: "  ws://agent.local:9000  ".to_string(),
                connect_timeout_secs: 0,
                generating_timeout_secs: Some(45),
            })
            .unwrap();

        assert_eq!(store.settings().agent_url, "ws://agent.local:9000");
        assert_eq!(store.settings().connect_timeout_secs, 10);

        let reloaded = SettingsStore::new(path);
        assert_eq!(reloaded.settings().agent_url, "ws://agent.local:9000");
        assert_eq!(
            reloaded.settings().generating_timeout(),
            Some(Duration::from_secs(45))
        );
    }

    #[test]
    fn update_replaces_existing_file_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"agent_url":"ws://old:1"}"#).unwrap();
        let store = SettingsStore::new(path.clone());
        assert_eq!(store.settings().agent_url, "ws://old:1");

        let saved = store
            .update(ClientSettings {
                agent_url: "ws://new:2".to_string(),
                ..ClientSettings::default()
            })
            .unwrap();
        assert_eq!(saved.agent_url, "ws://new:2");

        let written: ClientSettings =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, *saved);

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("settings.json")]);
    }

    #[test]
    fn update_reports_unusable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let store = SettingsStore::new(blocker.join("settings.json"));

        let error = store.update(ClientSettings::default()).unwrap_err();
        assert!(matches!(error, SettingsError::CreateDir { .. }));
        assert_eq!(*store.settings(), ClientSettings::default());
    }

    #[test]
    fn saved_overrides_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone());

        let overridden = (*store.settings())
            .clone()
            .with_overrides(Some(" ws://agent.lan:8765 "), Some(120));
        store.update(overridden).unwrap();

        let reloaded = SettingsStore::new(path).settings();
        assert_eq!(reloaded.agent_url, "ws://agent.lan:8765");
        assert_eq!(reloaded.generating_timeout(), Some(Duration::from_secs(120)));

        let untouched = (*reloaded).clone().with_overrides(None, None);
        assert_eq!(untouched, *reloaded);
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not valid json").unwrap();

        let store = SettingsStore::new(path);
        assert_eq!(*store.settings(), ClientSettings::default());
    }

    #[test]
    fn zero_generating_timeout_means_disabled() {
        let settings = ClientSettings {
            generating_timeout_secs: Some(0),
            ..ClientSettings::default()
        }
        .normalized();

        assert_eq!(settings.generating_timeout(), None);
    }
}
