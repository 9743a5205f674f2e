use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR: &str = "landmark-chat";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub worker: WorkerConfig,
    pub conversation: ConversationConfig,
    pub window: WindowConfig,
}

/// A program plus the leading arguments placed before the payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        CommandSpec {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub text: CommandSpec,
    pub image: CommandSpec,
    pub working_dir: Option<PathBuf>,
    /// Zero disables the limit.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attached to every text reply when the worker does not name an image.
    pub generated_image: Option<PathBuf>,
    /// Output lines starting with this prefix name the reply image.
    pub image_marker: Option<String>,
}

impl WorkerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            text: CommandSpec::new("python", &["../python_script.py"]),
            image: CommandSpec::new("python", &["../python_image_script.py"]),
            working_dir: None,
            timeout_secs: default_timeout_secs(),
            generated_image: None,
            image_marker: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Show generated images in a side panel instead of inline.
    pub image_panel: bool,
    pub reenable_on_error: bool,
    pub surface_errors: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        ConversationConfig {
            image_panel: true,
            reenable_on_error: true,
            surface_errors: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: 800,
            height: 600,
            min_width: 400,
            min_height: 300,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        if config_path.exists() {
            match Self::read(&config_path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!("{:#}. Using defaults.", e),
            }
        } else {
            tracing::info!(path = %config_path.display(), "no config file, using defaults");
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
        }

        Config::default()
    }

    fn read(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Error reading {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Error parsing {}", path.display()))
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }

    pub fn get_config_dir() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config").join(APP_DIR)
        } else {
            PathBuf::from(".")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.worker.text, CommandSpec::new("python", &["../python_script.py"]));
        assert_eq!(config.worker.timeout(), Some(Duration::from_secs(120)));
        assert!(config.conversation.image_panel);
        assert!(config.conversation.reenable_on_error);
        assert_eq!(config.window.width, 800);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [worker]
            timeout_secs = 0
            generated_image = "../data/generatedmap.png"

            [worker.text]
            program = "python3"
            args = ["scripts/describe.py"]

            [conversation]
            reenable_on_error = false
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.text.program, "python3");
        assert_eq!(config.worker.text.args, vec!["scripts/describe.py".to_string()]);
        assert_eq!(config.worker.image.program, "python");
        assert_eq!(config.worker.timeout(), None);
        assert_eq!(
            config.worker.generated_image,
            Some(PathBuf::from("../data/generatedmap.png"))
        );
        assert!(!config.conversation.reenable_on_error);
        assert!(config.conversation.surface_errors);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::parse("[worker\ntimeout_secs = ").is_err());
    }

    #[test]
    fn test_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[window]\nwidth = 1024\n").unwrap();

        let config = Config::read(&path).unwrap();
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
    }
}
