// src/config.rs

use serde::Deserialize;
use std::{fs, path::Path};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/site_inward.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: String,
    pub server: ServerConfig,
    pub csv: CsvConfig,
    pub audit: AuditConfig,
    pub uploads: UploadConfig,
    pub ocr: OcrConfig,
    pub llm: LlmSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "data/site_inward.db".to_string(),
            server: ServerConfig::default(),
            csv: CsvConfig::default(),
            audit: AuditConfig::default(),
            uploads: UploadConfig::default(),
            ocr: OcrConfig::default(),
            llm: LlmSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// `None` allows any origin.
    pub cors_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "127.0.0.1:8001".to_string(), cors_origin: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CsvConfig {
    pub dir: String,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self { dir: "converted_csv".to_string() }
    }
}

/// Fixed attribution written with every purchase-order upload log entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub branch: String,
    pub source_address: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            branch: "Main Branch".to_string(),
            source_address: "127.0.0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub dir: String,
    pub max_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self { dir: "uploads".to_string(), max_bytes: 10 * 1024 * 1024 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub tesseract_cmd: String,
    pub pdftoppm_cmd: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_cmd: "tesseract".to_string(),
            pdftoppm_cmd: "pdftoppm".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    #[default]
    Ollama,
    Remote,
    Heuristics,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "qwen2.5:7b-instruct".to_string(),
        }
    }
}

/// Any OpenAI-compatible chat completions endpoint. The key is read from
/// `LLM_API_KEY`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub backend: LlmBackend,
    pub ollama: OllamaConfig,
    pub remote: RemoteConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Like [`Config::load`], but a missing file means defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Create the database parent, CSV and upload directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        if let Some(parent) = Path::new(&self.db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(&self.csv.dir)?;
        fs::create_dir_all(&self.uploads.dir)
    }
}
