//! Installed whisper models and the languages they support
//!
//! Models live in the models directory as `ggml-<name>.bin`; quantized
//! variants (`ggml-<name>-q8_0.bin`, ...) are folded into their base name.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::job::Precision;

/// Model picked when nothing else was asked for
pub const PREFERRED_MODEL: &str = "large-v3";

/// Language codes understood by multilingual whisper models
pub const WHISPER_LANGUAGES: &[&str] = &[
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv",
    "it", "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no",
    "th", "ur", "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr",
    "az", "sl", "kn", "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw",
    "gl", "mr", "pa", "si", "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu",
    "am", "yi", "lo", "uz", "fo", "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl",
    "mg", "as", "tt", "haw", "ln", "ha", "ba", "jw", "su", "yue",
];

/// Pseudo-language asking the engine to detect the language itself
pub const AUTO_LANGUAGE: &str = "auto";

/// Files backing one installed model
#[derive(Debug, Clone, Serialize)]
pub struct InstalledModel {
    pub name: String,
    /// Full-precision weights, if installed
    pub full: Option<PathBuf>,
    /// Quantized variants, sorted by file name
    pub quantized: Vec<PathBuf>,
}

impl InstalledModel {
    pub fn is_english_only(&self) -> bool {
        self.name.ends_with(".en")
    }

    pub fn languages(&self) -> Vec<&'static str> {
        if self.is_english_only() {
            vec!["en"]
        } else {
            WHISPER_LANGUAGES.to_vec()
        }
    }

    pub fn supports_language(&self, language: &str) -> bool {
        if language == AUTO_LANGUAGE {
            return !self.is_english_only();
        }
        self.languages().iter().any(|code| *code == language)
    }

    /// Weights to load for `precision`, falling back to whatever exists
    pub fn weights_for(&self, precision: Precision) -> Option<&Path> {
        let q8 = self.quantized.iter().find(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().contains("-q8_0"))
                .unwrap_or(false)
        });
        let any_quantized = self.quantized.first();

        let picked = match precision {
            Precision::Int8 => q8.or(any_quantized).or(self.full.as_ref()),
            Precision::Float16 => self.full.as_ref().or(q8).or(any_quantized),
        };
        picked.map(PathBuf::as_path)
    }
}

/// Which model a fresh submission form should preselect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "model", rename_all = "snake_case")]
pub enum DefaultModel {
    Preferred(String),
    NoModelsAvailable,
}

/// Snapshot of the models directory
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelCatalog {
    models: Vec<InstalledModel>,
}

impl ModelCatalog {
    /// List installed models. A missing directory is an empty catalog.
    pub fn scan(models_dir: &Path) -> std::io::Result<Self> {
        let entries = match std::fs::read_dir(models_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Models directory {} does not exist", models_dir.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e),
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let mut models: Vec<InstalledModel> = Vec::new();
        for path in files {
            let Some((name, quantized)) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(parse_model_file)
            else {
                continue;
            };

            let index = match models.iter().position(|m| m.name == name) {
                Some(index) => index,
                None => {
                    models.push(InstalledModel {
                        name: name.to_string(),
                        full: None,
                        quantized: Vec::new(),
                    });
                    models.len() - 1
                }
            };

            if quantized {
                models[index].quantized.push(path);
            } else {
                models[index].full = Some(path);
            }
        }

        Ok(Self { models })
    }

    pub fn from_models(models: Vec<InstalledModel>) -> Self {
        Self { models }
    }

    pub fn models(&self) -> &[InstalledModel] {
        &self.models
    }

    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&InstalledModel> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Languages a model supports, or `None` when it is not installed
    pub fn languages(&self, name: &str) -> Option<Vec<&'static str>> {
        self.get(name).map(InstalledModel::languages)
    }

    pub fn default_model(&self) -> DefaultModel {
        if self.get(PREFERRED_MODEL).is_some() {
            return DefaultModel::Preferred(PREFERRED_MODEL.to_string());
        }
        match self.models.first() {
            Some(model) => DefaultModel::Preferred(model.name.clone()),
            None => DefaultModel::NoModelsAvailable,
        }
    }
}

/// `ggml-base.en-q5_1.bin` → `("base.en", true)`
fn parse_model_file(file_name: &str) -> Option<(&str, bool)> {
    let stem = file_name.strip_prefix("ggml-")?.strip_suffix(".bin")?;
    if stem.is_empty() {
        return None;
    }

    if let Some((base, quant)) = stem.rsplit_once('-') {
        if is_quantization_tag(quant) && !base.is_empty() {
            return Some((base, true));
        }
    }
    Some((stem, false))
}

/// Matches tags such as `q8_0`, `q5_1`, `q4_k`
fn is_quantization_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    chars.next() == Some('q')
        && chars.next().map(|c| c.is_ascii_digit()).unwrap_or(false)
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn parses_model_file_names() {
        assert_eq!(parse_model_file("ggml-large-v3.bin"), Some(("large-v3", false)));
        assert_eq!(parse_model_file("ggml-large-v3-q8_0.bin"), Some(("large-v3", true)));
        assert_eq!(parse_model_file("ggml-base.en-q5_1.bin"), Some(("base.en", true)));
        assert_eq!(parse_model_file("ggml-.bin"), None);
        assert_eq!(parse_model_file("notes.txt"), None);
    }

    #[test]
    fn scan_folds_quantized_variants() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "ggml-large-v3.bin");
        touch(tmp.path(), "ggml-large-v3-q8_0.bin");
        touch(tmp.path(), "ggml-base.en.bin");
        touch(tmp.path(), "README.md");

        let catalog = ModelCatalog::scan(tmp.path()).unwrap();
        assert_eq!(catalog.names(), vec!["base.en", "large-v3"]);

        let large = catalog.get("large-v3").unwrap();
        assert!(large
            .weights_for(Precision::Int8)
            .unwrap()
            .ends_with("ggml-large-v3-q8_0.bin"));
        assert!(large
            .weights_for(Precision::Float16)
            .unwrap()
            .ends_with("ggml-large-v3.bin"));
    }

    #[test]
    fn english_only_models_reject_other_languages() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "ggml-base.en.bin");
        let catalog = ModelCatalog::scan(tmp.path()).unwrap();

        let model = catalog.get("base.en").unwrap();
        assert!(model.supports_language("en"));
        assert!(!model.supports_language("de"));
        assert!(!model.supports_language(AUTO_LANGUAGE));
        assert_eq!(catalog.languages("base.en"), Some(vec!["en"]));
        assert_eq!(catalog.languages("tiny"), None);
    }

    #[test]
    fn default_model_prefers_large_v3() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "ggml-base.bin");
        touch(tmp.path(), "ggml-large-v3-q5_0.bin");
        let catalog = ModelCatalog::scan(tmp.path()).unwrap();
        assert_eq!(
            catalog.default_model(),
            DefaultModel::Preferred("large-v3".to_string())
        );

        let only_base = tempfile::tempdir().unwrap();
        touch(only_base.path(), "ggml-base.bin");
        let catalog = ModelCatalog::scan(only_base.path()).unwrap();
        assert_eq!(
            catalog.default_model(),
            DefaultModel::Preferred("base".to_string())
        );
    }

    #[test]
    fn missing_directory_means_no_models() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = ModelCatalog::scan(&tmp.path().join("absent")).unwrap();
        assert!(catalog.is_empty());
        assert_eq!(catalog.default_model(), DefaultModel::NoModelsAvailable);
    }
}
