//! Configuration types for the skill engine
//!
//! Loaded in layers, later layers winning:
//! 1. Global config: `~/.skillcast/skillcast.toml` (optional)
//! 2. Local override: `./skillcast.toml` (optional)
//! 3. `SKILLCAST__SECTION__KEY` environment variables
//! 4. Convenience overrides `SKILLCAST_CORPUS` and `SKILLCAST_BUDGET`

use serde::Deserialize;
use skillcast_logging::LoggingConfig;
use skillcast_registry::SizeUnit;
use skillcast_types::EvidenceKind;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Top-level engine configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EngineConfig {
    /// Corpus roots and refresh behaviour
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Signal weights and token aliases
    #[serde(default)]
    pub signals: SignalsConfig,

    /// Budget and selector tuning
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Explicit overlap relation between skills
    #[serde(default)]
    pub supersedes: Vec<SupersedesRule>,

    /// Log level and format
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[corpus]`: where the skill documents live and how they are watched
#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    /// Corpus roots in precedence order; `~` is expanded
    #[serde(default = "default_roots")]
    pub roots: Vec<String>,

    /// Unit of size estimates and of the budget
    #[serde(default)]
    pub size_unit: SizeUnit,

    /// Bound on registry builds, refreshes and content loads
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,

    /// Start a file-system watcher with the engine
    #[serde(default = "default_watch")]
    pub watch: bool,

    /// Quiet period before a batch of changes is refreshed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_roots() -> Vec<String> {
    vec!["~/.skillcast/skills".to_string()]
}

fn default_refresh_timeout_ms() -> u64 {
    5_000
}

fn default_watch() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    250
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            size_unit: SizeUnit::default(),
            refresh_timeout_ms: default_refresh_timeout_ms(),
            watch: default_watch(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl CorpusConfig {
    /// Roots with `~` expanded
    pub fn resolved_roots(&self) -> Vec<PathBuf> {
        self.roots.iter().map(|r| expand_tilde(r)).collect()
    }

    /// Refresh timeout as a [`Duration`]
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    /// Watcher debounce as a [`Duration`]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// `[signals]`: weight tiers and token aliases
#[derive(Debug, Deserialize, Clone)]
pub struct SignalsConfig {
    /// Weight per evidence kind
    #[serde(default)]
    pub weights: SignalWeights,

    /// Token → additional tokens emitted at the same weight
    #[serde(default = "default_aliases")]
    pub aliases: BTreeMap<String, Vec<String>>,
}

fn default_aliases() -> BTreeMap<String, Vec<String>> {
    [
        ("rs", vec!["rust"]),
        ("py", vec!["python"]),
        ("ts", vec!["typescript"]),
        ("tsx", vec!["typescript", "react"]),
        ("js", vec!["javascript"]),
        ("jsx", vec!["javascript", "react"]),
        ("rb", vec!["ruby"]),
        ("kt", vec!["kotlin"]),
        ("golang", vec!["go"]),
        ("dockerfile", vec!["docker"]),
    ]
    .into_iter()
    .map(|(from, to)| {
        (
            from.to_string(),
            to.into_iter().map(str::to_string).collect(),
        )
    })
    .collect()
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            aliases: default_aliases(),
        }
    }
}

/// `[signals.weights]`: one weight per evidence tier
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct SignalWeights {
    /// Weight of dependency manifest entries
    #[serde(default = "default_dependency_manifest")]
    pub dependency_manifest: f64,

    /// Weight of file extensions
    #[serde(default = "default_file_extension")]
    pub file_extension: f64,

    /// Weight of conversation mentions
    #[serde(default = "default_explicit_mention")]
    pub explicit_mention: f64,
}

fn default_dependency_manifest() -> f64 {
    3.0
}

fn default_file_extension() -> f64 {
    1.5
}

fn default_explicit_mention() -> f64 {
    1.0
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            dependency_manifest: default_dependency_manifest(),
            file_extension: default_file_extension(),
            explicit_mention: default_explicit_mention(),
        }
    }
}

impl SignalWeights {
    /// Weight configured for `kind`
    pub fn weight(&self, kind: EvidenceKind) -> f64 {
        match kind {
            EvidenceKind::DependencyManifest => self.dependency_manifest,
            EvidenceKind::FileExtension => self.file_extension,
            EvidenceKind::ExplicitMention => self.explicit_mention,
        }
    }
}

/// `[selection]`: budget and selection strategy bounds
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct SelectionConfig {
    /// Maximum total size of simultaneously active skills
    #[serde(default = "default_budget")]
    pub budget: usize,

    /// Candidates scoring below this are never selected
    #[serde(default)]
    pub min_score: f64,

    /// Largest DP table (candidates × scaled budget) solved exactly
    #[serde(default = "default_exact_cell_limit")]
    pub exact_cell_limit: usize,

    /// Sizes are rounded up to multiples of this before the exact pass
    #[serde(default = "default_size_granularity")]
    pub size_granularity: usize,
}

fn default_budget() -> usize {
    24_000
}

fn default_exact_cell_limit() -> usize {
    4_000_000
}

fn default_size_granularity() -> usize {
    1
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            min_score: 0.0,
            exact_cell_limit: default_exact_cell_limit(),
            size_granularity: default_size_granularity(),
        }
    }
}

/// One `[[supersedes]]` entry: `narrower` replaces each of `broader`
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SupersedesRule {
    /// Skill that wins over the broader ones
    pub narrower: String,
    /// Skills suppressed when the narrower one is retained
    pub broader: Vec<String>,
}

impl SupersedesRule {
    /// Build a rule from ids
    pub fn new<'a>(narrower: &str, broader: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            narrower: narrower.to_string(),
            broader: broader.into_iter().map(str::to_string).collect(),
        }
    }
}

impl EngineConfig {
    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".skillcast").join("skillcast.toml"))
    }

    /// Load configuration from all layers and validate it
    pub fn load() -> Result<Self> {
        // Load .env file from current directory
        dotenvy::dotenv().ok();

        let mut config_builder = config::Config::builder();

        // Layer 1: Global config (optional)
        if let Some(global_config_path) = Self::global_config_path() {
            config_builder = config_builder
                .add_source(config::File::from(global_config_path).required(false));
        }

        config_builder = config_builder
            // Layer 2: Local workspace config (optional override)
            .add_source(config::File::with_name("skillcast").required(false))
            // Layer 3: Environment variables with SKILLCAST__ prefix
            .add_source(config::Environment::with_prefix("SKILLCAST").separator("__"));

        // Layer 4: Apply convenience env var overrides (highest priority)
        if let Some(roots) = env::var_os("SKILLCAST_CORPUS") {
            let roots: Vec<String> = env::split_paths(&roots)
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            config_builder = config_builder.set_override("corpus.roots", roots)?;
        }

        if let Ok(budget) = env::var("SKILLCAST_BUDGET") {
            let budget: i64 = budget.trim().parse().map_err(|_| {
                EngineError::Config(format!("SKILLCAST_BUDGET is not a number: '{}'", budget))
            })?;
            config_builder = config_builder.set_override("selection.budget", budget)?;
        }

        let config: Self = config_builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document (no environment layers) and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.corpus.roots.is_empty() {
            return Err(EngineError::Config(
                "corpus.roots must name at least one directory".to_string(),
            ));
        }
        if self.corpus.refresh_timeout_ms == 0 {
            return Err(EngineError::Config(
                "corpus.refresh_timeout_ms must be positive".to_string(),
            ));
        }

        let weights = &self.signals.weights;
        for (name, weight) in [
            ("dependency_manifest", weights.dependency_manifest),
            ("file_extension", weights.file_extension),
            ("explicit_mention", weights.explicit_mention),
        ] {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(EngineError::Config(format!(
                    "signals.weights.{} must be positive and finite, got {}",
                    name, weight
                )));
            }
        }

        let selection = &self.selection;
        if selection.budget == 0 {
            return Err(EngineError::Config(
                "selection.budget must be positive".to_string(),
            ));
        }
        if !selection.min_score.is_finite() || selection.min_score < 0.0 {
            return Err(EngineError::Config(format!(
                "selection.min_score must be a non-negative number, got {}",
                selection.min_score
            )));
        }
        if selection.size_granularity == 0 {
            return Err(EngineError::Config(
                "selection.size_granularity must be at least 1".to_string(),
            ));
        }

        for rule in &self.supersedes {
            if rule.narrower.trim().is_empty() {
                return Err(EngineError::Config(
                    "supersedes entry with an empty narrower id".to_string(),
                ));
            }
            if rule.broader.is_empty() {
                return Err(EngineError::Config(format!(
                    "supersedes entry for '{}' names no broader skills",
                    rule.narrower
                )));
            }
        }

        Ok(())
    }
}

/// Expand a leading `~` to the home directory
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use skillcast_logging::LogFormat;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[corpus]
roots = ["/srv/skills", "/opt/extra-skills"]
size_unit = "tokens"
refresh_timeout_ms = 1000
watch = false

[signals.weights]
dependency_manifest = 4.0

[signals.aliases]
rs = ["rust"]

[selection]
budget = 900
min_score = 0.25

[[supersedes]]
narrower = "nextjs-react-typescript"
broader = ["react", "typescript"]

[logging]
level = "debug"
format = "json"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(config.corpus.roots.len(), 2);
        assert_eq!(config.corpus.size_unit, SizeUnit::Tokens);
        assert_eq!(config.corpus.refresh_timeout(), Duration::from_secs(1));
        assert!(!config.corpus.watch);
        assert_eq!(config.corpus.debounce_ms, 250);

        assert_eq!(config.signals.weights.dependency_manifest, 4.0);
        assert_eq!(config.signals.weights.file_extension, 1.5);
        // An explicit table replaces the default aliases
        assert_eq!(config.signals.aliases.len(), 1);

        assert_eq!(config.selection.budget, 900);
        assert_eq!(config.selection.min_score, 0.25);
        assert_eq!(config.selection.exact_cell_limit, 4_000_000);

        assert_eq!(
            config.supersedes,
            vec![SupersedesRule::new(
                "nextjs-react-typescript",
                ["react", "typescript"]
            )]
        );
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_defaults_from_empty_document() {
        let config: EngineConfig = toml::from_str("").unwrap();
        config.validate().unwrap();

        assert_eq!(config.corpus.roots, default_roots());
        assert_eq!(config.signals.weights, SignalWeights::default());
        assert_eq!(config.signals.aliases.get("rs").unwrap(), &vec!["rust"]);
        assert_eq!(config.selection.budget, 24_000);
        assert!(config.supersedes.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_toml_str_uses_config_layers() {
        let config = EngineConfig::from_toml_str(
            r#"
[corpus]
roots = ["/srv/skills"]

[selection]
budget = 1200
"#,
        )
        .unwrap();
        assert_eq!(config.corpus.roots, vec!["/srv/skills"]);
        assert_eq!(config.selection.budget, 1200);
    }

    #[test]
    fn test_weight_lookup() {
        let weights = SignalWeights::default();
        assert_eq!(weights.weight(EvidenceKind::DependencyManifest), 3.0);
        assert_eq!(weights.weight(EvidenceKind::FileExtension), 1.5);
        assert_eq!(weights.weight(EvidenceKind::ExplicitMention), 1.0);
    }

    #[test]
    fn test_rejects_non_positive_weight() {
        let result = EngineConfig::from_toml_str("[signals.weights]\nexplicit_mention = 0.0\n");
        assert!(matches!(result, Err(EngineError::Config(msg)) if msg.contains("explicit_mention")));
    }

    #[test]
    fn test_rejects_zero_budget_and_granularity() {
        let result = EngineConfig::from_toml_str("[selection]\nbudget = 0\n");
        assert!(matches!(result, Err(EngineError::Config(_))));

        let result = EngineConfig::from_toml_str("[selection]\nsize_granularity = 0\n");
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_rejects_empty_supersedes_entry() {
        let result = EngineConfig::from_toml_str(
            "[[supersedes]]\nnarrower = \"react-hooks\"\nbroader = []\n",
        );
        assert!(matches!(result, Err(EngineError::Config(msg)) if msg.contains("react-hooks")));
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_tilde("relative"), PathBuf::from("relative"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/skills"), home.join("skills"));
        }
    }
}
