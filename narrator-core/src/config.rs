//! Engine configuration.
//!
//! Built either with the `with_*` builder methods or from `NARRATOR_*`
//! environment variables. Values that make no sense are normalized rather
//! than rejected: a turn engine with a slightly odd budget is still useful.

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Per-turn ceilings on oracle calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetConfig {
    /// Total calls per turn.
    pub max: u32,
    /// Calls routed to the primary (narration) model.
    pub primary_max: u32,
    /// Calls routed to the fallback (classification/check) model.
    pub fallback_max: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max: 4,
            primary_max: 3,
            fallback_max: 2,
        }
    }
}

/// Intent classification settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierConfig {
    /// Let the oracle override low-confidence heuristic classifications.
    pub oracle_assist: bool,
    /// Heuristic confidence below which the oracle is consulted.
    pub threshold: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            oracle_assist: false,
            threshold: 0.6,
        }
    }
}

/// Continuity guard settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContinuityConfig {
    /// Ask the oracle to flag interlocutor/POI drift after deterministic checks pass.
    pub oracle_check: bool,
}

/// Configuration for a [`crate::TurnEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding one sub-directory per session.
    pub data_dir: PathBuf,

    /// Oracle endpoint base URL; `None` keeps the engine fully deterministic.
    pub oracle_url: Option<String>,

    /// Oracle API key.
    pub oracle_api_key: Option<String>,

    /// Model for primary calls (narration, refinement, regeneration).
    pub primary_model: Option<String>,

    /// Model for fallback calls (classification, continuity checks).
    pub fallback_model: Option<String>,

    /// Hard timeout for a single oracle call.
    pub oracle_timeout: Duration,

    pub budget: BudgetConfig,
    pub classifier: ClassifierConfig,
    pub continuity: ContinuityConfig,

    /// Travel duration used when the destination has no known duration.
    pub default_travel_minutes: u32,

    /// Ask for confirmation before applying high-risk actions.
    pub confirm_high_risk_actions: bool,

    /// Where new sessions start.
    pub start_location_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("sessions"),
            oracle_url: None,
            oracle_api_key: None,
            primary_model: None,
            fallback_model: None,
            oracle_timeout: Duration::from_secs(20),
            budget: BudgetConfig::default(),
            classifier: ClassifierConfig::default(),
            continuity: ContinuityConfig::default(),
            default_travel_minutes: 12,
            confirm_high_risk_actions: true,
            start_location_label: "Place du Marché".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from `NARRATOR_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = env_string("NARRATOR_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        config.oracle_url = env_string("NARRATOR_ORACLE_URL");
        config.oracle_api_key = env_string("NARRATOR_ORACLE_API_KEY");
        config.primary_model = env_string("NARRATOR_PRIMARY_MODEL");
        config.fallback_model = env_string("NARRATOR_FALLBACK_MODEL");

        if let Some(ms) = env_parse::<u64>("NARRATOR_ORACLE_TIMEOUT_MS") {
            config.oracle_timeout = Duration::from_millis(ms);
        }
        if let Some(max) = env_parse("NARRATOR_AI_MAX_CALLS") {
            config.budget.max = max;
        }
        if let Some(max) = env_parse("NARRATOR_AI_PRIMARY_MAX") {
            config.budget.primary_max = max;
        }
        if let Some(max) = env_parse("NARRATOR_AI_FALLBACK_MAX") {
            config.budget.fallback_max = max;
        }
        if let Some(threshold) = env_parse("NARRATOR_CLASSIFIER_THRESHOLD") {
            config.classifier.threshold = threshold;
        }
        if let Some(flag) = env_flag("NARRATOR_ORACLE_CLASSIFIER") {
            config.classifier.oracle_assist = flag;
        }
        if let Some(flag) = env_flag("NARRATOR_ORACLE_CONTINUITY") {
            config.continuity.oracle_check = flag;
        }
        if let Some(label) = env_string("NARRATOR_START_LOCATION") {
            config.start_location_label = label;
        }

        config.normalized()
    }

    /// Clamp values into their meaningful ranges.
    pub fn normalized(mut self) -> Self {
        self.budget.primary_max = self.budget.primary_max.min(self.budget.max);
        self.budget.fallback_max = self.budget.fallback_max.min(self.budget.max);
        if !self.classifier.threshold.is_finite() {
            self.classifier.threshold = ClassifierConfig::default().threshold;
        }
        self.classifier.threshold = self.classifier.threshold.clamp(0.0, 1.0);
        self.default_travel_minutes = self.default_travel_minutes.clamp(1, 24 * 60);
        if self.start_location_label.trim().is_empty() {
            self.start_location_label = Self::default().start_location_label;
        }
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_oracle(mut self, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.oracle_url = Some(url.into());
        self.oracle_api_key = Some(api_key.into());
        self
    }

    pub fn with_models(mut self, primary: impl Into<String>, fallback: impl Into<String>) -> Self {
        self.primary_model = Some(primary.into());
        self.fallback_model = Some(fallback.into());
        self
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    pub fn with_budget(mut self, max: u32, primary_max: u32, fallback_max: u32) -> Self {
        self.budget = BudgetConfig {
            max,
            primary_max,
            fallback_max,
        };
        self
    }

    /// Enable oracle-assisted classification below `threshold` confidence.
    pub fn with_oracle_classifier(mut self, threshold: f32) -> Self {
        self.classifier = ClassifierConfig {
            oracle_assist: true,
            threshold,
        };
        self
    }

    /// Enable the oracle-assisted drift check.
    pub fn with_oracle_continuity(mut self) -> Self {
        self.continuity.oracle_check = true;
        self
    }

    pub fn with_default_travel_minutes(mut self, minutes: u32) -> Self {
        self.default_travel_minutes = minutes;
        self
    }

    pub fn with_high_risk_confirmation(mut self, enabled: bool) -> Self {
        self.confirm_high_risk_actions = enabled;
        self
    }

    pub fn with_start_location(mut self, label: impl Into<String>) -> Self {
        self.start_location_label = label.into();
        self
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    let raw = env_string(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value = %raw, "ignoring unparseable boolean flag");
            None
        }
    }
}
