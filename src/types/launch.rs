//! Launch parameter types
//!
//! Structured form of one model's `llama-server` launch parameters, plus the
//! raw form record operators fill in before it is validated.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_GPU_LAYERS: u32 = 99;
pub const DEFAULT_CONTEXT_SIZE: u32 = 4096;
pub const DEFAULT_BATCH_SIZE: u32 = 2048;
pub const DEFAULT_UBATCH_SIZE: u32 = 512;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 0.95;
pub const DEFAULT_TOP_K: u32 = 40;
pub const DEFAULT_REPEAT_PENALTY: f64 = 1.10;

/// Rejected operator input. Nothing is stored when one of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{field} must be {expected}, got '{value}'")]
    NotANumber {
        field: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ValidationError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// NUMA placement policy passed through `--numa`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumaPolicy {
    #[default]
    None,
    Distribute,
    Isolate,
    Numactl,
}

impl NumaPolicy {
    /// Detection order used when decoding a command string.
    pub const PRIORITY: [NumaPolicy; 4] = [
        NumaPolicy::None,
        NumaPolicy::Distribute,
        NumaPolicy::Isolate,
        NumaPolicy::Numactl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NumaPolicy::None => "none",
            NumaPolicy::Distribute => "distribute",
            NumaPolicy::Isolate => "isolate",
            NumaPolicy::Numactl => "numactl",
        }
    }

    /// Parse a policy name. Blank input means no policy.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Some(NumaPolicy::None),
            "distribute" => Some(NumaPolicy::Distribute),
            "isolate" => Some(NumaPolicy::Isolate),
            "numactl" => Some(NumaPolicy::Numactl),
            _ => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self != NumaPolicy::None
    }
}

impl std::fmt::Display for NumaPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Launch parameters of a single model entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelLaunchSpec {
    /// Path to the GGUF artifact, as seen by the serving process
    pub file_path: String,
    /// Layers offloaded to the GPU (`-ngl`)
    pub gpu_layers: u32,
    /// Context window (`-c`)
    pub context_size: u32,
    /// Logical batch size (`-b`)
    pub batch_size: u32,
    /// Physical batch size (`-ub`)
    pub ubatch_size: u32,
    /// CPU threads (`-t`), left to the server when absent
    pub threads: Option<u32>,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub repeat_penalty: f64,
    /// Emits `--mlock`
    pub memory_lock: bool,
    pub numa_policy: NumaPolicy,
    /// Emits `--flash-attn`
    pub flash_attention: bool,
    /// Raw tokens appended verbatim
    pub extra_flags: Option<String>,
    pub aliases: Option<Vec<String>>,
}

impl Default for ModelLaunchSpec {
    fn default() -> Self {
        Self {
            file_path: String::new(),
            gpu_layers: DEFAULT_GPU_LAYERS,
            context_size: DEFAULT_CONTEXT_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            ubatch_size: DEFAULT_UBATCH_SIZE,
            threads: None,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            top_k: DEFAULT_TOP_K,
            repeat_penalty: DEFAULT_REPEAT_PENALTY,
            memory_lock: false,
            numa_policy: NumaPolicy::None,
            flash_attention: false,
            extra_flags: None,
            aliases: None,
        }
    }
}

impl ModelLaunchSpec {
    /// Default parameters for the given artifact
    pub fn for_file(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Self::default()
        }
    }

    /// Check every invariant the command codec relies on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let path = self.file_path.trim();
        if path.is_empty() {
            return Err(ValidationError::Missing("file path"));
        }
        if path != self.file_path || path.chars().any(char::is_whitespace) {
            return Err(ValidationError::invalid(
                "file path",
                "must not contain whitespace",
            ));
        }
        if path.starts_with('-') {
            return Err(ValidationError::invalid("file path", "must not start with '-'"));
        }

        for (field, value) in [
            ("context size", self.context_size),
            ("batch size", self.batch_size),
            ("ubatch size", self.ubatch_size),
        ] {
            if value == 0 {
                return Err(ValidationError::invalid(field, "must be greater than 0"));
            }
        }
        if self.threads == Some(0) {
            return Err(ValidationError::invalid(
                "threads",
                "must be greater than 0 or left empty",
            ));
        }

        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(ValidationError::invalid(
                "temperature",
                "must be a number >= 0",
            ));
        }
        if !self.top_p.is_finite() || !(0.0..=1.0).contains(&self.top_p) {
            return Err(ValidationError::invalid("top-p", "must be between 0 and 1"));
        }
        if !self.repeat_penalty.is_finite() {
            return Err(ValidationError::invalid(
                "repeat penalty",
                "must be a finite number",
            ));
        }

        if let Some(extra) = &self.extra_flags {
            if let Some(token) = extra
                .split_whitespace()
                .find(|token| crate::command::is_reserved_token(token))
            {
                return Err(ValidationError::invalid(
                    "extra flags",
                    format!("'{}' is managed by a dedicated field", token),
                ));
            }
        }

        if let Some(aliases) = &self.aliases {
            if aliases.iter().any(|alias| alias.trim().is_empty()) {
                return Err(ValidationError::invalid("aliases", "must not be blank"));
            }
        }

        Ok(())
    }
}

/// Raw model form, every field exactly as the operator typed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchForm {
    pub name: String,
    pub file_path: String,
    pub gpu_layers: String,
    pub context_size: String,
    pub batch_size: String,
    pub ubatch_size: String,
    pub threads: String,
    pub temperature: String,
    pub top_p: String,
    pub top_k: String,
    pub repeat_penalty: String,
    pub memory_lock: bool,
    pub numa_policy: String,
    pub flash_attention: bool,
    pub extra_flags: String,
    /// One alias per entry; blanks are dropped on parse
    pub aliases: Vec<String>,
}

impl Default for LaunchForm {
    fn default() -> Self {
        Self::from_spec("", &ModelLaunchSpec::default())
    }
}

impl LaunchForm {
    /// Prefill a form for editing an existing entry.
    pub fn from_spec(name: &str, spec: &ModelLaunchSpec) -> Self {
        Self {
            name: name.to_string(),
            file_path: spec.file_path.clone(),
            gpu_layers: spec.gpu_layers.to_string(),
            context_size: spec.context_size.to_string(),
            batch_size: spec.batch_size.to_string(),
            ubatch_size: spec.ubatch_size.to_string(),
            threads: spec.threads.map(|t| t.to_string()).unwrap_or_default(),
            temperature: spec.temperature.to_string(),
            top_p: spec.top_p.to_string(),
            top_k: spec.top_k.to_string(),
            repeat_penalty: spec.repeat_penalty.to_string(),
            memory_lock: spec.memory_lock,
            numa_policy: if spec.numa_policy.is_enabled() {
                spec.numa_policy.as_str().to_string()
            } else {
                String::new()
            },
            flash_attention: spec.flash_attention,
            extra_flags: spec.extra_flags.clone().unwrap_or_default(),
            aliases: spec.aliases.clone().unwrap_or_default(),
        }
    }

    /// Prefill a form for a freshly acquired artifact.
    ///
    /// The entry name is the file stem, the path is the artifact's location.
    pub fn for_file(path: &Path) -> Self {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::from_spec(
            &name,
            &ModelLaunchSpec::for_file(path.to_string_lossy().to_string()),
        )
    }

    /// Parse and validate the form into an entry name and launch spec.
    pub fn parse(&self) -> Result<(String, ModelLaunchSpec), ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::Missing("model name"));
        }

        let threads = match self.threads.trim() {
            "" => None,
            raw => Some(parse_unsigned("threads", raw)?),
        };

        let numa_policy = NumaPolicy::parse(&self.numa_policy).ok_or_else(|| {
            ValidationError::invalid(
                "NUMA policy",
                format!("unknown policy '{}'", self.numa_policy.trim()),
            )
        })?;

        let extra = self.extra_flags.split_whitespace().collect::<Vec<_>>().join(" ");
        let aliases: Vec<String> = self
            .aliases
            .iter()
            .map(|alias| alias.trim())
            .filter(|alias| !alias.is_empty())
            .map(str::to_string)
            .collect();

        let spec = ModelLaunchSpec {
            file_path: self.file_path.trim().to_string(),
            gpu_layers: parse_unsigned("GPU layers", &self.gpu_layers)?,
            context_size: parse_unsigned("context size", &self.context_size)?,
            batch_size: parse_unsigned("batch size", &self.batch_size)?,
            ubatch_size: parse_unsigned("ubatch size", &self.ubatch_size)?,
            threads,
            temperature: parse_decimal("temperature", &self.temperature)?,
            top_p: parse_decimal("top-p", &self.top_p)?,
            top_k: parse_unsigned("top-k", &self.top_k)?,
            repeat_penalty: parse_decimal("repeat penalty", &self.repeat_penalty)?,
            memory_lock: self.memory_lock,
            numa_policy,
            flash_attention: self.flash_attention,
            extra_flags: (!extra.is_empty()).then_some(extra),
            aliases: (!aliases.is_empty()).then_some(aliases),
        };
        spec.validate()?;

        Ok((name.to_string(), spec))
    }
}

fn parse_unsigned(field: &'static str, raw: &str) -> Result<u32, ValidationError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| ValidationError::NotANumber {
            field,
            expected: "a non-negative integer",
            value: raw.to_string(),
        })
}

fn parse_decimal(field: &'static str, raw: &str) -> Result<f64, ValidationError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| ValidationError::NotANumber {
            field,
            expected: "a number",
            value: raw.to_string(),
        })
}
