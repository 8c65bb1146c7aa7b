//! Decode table for `llama-server` flags.
//!
//! Each value flag carries the pattern its argument must match and the
//! extractor that writes it into a [`ModelLaunchSpec`].

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::launch::ModelLaunchSpec;

static PATH_ARG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^-\s]\S*$").expect("valid path pattern"));
static UNSIGNED_ARG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("valid integer pattern"));
static DECIMAL_ARG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+(?:\.\d+)?$").expect("valid decimal pattern"));

pub const NUMA_FLAG: &str = "--numa";
pub const PORT_FLAG: &str = "--port";
pub const HOST_FLAG: &str = "--host";

#[derive(Debug, Clone, Copy)]
pub enum ArgPattern {
    Path,
    Unsigned,
    Decimal,
}

impl ArgPattern {
    pub fn matches(&self, arg: &str) -> bool {
        let regex: &Regex = match self {
            ArgPattern::Path => &PATH_ARG,
            ArgPattern::Unsigned => &UNSIGNED_ARG,
            ArgPattern::Decimal => &DECIMAL_ARG,
        };
        regex.is_match(arg)
    }
}

/// A flag followed by exactly one argument
pub struct ValueFlag {
    pub flag: &'static str,
    pub pattern: ArgPattern,
    pub extract: fn(&mut ModelLaunchSpec, &str),
}

/// A bare flag whose presence turns a field on
pub struct SwitchFlag {
    pub flag: &'static str,
    pub set: fn(&mut ModelLaunchSpec),
}

pub static VALUE_FLAGS: [ValueFlag; 10] = [
    ValueFlag {
        flag: "-m",
        pattern: ArgPattern::Path,
        extract: |spec, arg| spec.file_path = arg.to_string(),
    },
    ValueFlag {
        flag: "-ngl",
        pattern: ArgPattern::Unsigned,
        extract: |spec, arg| {
            if let Ok(value) = arg.parse::<u32>() {
                spec.gpu_layers = value;
            }
        },
    },
    ValueFlag {
        flag: "-c",
        pattern: ArgPattern::Unsigned,
        extract: |spec, arg| {
            if let Ok(value) = arg.parse::<u32>() {
                spec.context_size = value;
            }
        },
    },
    ValueFlag {
        flag: "-b",
        pattern: ArgPattern::Unsigned,
        extract: |spec, arg| {
            if let Ok(value) = arg.parse::<u32>() {
                spec.batch_size = value;
            }
        },
    },
    ValueFlag {
        flag: "-t",
        pattern: ArgPattern::Unsigned,
        extract: |spec, arg| {
            spec.threads = arg.parse::<u32>().ok().filter(|threads| *threads > 0);
        },
    },
    ValueFlag {
        flag: "-ub",
        pattern: ArgPattern::Unsigned,
        extract: |spec, arg| {
            if let Ok(value) = arg.parse::<u32>() {
                spec.ubatch_size = value;
            }
        },
    },
    ValueFlag {
        flag: "--temp",
        pattern: ArgPattern::Decimal,
        extract: |spec, arg| {
            if let Ok(value) = arg.parse::<f64>() {
                spec.temperature = value;
            }
        },
    },
    ValueFlag {
        flag: "--top-p",
        pattern: ArgPattern::Decimal,
        extract: |spec, arg| {
            if let Ok(value) = arg.parse::<f64>() {
                spec.top_p = value;
            }
        },
    },
    ValueFlag {
        flag: "--top-k",
        pattern: ArgPattern::Unsigned,
        extract: |spec, arg| {
            if let Ok(value) = arg.parse::<u32>() {
                spec.top_k = value;
            }
        },
    },
    ValueFlag {
        flag: "--repeat-penalty",
        pattern: ArgPattern::Decimal,
        extract: |spec, arg| {
            if let Ok(value) = arg.parse::<f64>() {
                spec.repeat_penalty = value;
            }
        },
    },
];

pub static SWITCH_FLAGS: [SwitchFlag; 2] = [
    SwitchFlag {
        flag: "--mlock",
        set: |spec| spec.memory_lock = true,
    },
    SwitchFlag {
        flag: "--flash-attn",
        set: |spec| spec.flash_attention = true,
    },
];

pub fn value_flag(token: &str) -> Option<&'static ValueFlag> {
    VALUE_FLAGS.iter().find(|rule| rule.flag == token)
}

pub fn switch_flag(token: &str) -> Option<&'static SwitchFlag> {
    SWITCH_FLAGS.iter().find(|rule| rule.flag == token)
}

/// Flags this codec owns. Both `--port` and `--host` belong to the placeholder suffix.
pub fn is_known_flag(token: &str) -> bool {
    value_flag(token).is_some()
        || switch_flag(token).is_some()
        || matches!(token, NUMA_FLAG | PORT_FLAG | HOST_FLAG)
}

/// True when a token starts a new flag rather than being an argument.
/// Negative numbers are arguments.
pub fn looks_like_flag(token: &str) -> bool {
    match token.strip_prefix('-') {
        Some(rest) => !rest.starts_with(|c: char| c.is_ascii_digit()),
        None => false,
    }
}
