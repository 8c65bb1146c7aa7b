//! `llama-server` command codec
//!
//! Converts a [`ModelLaunchSpec`] into the single command string llama-swap
//! launches, and recovers the structured fields from such a string for editing.
//!
//! Decoding only recovers what [`encode`] produces. Hand-written commands decode
//! on a best-effort basis: unknown tokens end up in `extra_flags`.

pub mod flags;

use std::collections::HashSet;

use crate::types::launch::{ModelLaunchSpec, NumaPolicy};
use flags::{HOST_FLAG, NUMA_FLAG, PORT_FLAG};

/// Server binary inside the llama-swap container
pub const LLAMA_SERVER_BIN: &str = "/app/llama-server";
/// Substituted by llama-swap with the port it assigns to the model
pub const PORT_PLACEHOLDER: &str = "${PORT}";
pub const BIND_HOST: &str = "0.0.0.0";

/// Render the launch command for a validated spec.
///
/// `aliases` are not part of the command, they live next to it in the entry.
pub fn encode(spec: &ModelLaunchSpec) -> String {
    let mut parts = vec![
        LLAMA_SERVER_BIN.to_string(),
        format!("-m {}", spec.file_path),
        format!("-ngl {}", spec.gpu_layers),
        format!("-c {}", spec.context_size),
        format!("-b {}", spec.batch_size),
    ];

    if let Some(threads) = spec.threads {
        parts.push(format!("-t {}", threads));
    }

    parts.extend([
        format!("-ub {}", spec.ubatch_size),
        format!("--temp {}", format_decimal(spec.temperature, 1)),
        format!("--top-p {}", format_decimal(spec.top_p, 1)),
        format!("--top-k {}", spec.top_k),
        format!("--repeat-penalty {}", format_decimal(spec.repeat_penalty, 2)),
    ]);

    if spec.memory_lock {
        parts.push("--mlock".to_string());
    }
    if spec.numa_policy.is_enabled() {
        parts.push(format!("{} {}", NUMA_FLAG, spec.numa_policy));
    }
    if spec.flash_attention {
        parts.push("--flash-attn".to_string());
    }

    if let Some(extra) = spec
        .extra_flags
        .as_deref()
        .map(str::trim)
        .filter(|extra| !extra.is_empty())
    {
        parts.push(extra.to_string());
    }

    parts.push(format!("{} {}", PORT_FLAG, PORT_PLACEHOLDER));
    parts.push(format!("{} {}", HOST_FLAG, BIND_HOST));

    parts.join(" ")
}

/// Recover launch parameters from a command string.
///
/// The first occurrence of each value flag wins. Missing or malformed values
/// fall back to the defaults. Every known flag is stripped together with its
/// argument, and whatever remains becomes `extra_flags`.
pub fn decode(command: &str) -> ModelLaunchSpec {
    let tokens: Vec<&str> = command.split_whitespace().collect();
    let mut spec = ModelLaunchSpec::default();
    let mut seen: HashSet<&'static str> = HashSet::new();
    let mut numa_found: HashSet<NumaPolicy> = HashSet::new();
    let mut extra: Vec<&str> = Vec::new();

    let mut index = 0;
    while index < tokens.len() {
        let token = tokens[index];
        let next = tokens
            .get(index + 1)
            .copied()
            .filter(|arg| !flags::looks_like_flag(arg));

        if index == 0 && token == LLAMA_SERVER_BIN {
            index += 1;
            continue;
        }

        if let Some(rule) = flags::value_flag(token) {
            if let Some(arg) = next {
                if seen.insert(rule.flag) && rule.pattern.matches(arg) {
                    (rule.extract)(&mut spec, arg);
                }
                index += 2;
            } else {
                index += 1;
            }
            continue;
        }

        if let Some(rule) = flags::switch_flag(token) {
            (rule.set)(&mut spec);
            index += 1;
            continue;
        }

        if token == NUMA_FLAG {
            if let Some(policy) = next.and_then(NumaPolicy::parse) {
                numa_found.insert(policy);
                index += 2;
                continue;
            }
        }

        if token == PORT_FLAG || token == HOST_FLAG {
            index += if next.is_some() { 2 } else { 1 };
            continue;
        }

        extra.push(token);
        index += 1;
    }

    spec.numa_policy = NumaPolicy::PRIORITY
        .into_iter()
        .find(|policy| numa_found.contains(policy))
        .unwrap_or_default();

    if !extra.is_empty() {
        spec.extra_flags = Some(extra.join(" "));
    }

    spec
}

/// Tokens an operator may not place in `extra_flags`
pub fn is_reserved_token(token: &str) -> bool {
    token == LLAMA_SERVER_BIN || flags::is_known_flag(token)
}

/// Shortest round-trip rendering, padded to at least `min_decimals` places.
fn format_decimal(value: f64, min_decimals: usize) -> String {
    let mut text = value.to_string();
    let decimals = match text.find('.') {
        Some(dot) => text.len() - dot - 1,
        None => {
            if min_decimals > 0 {
                text.push('.');
            }
            0
        }
    };
    for _ in decimals..min_decimals {
        text.push('0');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ModelLaunchSpec {
        ModelLaunchSpec::for_file("/models/x.gguf")
    }

    #[test]
    fn test_encode_default_order() {
        let command = encode(&sample());
        assert_eq!(
            command,
            "/app/llama-server -m /models/x.gguf -ngl 99 -c 4096 -b 2048 -ub 512 \
             --temp 0.7 --top-p 0.95 --top-k 40 --repeat-penalty 1.10 \
             --port ${PORT} --host 0.0.0.0"
        );
    }

    #[test]
    fn test_encode_optional_flags() {
        let spec = ModelLaunchSpec {
            threads: Some(8),
            memory_lock: true,
            numa_policy: NumaPolicy::Isolate,
            flash_attention: true,
            extra_flags: Some("--no-mmap".to_string()),
            ..sample()
        };
        let command = encode(&spec);
        assert!(command.contains("-b 2048 -t 8 -ub 512"));
        assert!(command.ends_with(
            "--repeat-penalty 1.10 --mlock --numa isolate --flash-attn --no-mmap --port ${PORT} --host 0.0.0.0"
        ));
    }

    #[test]
    fn test_round_trip() {
        let specs = [
            sample(),
            ModelLaunchSpec {
                gpu_layers: 0,
                context_size: 32768,
                batch_size: 512,
                ubatch_size: 128,
                threads: Some(16),
                temperature: 1.0,
                top_p: 1.0,
                top_k: 0,
                repeat_penalty: 1.125,
                memory_lock: true,
                numa_policy: NumaPolicy::Numactl,
                flash_attention: true,
                extra_flags: Some("--no-mmap --cache-type-k q8_0".to_string()),
                ..ModelLaunchSpec::for_file("models/qwen.gguf")
            },
            ModelLaunchSpec {
                temperature: 0.0,
                top_p: 0.0,
                repeat_penalty: 0.9,
                numa_policy: NumaPolicy::Distribute,
                ..sample()
            },
        ];
        for spec in specs {
            assert!(spec.validate().is_ok());
            assert_eq!(decode(&encode(&spec)), spec);
        }
    }

    #[test]
    fn test_decode_missing_flags_use_defaults() {
        let spec = decode("/app/llama-server -m /models/a.gguf -c 8192");
        assert_eq!(spec.file_path, "/models/a.gguf");
        assert_eq!(spec.context_size, 8192);
        assert_eq!(spec.gpu_layers, 99);
        assert_eq!(spec.repeat_penalty, 1.10);
        assert_eq!(spec.threads, None);
        assert_eq!(spec.extra_flags, None);
    }

    #[test]
    fn test_decode_first_match_wins_and_strips_all() {
        let spec = decode("/app/llama-server -m /m.gguf -c 1024 -c 2048 --port ${PORT}");
        assert_eq!(spec.context_size, 1024);
        assert_eq!(spec.extra_flags, None);
    }

    #[test]
    fn test_decode_numa_priority() {
        let spec = decode("/app/llama-server -m /m.gguf --numa numactl --numa distribute");
        assert_eq!(spec.numa_policy, NumaPolicy::Distribute);

        let spec = decode("/app/llama-server -m /m.gguf --numa none");
        assert_eq!(spec.numa_policy, NumaPolicy::None);
        assert_eq!(spec.extra_flags, None);
    }

    #[test]
    fn test_decode_hand_written_command() {
        let spec = decode(
            "/app/llama-server  -m /m.gguf   --ctx-size 8192 -ngl 20 --jinja --port ${PORT} --host 127.0.0.1",
        );
        assert_eq!(spec.gpu_layers, 20);
        assert_eq!(spec.context_size, 4096);
        assert_eq!(spec.extra_flags.as_deref(), Some("--ctx-size 8192 --jinja"));
    }

    #[test]
    fn test_decode_malformed_value_falls_back() {
        let spec = decode("/app/llama-server -m /m.gguf --temp hot -ngl 12");
        assert_eq!(spec.temperature, 0.7);
        assert_eq!(spec.gpu_layers, 12);
        assert_eq!(spec.extra_flags, None);
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(1.1, 2), "1.10");
        assert_eq!(format_decimal(1.125, 2), "1.125");
        assert_eq!(format_decimal(1.0, 1), "1.0");
        assert_eq!(format_decimal(0.95, 1), "0.95");
    }

    #[test]
    fn test_reserved_tokens() {
        assert!(is_reserved_token("-ngl"));
        assert!(is_reserved_token("--host"));
        assert!(is_reserved_token(LLAMA_SERVER_BIN));
        assert!(!is_reserved_token("--no-mmap"));
    }
}
