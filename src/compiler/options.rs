//! Compiler options, with environment overrides.
//!
//! | Variable | Effect |
//! |---|---|
//! | `GLLM_CONCAT_JIT` | `0`/`false`/`off` forces the scalar reference path |
//! | `GLLM_CONCAT_MAX_BITS` | caps the vector width (`128`, `256` or `512`) |
//! | `GLLM_CONCAT_PAR_MIN_PIXELS` | spatial positions needed before rayon is used |

use crate::compiler::planner::LEGAL_VECTOR_BITS;

pub const ENV_JIT: &str = "GLLM_CONCAT_JIT";
pub const ENV_MAX_BITS: &str = "GLLM_CONCAT_MAX_BITS";
pub const ENV_PAR_MIN_PIXELS: &str = "GLLM_CONCAT_PAR_MIN_PIXELS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerOptions {
    /// Generate native code; when false every op runs the reference path.
    pub enable_jit: bool,
    /// Upper bound on the vector width, on top of what the host supports.
    pub max_vector_bits: usize,
    /// Minimum number of spatial positions before work is split across rayon.
    pub parallel_min_pixels: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            enable_jit: true,
            max_vector_bits: 512,
            parallel_min_pixels: 1024,
        }
    }
}

impl CompilerOptions {
    /// Defaults overridden by the `GLLM_CONCAT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut opts = Self::default();

        if let Some(v) = lookup(ENV_JIT) {
            match v.trim().to_ascii_lowercase().as_str() {
                "0" | "false" | "off" => opts.enable_jit = false,
                "1" | "true" | "on" => opts.enable_jit = true,
                other => log::warn!("ignoring {ENV_JIT}={other:?}"),
            }
        }

        if let Some(v) = lookup(ENV_MAX_BITS) {
            match v.trim().parse::<usize>() {
                Ok(bits) if LEGAL_VECTOR_BITS.contains(&bits) => opts.max_vector_bits = bits,
                _ => log::warn!("ignoring {ENV_MAX_BITS}={v:?}: expected 128, 256 or 512"),
            }
        }

        if let Some(v) = lookup(ENV_PAR_MIN_PIXELS) {
            match v.trim().parse::<usize>() {
                Ok(n) => opts.parallel_min_pixels = n,
                Err(_) => log::warn!("ignoring {ENV_PAR_MIN_PIXELS}={v:?}"),
            }
        }

        opts
    }
}
