//! Host ISA detection.
//!
//! The concat generator emits VEX-encoded `xmm`/`ymm` forms (AVX2 for the
//! integer max instructions) and EVEX-encoded `zmm` forms (AVX-512F, plus
//! AVX-512BW for the byte max). `DeviceProfile::max_vector_bits` is the
//! widest tier the host can actually execute.

/// ISA level for dispatch decisions, ordered by capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IsaLevel {
    /// No usable vector ISA: only the scalar reference path runs.
    Scalar,
    /// AVX2: 128- and 256-bit tiers.
    Avx2,
    /// AVX-512F + AVX-512BW: all three tiers.
    Avx512,
}

impl IsaLevel {
    /// Widest vector register this level can load, clamp and store.
    /// Zero means no generated code can run.
    pub const fn max_vector_bits(self) -> usize {
        match self {
            IsaLevel::Scalar => 0,
            IsaLevel::Avx2 => 256,
            IsaLevel::Avx512 => 512,
        }
    }
}

/// Hardware profile for the concat compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    pub isa: IsaLevel,
}

impl DeviceProfile {
    /// Detect the current hardware.
    pub fn detect() -> Self {
        let isa = detect_isa_level();
        log::debug!("concat device profile: {isa:?}");
        DeviceProfile { isa }
    }

    /// Build a profile for a fixed ISA (tests, cross-generation).
    pub const fn with_isa(isa: IsaLevel) -> Self {
        DeviceProfile { isa }
    }

    #[inline]
    pub const fn max_vector_bits(&self) -> usize {
        self.isa.max_vector_bits()
    }

    /// Whether generated x86_64 code can be built and executed in this process.
    #[inline]
    pub fn can_execute_jit(&self) -> bool {
        cfg!(all(target_arch = "x86_64", unix, feature = "jit-x86")) && self.isa != IsaLevel::Scalar
    }
}

#[cfg(target_arch = "x86_64")]
fn detect_isa_level() -> IsaLevel {
    if is_x86_feature_detected!("avx512f") && is_x86_feature_detected!("avx512bw") {
        IsaLevel::Avx512
    } else if is_x86_feature_detected!("avx2") {
        IsaLevel::Avx2
    } else {
        IsaLevel::Scalar
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn detect_isa_level() -> IsaLevel {
    IsaLevel::Scalar
}

impl std::fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} | max {} bits", self.isa, self.max_vector_bits())
    }
}
