//! Engine configuration: a plain struct with a `Default` impl, validated
//! once at startup.

use std::path::PathBuf;

use crate::error::ValidationError;
use crate::model::ForkStrategy;

/// Configuration for a belief-system session.
///
/// `data_dir: None` means in-memory only (the default); the CLI sets it
/// from `--data-dir` when the `durable` feature's `RedbAdapter` is wanted.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: Option<PathBuf>,
    /// Termination backstop for `infer::run_fixed_point` (§4.3). Never
    /// expected to trigger for a well-formed rule set.
    pub max_fixed_point_iterations: usize,
    /// Hop limit for `contradiction::report_tensions`'s context-rule
    /// expansion (Design Note, §9).
    pub tension_context_hops: usize,
    /// Strategy a freshly created root belief system starts with.
    pub default_strategy: ForkStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_fixed_point_iterations: 10_000,
            tension_context_hops: 1,
            default_strategy: ForkStrategy::Coexist,
        }
    }
}

impl EngineConfig {
    /// Reject configurations that would make the engine's termination
    /// argument meaningless.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_fixed_point_iterations == 0 {
            return Err(ValidationError::MalformedIr {
                reason: "max_fixed_point_iterations must be greater than zero".into(),
            });
        }
        Ok(())
    }
}
