//! External transform stages.
//!
//! A stage is one external program invocation with an argument template. The
//! pipeline knows nothing about what the program does; it only renders the
//! arguments for the current item, runs the program, and inspects the exit
//! status.
//!
//! # Overview
//!
//! - [`StageSpec`] - declaration of one stage (program, arguments, policy)
//! - [`StageContext`] - per-item values substituted into the arguments
//! - [`StageRunner`] - executes a stage and reports a [`StageResult`]
//! - [`CommandStageRunner`] - runs the program as a child process

mod result;
mod runner;
pub mod template;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use result::{DIAGNOSTICS_LIMIT, StageResult};
pub use runner::{CommandStageRunner, StageRunner};
pub use template::{StageContext, check_template, render, substitute};

/// Errors in a stage declaration or its rendering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The template names a placeholder that does not exist.
    #[error("unknown placeholder {{{name}}} in `{template}`")]
    UnknownPlaceholder {
        /// The unknown name.
        name: String,
        /// The offending template.
        template: String,
    },

    /// The placeholder exists but has no value for this stage.
    #[error("placeholder {{{name}}} has no value in `{template}`")]
    UnboundPlaceholder {
        /// The unbound name.
        name: String,
        /// The offending template.
        template: String,
    },

    /// The declaration itself is unusable.
    #[error("invalid stage `{stage}`: {reason}")]
    Invalid {
        /// Stage name.
        stage: String,
        /// What is wrong.
        reason: String,
    },
}

/// Declaration of one transform stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageSpec {
    /// Name used in logs and results.
    pub name: String,
    /// Program to execute (looked up on `PATH` when not absolute).
    pub program: String,
    /// Argument templates.
    #[serde(default)]
    pub args: Vec<String>,
    /// Output path template. A stage with an output advances the chain input to
    /// it; a stage without one works in place on the current input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Exit status that counts as success.
    #[serde(default)]
    pub required_exit_code: i32,
    /// Failure is logged but does not fail the item.
    #[serde(default)]
    pub best_effort: bool,
    /// Extra attempts after a failed run.
    #[serde(default)]
    pub retries: u32,
}

impl StageSpec {
    /// Creates a mandatory stage with no output and no retries.
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            output: None,
            required_exit_code: 0,
            best_effort: false,
            retries: 0,
        }
    }

    /// Sets the argument templates.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the output template.
    #[must_use]
    pub fn output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Marks the stage best-effort.
    #[must_use]
    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    /// Sets the number of extra attempts.
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Checks the declaration without rendering it.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Invalid`] for an empty name or program,
    /// [`StageError::UnknownPlaceholder`] for unknown template names, and
    /// [`StageError::UnboundPlaceholder`] when `{output}` is used without an
    /// output template.
    pub fn validate(&self) -> Result<(), StageError> {
        if self.name.trim().is_empty() {
            return Err(StageError::Invalid {
                stage: self.name.clone(),
                reason: "name is empty".to_string(),
            });
        }
        if self.program.trim().is_empty() {
            return Err(StageError::Invalid {
                stage: self.name.clone(),
                reason: "program is empty".to_string(),
            });
        }

        for arg in &self.args {
            check_template(arg)?;
            if self.output.is_none() && template::placeholders_in(arg).contains(&"output") {
                return Err(StageError::UnboundPlaceholder {
                    name: "output".to_string(),
                    template: arg.clone(),
                });
            }
        }

        if let Some(output) = &self.output {
            check_template(output)?;
            if template::placeholders_in(output).contains(&"output") {
                return Err(StageError::Invalid {
                    stage: self.name.clone(),
                    reason: "output template cannot reference {output}".to_string(),
                });
            }
        }
        Ok(())
    }

    /// True when the stage's output template is exactly the item's final artifact.
    #[must_use]
    pub fn writes_final(&self) -> bool {
        self.output.as_deref().map(str::trim) == Some("{final}")
    }

    /// True when running the stage may create or modify the final artifact.
    #[must_use]
    pub fn touches_final(&self) -> bool {
        self.writes_final()
            || self
                .args
                .iter()
                .any(|arg| template::placeholders_in(arg).contains(&"final"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_spec_deserialize_defaults() {
        let spec: StageSpec =
            serde_json::from_str(r#"{"name": "overviews", "program": "gdaladdo"}"#).unwrap();
        assert_eq!(spec.required_exit_code, 0);
        assert!(!spec.best_effort);
        assert_eq!(spec.retries, 0);
        assert!(spec.args.is_empty());
        assert!(spec.output.is_none());
    }

    #[test]
    fn test_stage_spec_rejects_unknown_fields() {
        let result: Result<StageSpec, _> =
            serde_json::from_str(r#"{"name": "x", "program": "y", "besteffort": true}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_output_placeholder_requires_output() {
        let spec = StageSpec::new("warp", "gdalwarp").args(["{input}", "{output}"]);
        assert!(matches!(
            spec.validate(),
            Err(StageError::UnboundPlaceholder { .. })
        ));
        let spec = spec.output("{staging_dir}/resampled_{index}.tif");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_program() {
        let spec = StageSpec::new("warp", " ");
        assert!(matches!(spec.validate(), Err(StageError::Invalid { .. })));
    }

    #[test]
    fn test_touches_final() {
        assert!(StageSpec::new("overviews", "gdaladdo").args(["{final}"]).touches_final());
        assert!(StageSpec::new("tiles", "gdal_translate").output("{final}").touches_final());
        assert!(
            !StageSpec::new("warp", "gdalwarp")
                .args(["{input}", "{output}"])
                .output("{staging_dir}/w.tif")
                .touches_final()
        );
    }

    #[test]
    fn test_writes_final() {
        assert!(StageSpec::new("tiles", "gdal_translate").output("{final}").writes_final());
        assert!(!StageSpec::new("warp", "gdalwarp").output("{staging_dir}/w.tif").writes_final());
    }
}
