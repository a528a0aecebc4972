//! Error types for the step execution core.
//!
//! Runtime step generation never surfaces errors; rate and range problems
//! are resolved locally by clamping, deferral or a clean idle. Only
//! configuration validation can fail.

/// Represents errors found while validating stepper settings.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConfigError {
    /// The step invert mask addresses an axis outside the configured set.
    InvalidStepInvertMask,
    /// The direction invert mask addresses an axis outside the configured set.
    InvalidDirInvertMask,
}
