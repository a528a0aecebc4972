//! Machine configuration loader.
//!
//! Parses an INI-style `machine.cfg` into typed structs used to build
//! planner blocks for simulation runs: per-axis resolution and rate limits,
//! the machine acceleration and the stepper settings block.

use std::path::Path;

use anyhow::{Context, Result};
use configparser::ini::Ini;
use thiserror::Error;

use step_exec::config::{settings_flags, Settings, N_AXIS};
use step_exec::planner::PlannerBlock;

use crate::planner_stub::line_block;

/// A malformed or incomplete machine file.
#[derive(Debug, Error)]
pub enum MachineFileError {
    #[error("missing key `{key}` in section [{section}]")]
    MissingKey { section: String, key: String },
}

/// One axis of the machine.
#[derive(Debug, Clone, Copy)]
pub struct AxisConfig {
    pub steps_per_mm: f32,
    /// Maximum feed rate in mm/min.
    pub max_rate: f32,
}

/// The whole parsed machine file.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub axes: [AxisConfig; N_AXIS],
    /// Machine acceleration in mm/min².
    pub acceleration: f32,
    pub settings: Settings,
}

const AXIS_SECTIONS: [&str; N_AXIS] = ["axis_x", "axis_y", "axis_z"];

impl MachineConfig {
    /// Loads and parses a machine file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let mut ini = Ini::new();
        ini.load(path)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("failed to load machine file {}", path.display()))?;

        let mut axes = [AxisConfig {
            steps_per_mm: 0.0,
            max_rate: 0.0,
        }; N_AXIS];
        for (axis, section) in AXIS_SECTIONS.iter().enumerate() {
            axes[axis] = AxisConfig {
                steps_per_mm: require_float(&ini, section, "steps_per_mm")?,
                max_rate: require_float(&ini, section, "max_rate")?,
            };
        }

        let acceleration = require_float(&ini, "machine", "acceleration")?;

        let mut flags = 0;
        if get_bool(&ini, "stepper", "invert_enable")? {
            flags |= settings_flags::INVERT_ST_ENABLE;
        }
        if get_bool(&ini, "stepper", "laser_mode")? {
            flags |= settings_flags::LASER_MODE;
        }
        let settings = Settings {
            step_invert_mask: get_uint(&ini, "stepper", "step_invert_mask")? as u8,
            dir_invert_mask: get_uint(&ini, "stepper", "dir_invert_mask")? as u8,
            stepper_idle_lock_time: get_uint(&ini, "stepper", "idle_lock_time")? as u8,
            flags,
        };
        settings
            .validate()
            .map_err(|err| anyhow::anyhow!("invalid stepper settings: {:?}", err))?;

        Ok(Self {
            axes,
            acceleration,
            settings,
        })
    }

    /// Builds a straight-line block for a relative move in millimeters at
    /// the given feed rate.
    pub fn move_block(&self, delta_mm: [f32; N_AXIS], feed_rate: f32) -> PlannerBlock {
        let mut steps = [0_i32; N_AXIS];
        let mut distance_sqr = 0.0;
        for axis in 0..N_AXIS {
            steps[axis] = (delta_mm[axis] * self.axes[axis].steps_per_mm).round() as i32;
            distance_sqr += delta_mm[axis] * delta_mm[axis];
        }
        line_block(
            steps,
            distance_sqr.sqrt(),
            feed_rate,
            self.acceleration,
        )
    }
}

fn require_float(ini: &Ini, section: &str, key: &str) -> Result<f32> {
    let value = ini
        .getfloat(section, key)
        .map_err(anyhow::Error::msg)?
        .ok_or_else(|| MachineFileError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        })?;
    Ok(value as f32)
}

fn get_uint(ini: &Ini, section: &str, key: &str) -> Result<u64> {
    Ok(ini
        .getuint(section, key)
        .map_err(anyhow::Error::msg)?
        .unwrap_or(0))
}

fn get_bool(ini: &Ini, section: &str, key: &str) -> Result<bool> {
    Ok(ini
        .getbool(section, key)
        .map_err(anyhow::Error::msg)?
        .unwrap_or(false))
}
