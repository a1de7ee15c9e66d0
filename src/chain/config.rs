use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    calibrate::Rotation,
    error::{Result, TsError},
};

use super::{registry, StageContext};

#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    /// Stages listed hardware side first.
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub resolution: Option<[u32; 2]>,
    #[serde(default)]
    pub rotation: u8,
    pub calibration_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub name: String,
    #[serde(default)]
    pub params: String,
}

impl ChainConfig {
    pub fn context(&self) -> StageContext {
        StageContext {
            resolution: self.device.resolution.map(|[w, h]| (w, h)),
            rotation: Rotation::from_code(self.device.rotation).unwrap_or_default(),
            calibration_file: self.device.calibration_file.clone(),
        }
    }
}

pub fn parse_chain_str(text: &str) -> Result<ChainConfig> {
    toml::from_str(text).map_err(|err| TsError::Config(err.to_string()))
}

pub fn parse_chain_file(path: &Path) -> Result<ChainConfig> {
    let text = fs::read_to_string(path).map_err(|source| TsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = parse_chain_str(&text)?;
    // A relative calibration path is relative to the config file.
    if let (Some(calib), Some(dir)) = (&config.device.calibration_file, path.parent()) {
        if calib.is_relative() {
            config.device.calibration_file = Some(dir.join(calib));
        }
    }
    Ok(config)
}

pub fn validate_chain_config(config: &ChainConfig) -> Result<()> {
    if Rotation::from_code(config.device.rotation).is_none() {
        return Err(TsError::Config(format!(
            "device.rotation must be 0..=3, got {}",
            config.device.rotation
        )));
    }
    if let Some([w, h]) = config.device.resolution {
        if w == 0 || h == 0 {
            return Err(TsError::Config(format!(
                "device.resolution must be nonzero, got {w}x{h}"
            )));
        }
    }
    for stage in &config.stages {
        if registry::lookup(&stage.name).is_none() {
            return Err(TsError::UnknownStage(stage.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[device]
resolution = [800, 480]
rotation = 1

[[stage]]
name = "median"
params = "depth=5"

[[stage]]
name = "debounce"
"#;

    #[test]
    fn parses_device_and_stage_list() {
        let config = parse_chain_str(SAMPLE).unwrap();
        validate_chain_config(&config).unwrap();
        assert_eq!(config.stages.len(), 2);
        assert_eq!(config.stages[0].params, "depth=5");
        assert_eq!(config.stages[1].params, "");
        let ctx = config.context();
        assert_eq!(ctx.resolution, Some((800, 480)));
        assert_eq!(ctx.rotation, Rotation::Cw90);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse_chain_str("[device]\nresolutoin = [1, 2]\n").unwrap_err();
        assert!(matches!(err, TsError::Config(_)));
    }

    #[test]
    fn validation_rejects_unknown_stage_and_bad_rotation() {
        let config = parse_chain_str("[[stage]]\nname = \"wobble\"\n").unwrap();
        assert!(matches!(
            validate_chain_config(&config),
            Err(TsError::UnknownStage(name)) if name == "wobble"
        ));

        let config = parse_chain_str("[device]\nrotation = 4\n").unwrap();
        assert!(matches!(
            validate_chain_config(&config),
            Err(TsError::Config(_))
        ));
    }

    #[test]
    fn relative_calibration_path_resolves_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.toml");
        fs::write(&path, "[device]\ncalibration_file = \"pointercal\"\n").unwrap();
        let config = parse_chain_file(&path).unwrap();
        assert_eq!(
            config.device.calibration_file,
            Some(dir.path().join("pointercal"))
        );
    }
}
