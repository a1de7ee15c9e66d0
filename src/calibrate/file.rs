use std::{fs, path::Path};

use crate::error::{Result, TsError};

use super::{Rotation, IDENTITY_COEFFICIENTS};

/// Persisted calibration: seven affine coefficients, the output resolution
/// at calibration time and the rotation it was taken under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CalibrationFile {
    pub coefficients: [i32; 7],
    pub resolution: Option<(u32, u32)>,
    pub rotation: Rotation,
}

impl Default for CalibrationFile {
    fn default() -> Self {
        Self {
            coefficients: IDENTITY_COEFFICIENTS,
            resolution: None,
            rotation: Rotation::Normal,
        }
    }
}

impl CalibrationFile {
    /// Parses whitespace-separated integers. Resolution and rotation are
    /// optional so files from older calibrators still load.
    pub fn parse(text: &str) -> Result<Self> {
        let values = text
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<i64>()
                    .map_err(|_| TsError::Calibration(format!("not an integer: '{token}'")))
            })
            .collect::<Result<Vec<_>>>()?;

        if values.len() < 7 {
            return Err(TsError::Calibration(format!(
                "expected at least 7 coefficients, found {}",
                values.len()
            )));
        }

        let mut coefficients = [0i32; 7];
        for (dst, src) in coefficients.iter_mut().zip(&values) {
            *dst = i32::try_from(*src)
                .map_err(|_| TsError::Calibration(format!("coefficient out of range: {src}")))?;
        }
        if coefficients[6] == 0 {
            return Err(TsError::Calibration("scale coefficient a6 is zero".into()));
        }

        let resolution = match (values.get(7), values.get(8)) {
            (Some(&w), Some(&h)) if w > 0 && h > 0 => Some((
                u32::try_from(w).map_err(|_| TsError::Calibration(format!("bad width {w}")))?,
                u32::try_from(h).map_err(|_| TsError::Calibration(format!("bad height {h}")))?,
            )),
            _ => None,
        };

        let rotation = match values.get(9) {
            Some(&code) => u8::try_from(code)
                .ok()
                .and_then(Rotation::from_code)
                .ok_or_else(|| TsError::Calibration(format!("bad rotation code {code}")))?,
            None => Rotation::Normal,
        };

        Ok(Self {
            coefficients,
            resolution,
            rotation,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| TsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Loads `path`, falling back to the identity map when the file is absent.
    pub fn load_or_identity(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(TsError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                log::warn!(
                    "calibration file {} not found, using identity",
                    path.display()
                );
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn render(&self) -> String {
        let (w, h) = self.resolution.unwrap_or((0, 0));
        let mut out = self
            .coefficients
            .iter()
            .map(i32::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!(" {w} {h} {}\n", self.rotation.code()));
        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render()).map_err(|source| TsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_seven_value_file_has_no_resolution() {
        let file = CalibrationFile::parse("65536 0 0 0 65536 0 65536\n").unwrap();
        assert_eq!(file.coefficients, IDENTITY_COEFFICIENTS);
        assert_eq!(file.resolution, None);
        assert_eq!(file.rotation, Rotation::Normal);
    }

    #[test]
    fn full_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pointercal");
        let file = CalibrationFile {
            coefficients: [13_107, -12, -1_300_000, 40, 8_738, -900_000, 65_536],
            resolution: Some((800, 480)),
            rotation: Rotation::UpsideDown,
        };
        file.write(&path).unwrap();
        assert_eq!(CalibrationFile::load(&path).unwrap(), file);
    }

    #[test]
    fn rejects_short_and_zero_scale_files() {
        assert!(CalibrationFile::parse("1 2 3").is_err());
        assert!(CalibrationFile::parse("1 0 0 0 1 0 0").is_err());
        assert!(CalibrationFile::parse("1 0 0 0 1 0 1 800 480 7").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_identity() {
        let dir = tempfile::tempdir().unwrap();
        let file = CalibrationFile::load_or_identity(&dir.path().join("absent")).unwrap();
        assert_eq!(file, CalibrationFile::default());
    }
}
