//! The slicing orchestrator: model measurement, build-volume checks,
//! profile selection, and the final slicer invocation.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    sync::LazyLock,
};

use regex::Regex;

use crate::{
    error::ApiError,
    runner::CommandRunner,
    LayerHeight, Technology, Volume,
};

static INFO_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^size_([xyz])\s*=\s*(-?[0-9]+(?:\.[0-9]+)?)").expect("static regex"));

/// Disambiguates artifacts produced within the same millisecond.
static OUTPUT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Handle to the external slicer binary plus the directories it reads
/// profiles from and writes artifacts into.
pub struct Slicer {
    bin: PathBuf,
    configs_dir: PathBuf,
    output_dir: PathBuf,
    runner: CommandRunner,
}

impl Slicer {
    /// Create a slicer handle.
    pub fn new(bin: &Path, configs_dir: &Path, output_dir: &Path, runner: CommandRunner) -> Self {
        Self {
            bin: bin.to_owned(),
            configs_dir: configs_dir.to_owned(),
            output_dir: output_dir.to_owned(),
            runner,
        }
    }

    /// Run the slicer in info mode and parse the model extents. Axes the
    /// slicer does not report are treated as 0.
    pub async fn measure(&self, model: &Path) -> Result<Volume, ApiError> {
        let model_arg = model.display().to_string();
        let output = self
            .runner
            .run(&self.bin, &["--info", model_arg.as_str()])
            .await
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("slicer info mode failed: {}", e)))?;

        Ok(parse_info_sizes(&output.stdout))
    }

    /// Reject models that do not fit the technology's build volume. The
    /// check runs before the slicer proper so oversized uploads never
    /// consume a slicing subprocess.
    pub fn validate_build_volume(
        &self,
        technology: Technology,
        measured: Volume,
    ) -> Result<(), ApiError> {
        let limit = technology.build_volume();
        if measured.exceeds(&limit) {
            return Err(ApiError::ModelExceedsBuildVolume {
                technology,
                measured,
                limit,
            });
        }
        Ok(())
    }

    /// Profile file for `(technology, layer height)`:
    /// `<CONFIGS_DIR>/<TECH>_<layer>mm.ini`.
    pub fn profile_path(&self, technology: Technology, layer: LayerHeight) -> PathBuf {
        self.configs_dir
            .join(format!("{}_{}mm.ini", technology.as_str(), layer.label))
    }

    /// Slice `model` into the output directory and return the artifact
    /// path. A missing profile is a server error, not the client's
    /// fault.
    pub async fn slice(
        &self,
        technology: Technology,
        layer: LayerHeight,
        infill_percent: u8,
        model: &Path,
    ) -> Result<PathBuf, ApiError> {
        let profile = self.profile_path(technology, layer);
        if !profile.exists() {
            return Err(ApiError::Internal(anyhow::anyhow!(
                "slicer profile {} is missing",
                profile.display()
            )));
        }

        let artifact = self.output_dir.join(format!(
            "output-{}-{}.{}",
            chrono::Utc::now().timestamp_millis(),
            OUTPUT_COUNTER.fetch_add(1, Ordering::Relaxed),
            technology.artifact_extension()
        ));

        let profile_arg = profile.display().to_string();
        let artifact_arg = artifact.display().to_string();
        let model_arg = model.display().to_string();
        let fill_arg = format!("{}%", infill_percent);

        let mut args = vec!["--load", profile_arg.as_str(), "--center", "100,100"];
        match technology {
            Technology::FDM => {
                args.extend([
                    "--support-material",
                    "--support-material-auto",
                    "--gcode-flavor",
                    "marlin",
                    "--export-gcode",
                    "--output",
                    artifact_arg.as_str(),
                    "--fill-density",
                    fill_arg.as_str(),
                ]);
            }
            Technology::SLA => {
                args.extend(["--export-sla", "--output", artifact_arg.as_str()]);
            }
        }
        args.push(model_arg.as_str());

        self.runner
            .run(&self.bin, &args)
            .await
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("slicer failed: {}", e)))?;

        if !artifact.exists() {
            return Err(ApiError::Internal(anyhow::anyhow!(
                "slicer exited cleanly but produced no {}",
                artifact.display()
            )));
        }
        Ok(artifact)
    }
}

/// Pull `size_x/y/z` lines out of the slicer's info output.
fn parse_info_sizes(info: &str) -> Volume {
    let mut volume = Volume {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
    for caps in INFO_SIZE.captures_iter(info) {
        let Ok(value) = caps[2].parse::<f64>() else {
            continue;
        };
        match &caps[1] {
            "x" => volume.x = value,
            "y" => volume.y = value,
            _ => volume.z = value,
        }
    }
    volume
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_info_sizes() {
        let info = "filename = model.stl\nsize_x = 100.000\nsize_y = 100.000\nsize_z = 50.000\n";
        let volume = parse_info_sizes(info);
        assert_eq!(volume, Volume { x: 100.0, y: 100.0, z: 50.0 });
    }

    #[test]
    fn missing_axes_parse_as_zero() {
        let volume = parse_info_sizes("size_z = 8.5\n");
        assert_eq!(volume, Volume { x: 0.0, y: 0.0, z: 8.5 });
    }

    #[test]
    fn profile_paths_use_canonical_layer_labels() {
        let runner = CommandRunner::new(false);
        let slicer = Slicer::new(
            Path::new("prusa-slicer"),
            Path::new("configs"),
            Path::new("output"),
            runner,
        );
        let layer = Technology::FDM.resolve_layer_height(0.2).unwrap();
        assert_eq!(
            slicer.profile_path(Technology::FDM, layer),
            PathBuf::from("configs/FDM_0.2mm.ini")
        );
        let layer = Technology::SLA.resolve_layer_height(0.025).unwrap();
        assert_eq!(
            slicer.profile_path(Technology::SLA, layer),
            PathBuf::from("configs/SLA_0.025mm.ini")
        );
    }

    #[test]
    fn build_volume_rejection_names_both_triples() {
        let runner = CommandRunner::new(false);
        let slicer = Slicer::new(
            Path::new("prusa-slicer"),
            Path::new("configs"),
            Path::new("output"),
            runner,
        );
        let measured = Volume { x: 130.0, y: 100.0, z: 100.0 };
        let err = slicer
            .validate_build_volume(Technology::SLA, measured)
            .unwrap_err();
        assert_eq!(err.error_code(), "MODEL_EXCEEDS_BUILD_VOLUME");
        let message = err.public_message();
        assert!(message.contains("130.0"));
        assert!(message.contains("120.0"));

        assert!(slicer
            .validate_build_volume(Technology::FDM, Volume { x: 250.0, y: 210.0, z: 210.0 })
            .is_ok());
    }
}
