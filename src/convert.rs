//! Upload classification and dispatch to the external geometry
//! converters.
//!
//! Converters are opaque command-line tools living in the converters
//! directory, all sharing the `<tool> <input> <output> [extra]` argv
//! shape. They reject invalid geometry rather than repairing it; those
//! rejections surface as client errors through the [ErrorClassifier].

use std::path::{Path, PathBuf};

use crate::{
    error::{ApiError, ErrorClassifier, HintClassifier},
    runner::{CommandRunner, RunError},
    Technology,
};

/// Source category an upload falls into, decided purely by extension.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Already a triangular mesh in the canonical format.
    Stl,

    /// Raster image, extruded into a plate.
    Image,

    /// 2D vector geometry, extruded by `depth` millimeters.
    Vector,

    /// Polygonal mesh in a non-canonical format.
    Mesh,

    /// CAD interchange format, meshed by the converter.
    Cad,
}

impl SourceKind {
    /// The converter executable stem for this kind, or `None` when no
    /// conversion is needed.
    pub fn converter(&self) -> Option<&'static str> {
        match self {
            Self::Stl => None,
            Self::Image => Some("img2stl"),
            Self::Vector => Some("vector2stl"),
            Self::Mesh => Some("mesh2stl"),
            Self::Cad => Some("cad2stl"),
        }
    }

    /// Whether the converter takes the 2D extrusion depth argument.
    pub fn takes_depth(&self) -> bool {
        matches!(self, Self::Image | Self::Vector)
    }
}

/// Map a lowercased extension onto its source category. Returns `None`
/// for anything outside the supported union.
pub fn classify(extension: &str) -> Option<SourceKind> {
    match extension {
        "stl" => Some(SourceKind::Stl),
        "png" | "jpg" | "jpeg" | "bmp" => Some(SourceKind::Image),
        "dxf" | "svg" | "eps" | "pdf" => Some(SourceKind::Vector),
        "obj" | "3mf" | "ply" => Some(SourceKind::Mesh),
        "stp" | "step" | "igs" | "iges" => Some(SourceKind::Cad),
        _ => None,
    }
}

/// Handle to the converter tool directory.
pub struct Converters {
    dir: PathBuf,
    runner: CommandRunner,
    classifier: HintClassifier,
}

impl Converters {
    /// Create a dispatcher for the executables under `dir`.
    pub fn new(dir: &Path, runner: CommandRunner) -> Self {
        Self {
            dir: dir.to_owned(),
            runner,
            classifier: HintClassifier,
        }
    }

    /// Produce a canonical STL next to `input` (`<input>.stl`). Returns
    /// `None` when the source already is an STL.
    pub async fn to_stl(
        &self,
        kind: SourceKind,
        input: &Path,
        depth_mm: f64,
    ) -> Result<Option<PathBuf>, ApiError> {
        let Some(tool) = kind.converter() else {
            return Ok(None);
        };

        let output = PathBuf::from(format!("{}.stl", input.display()));
        let input_arg = input.display().to_string();
        let output_arg = output.display().to_string();
        let depth_arg = format!("{}", depth_mm);

        let mut args = vec![input_arg.as_str(), output_arg.as_str()];
        if kind.takes_depth() {
            args.push(depth_arg.as_str());
        }

        match self.runner.run(&self.dir.join(tool), &args).await {
            Ok(_) => {}
            Err(RunError::Failed { output: diagnostic, .. })
                if self.classifier.is_source_geometry_error(tool, &diagnostic) =>
            {
                return Err(ApiError::InvalidSourceGeometry {
                    detail: clip(&diagnostic),
                });
            }
            Err(e) => {
                return Err(ApiError::Internal(anyhow::anyhow!(
                    "converter {} failed: {}",
                    tool,
                    e
                )));
            }
        }

        if !output.exists() {
            return Err(ApiError::Internal(anyhow::anyhow!(
                "converter {} exited cleanly but produced no {}",
                tool,
                output.display()
            )));
        }
        Ok(Some(output))
    }

    /// Best-effort orientation optimization, producing
    /// `<stem>_oriented.stl`. Failures never fail the request; the
    /// caller keeps printing the pre-orientation mesh.
    pub async fn orient(&self, input: &Path, technology: Technology) -> Option<PathBuf> {
        let stem = input.file_stem().and_then(|stem| stem.to_str())?;
        let output = input.with_file_name(format!("{}_oriented.stl", stem));
        let input_arg = input.display().to_string();
        let output_arg = output.display().to_string();

        let result = self
            .runner
            .run(
                &self.dir.join("orient"),
                &[input_arg.as_str(), output_arg.as_str(), technology.as_str()],
            )
            .await;

        match result {
            Ok(_) if output.exists() => Some(output),
            Ok(_) => {
                tracing::warn!(
                    input = %input.display(),
                    "orientation optimizer produced no output, keeping original orientation"
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    input = %input.display(),
                    error = %e,
                    "orientation optimizer failed, keeping original orientation"
                );
                // The optimizer copies its input over the output on
                // internal failure; only trust that file if it exists.
                output.exists().then_some(output)
            }
        }
    }
}

fn clip(diagnostic: &str) -> String {
    let trimmed = diagnostic.trim();
    match trimmed.char_indices().nth(300) {
        None => trimmed.to_string(),
        Some((index, _)) => format!("{}...", &trimmed[..index]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_the_supported_union() {
        assert_eq!(classify("stl"), Some(SourceKind::Stl));
        assert_eq!(classify("jpeg"), Some(SourceKind::Image));
        assert_eq!(classify("svg"), Some(SourceKind::Vector));
        assert_eq!(classify("3mf"), Some(SourceKind::Mesh));
        assert_eq!(classify("step"), Some(SourceKind::Cad));
        assert_eq!(classify("exe"), None);
        assert_eq!(classify("zip"), None);
    }

    #[test]
    fn only_2d_kinds_take_depth() {
        assert!(SourceKind::Image.takes_depth());
        assert!(SourceKind::Vector.takes_depth());
        assert!(!SourceKind::Mesh.takes_depth());
        assert!(!SourceKind::Cad.takes_depth());
    }

    #[tokio::test]
    async fn stl_needs_no_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let converters = Converters::new(dir.path(), CommandRunner::new(false));
        let result = converters
            .to_stl(SourceKind::Stl, Path::new("model.stl"), 2.0)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn geometry_rejection_becomes_a_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("vector2stl");
        std::fs::write(
            &tool,
            "#!/bin/sh\necho 'CRITICAL ERROR: No closed 2D geometry found.' >&2\nexit 1\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let converters = Converters::new(dir.path(), CommandRunner::new(false));
        let input = dir.path().join("drawing.svg");
        std::fs::write(&input, b"<svg/>").unwrap();
        let err = converters
            .to_stl(SourceKind::Vector, &input, 2.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidSourceGeometry { .. }));
    }

    #[tokio::test]
    async fn unknown_converter_failure_stays_internal() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("cad2stl");
        std::fs::write(&tool, "#!/bin/sh\necho 'segfault' >&2\nexit 1\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let converters = Converters::new(dir.path(), CommandRunner::new(false));
        let input = dir.path().join("part.step");
        std::fs::write(&input, b"ISO-10303-21;").unwrap();
        let err = converters
            .to_stl(SourceKind::Cad, &input, 2.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
    }

    #[tokio::test]
    async fn orientation_failure_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        // No orient executable at all: spawn fails, request continues.
        let converters = Converters::new(dir.path(), CommandRunner::new(false));
        let input = dir.path().join("model.stl");
        std::fs::write(&input, b"solid").unwrap();
        assert!(converters.orient(&input, Technology::FDM).await.is_none());
    }
}
