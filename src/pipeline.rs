//! The per-request slicing pipeline.
//!
//! A linear state machine: classify the upload, extract archives, convert
//! to a canonical STL, optimize orientation, measure, validate against the
//! build volume, slice, parse the artifact, price. Every filesystem path
//! created along the way lands on the request's cleanup list, and the list
//! is torn down on every exit, success or failure. The one survivor is the
//! sliced artifact itself, which a scheduled purge ages out separately.

use std::{path::PathBuf, sync::Arc};

use bytes::Bytes;

use crate::{
    archive::{self, ZipLimits},
    convert::{classify, Converters},
    error::ApiError,
    estimator, gcode,
    pricing::PricingRegistry,
    slicer::Slicer,
    LayerHeight, PrintStats, Technology,
};

/// Validated-enough form data handed over by the HTTP layer. Field
/// values are still untrusted; the pipeline owns their validation.
#[derive(Debug, Clone)]
pub struct SliceForm {
    /// Original filename of the `choosenFile` part.
    pub file_name: String,

    /// Raw upload bytes.
    pub payload: Bytes,

    /// `layerHeight` field parsed as a float; NaN when unparseable.
    pub layer_height: f64,

    /// `material` field.
    pub material: String,

    /// `infill` field, already clamped to 0..=100.
    pub infill_percent: u8,

    /// `depth` field (2D extrusion height), defaulted to 2.0 mm.
    pub depth_mm: f64,
}

/// What a finished request hands back to the response builder.
#[derive(Debug, Clone)]
pub struct SliceOutcome {
    /// Normalized print statistics.
    pub stats: PrintStats,

    /// The hourly rate the estimate was computed with.
    pub hourly_rate: u32,

    /// File name of the artifact under the output directory.
    pub artifact_name: String,
}

/// Per-request record: the resolved parameters plus the ordered cleanup
/// list.
pub struct UploadContext {
    /// Original upload filename, as submitted.
    pub original_filename: String,

    /// Detected extension, lowercased.
    pub extension: String,

    /// Technology fixed by the request path.
    pub technology: Technology,

    /// Resolved layer height.
    pub layer: LayerHeight,

    /// Requested material.
    pub material: String,

    /// Infill density, percent.
    pub infill_percent: u8,

    /// Extrusion depth for 2D sources, millimeters.
    pub depth_mm: f64,

    cleanup: Vec<PathBuf>,
}

impl UploadContext {
    /// Record a path to be removed when the request finishes.
    pub fn track(&mut self, path: PathBuf) {
        self.cleanup.push(path);
    }

    /// Remove every tracked path. Per-path failures are logged and
    /// swallowed; cleanup never fails a request that already has an
    /// answer.
    pub async fn cleanup(&mut self) {
        for path in self.cleanup.drain(..) {
            let result = if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to clean up request file");
                }
            }
        }
    }
}

/// The slicing pipeline, shared by every request past admission.
pub struct Pipeline {
    input_dir: PathBuf,
    zip_limits: ZipLimits,
    converters: Converters,
    slicer: Slicer,
    pricing: Arc<PricingRegistry>,
}

impl Pipeline {
    /// Assemble the pipeline.
    pub fn new(
        input_dir: PathBuf,
        zip_limits: ZipLimits,
        converters: Converters,
        slicer: Slicer,
        pricing: Arc<PricingRegistry>,
    ) -> Self {
        Self {
            input_dir,
            zip_limits,
            converters,
            slicer,
            pricing,
        }
    }

    /// Run one request through the whole state machine. Cleanup runs
    /// unconditionally before the result is returned.
    pub async fn process(
        &self,
        technology: Technology,
        form: SliceForm,
    ) -> Result<SliceOutcome, ApiError> {
        let mut ctx = self.validate(technology, &form)?;
        let result = self.run(&mut ctx, &form).await;
        ctx.cleanup().await;
        result
    }

    /// Field validation; nothing touches the filesystem yet.
    fn validate(&self, technology: Technology, form: &SliceForm) -> Result<UploadContext, ApiError> {
        if !form.layer_height.is_finite() || form.layer_height <= 0.0 {
            return Err(ApiError::InvalidLayerHeight);
        }
        let layer = technology
            .resolve_layer_height(form.layer_height)
            .ok_or(ApiError::InvalidLayerHeightForTechnology {
                technology,
                requested: form.layer_height,
            })?;

        if form.material.trim().is_empty() {
            return Err(ApiError::Validation("material is required".to_string()));
        }

        let extension = PathBuf::from(&form.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if extension != "zip" && classify(&extension).is_none() {
            return Err(ApiError::UnsupportedFileType(form.file_name.clone()));
        }

        Ok(UploadContext {
            original_filename: form.file_name.clone(),
            extension,
            technology,
            layer,
            material: form.material.trim().to_string(),
            infill_percent: form.infill_percent,
            depth_mm: form.depth_mm,
            cleanup: Vec::new(),
        })
    }

    async fn run(&self, ctx: &mut UploadContext, form: &SliceForm) -> Result<SliceOutcome, ApiError> {
        // UPLOADED: persist the multipart payload under its (lowercased)
        // original extension.
        let upload_path = self
            .input_dir
            .join(format!("upload-{}.{}", uuid::Uuid::new_v4(), ctx.extension));
        ctx.track(upload_path.clone());
        tokio::fs::write(&upload_path, &form.payload)
            .await
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to store upload: {}", e)))?;

        // EXTRACTED: archives are unpacked into a fresh per-request
        // directory and the first printable entry is selected.
        let mut model = upload_path;
        if ctx.extension == "zip" {
            let extract_dir = self
                .input_dir
                .join(format!("extract-{}", uuid::Uuid::new_v4()));
            // Tracked before extraction so a partial unpack still gets
            // removed.
            ctx.track(extract_dir.clone());
            model = archive::extract_first_supported(&model, &extract_dir, self.zip_limits).await?;
        }

        // CLASSIFIED -> CONVERTED: translate the source into a canonical
        // triangular mesh. No repair, only translation.
        let extension = model
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let kind = classify(&extension)
            .ok_or_else(|| ApiError::UnsupportedFileType(ctx.original_filename.clone()))?;
        if let Some(converted) = self.converters.to_stl(kind, &model, ctx.depth_mm).await? {
            ctx.track(converted.clone());
            model = converted;
        }

        // ORIENTED: best effort only.
        if let Some(oriented) = self.converters.orient(&model, ctx.technology).await {
            ctx.track(oriented.clone());
            model = oriented;
        }

        // MEASURED -> VALIDATED.
        let measured = self.slicer.measure(&model).await?;
        self.slicer.validate_build_volume(ctx.technology, measured)?;
        let object_height_mm = measured.z;

        // SLICED.
        let artifact = self
            .slicer
            .slice(ctx.technology, ctx.layer, ctx.infill_percent, &model)
            .await?;
        let artifact_name = artifact
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("artifact has no file name")))?;

        // PARSED.
        let (print_time_seconds, print_time_readable, material_used_m) = match ctx.technology {
            Technology::FDM => {
                let text = tokio::fs::read_to_string(&artifact).await.map_err(|e| {
                    ApiError::Internal(anyhow::anyhow!("failed to read sliced gcode: {}", e))
                })?;
                let stats = gcode::parse_fdm_stats(&text);
                (
                    stats.print_time_seconds,
                    gcode::readable_time(stats.print_time_seconds),
                    stats.filament_mm / 1000.0,
                )
            }
            Technology::SLA => {
                // The resin artifact carries no usable time metadata;
                // estimate from layer count when the model has height.
                if object_height_mm > 0.0 {
                    let seconds = gcode::estimate_sla_seconds(object_height_mm, ctx.layer.mm);
                    let readable = format!("{}(Est.)", gcode::readable_time(seconds));
                    (seconds, readable, 0.0)
                } else {
                    (0, String::new(), 0.0)
                }
            }
        };

        // PRICED.
        let hourly_rate = self.pricing.rate_for(ctx.technology, &ctx.material);
        let estimated_price_huf = estimator::estimate_price_huf(print_time_seconds, hourly_rate);

        Ok(SliceOutcome {
            stats: PrintStats {
                print_time_seconds,
                print_time_readable,
                material_used_m,
                object_height_mm,
                estimated_price_huf,
            },
            hourly_rate,
            artifact_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandRunner;
    use std::path::Path;

    fn pipeline_in(dir: &Path) -> Pipeline {
        let runner = CommandRunner::new(false);
        Pipeline::new(
            dir.join("input"),
            ZipLimits {
                max_entries: 10,
                max_uncompressed_bytes: 1024 * 1024,
            },
            Converters::new(&dir.join("converters"), runner.clone()),
            Slicer::new(
                Path::new("/nonexistent/prusa-slicer"),
                &dir.join("configs"),
                &dir.join("output"),
                runner,
            ),
            Arc::new(PricingRegistry::load(&dir.join("configs/pricing.json"))),
        )
    }

    fn form(file_name: &str, layer_height: f64) -> SliceForm {
        SliceForm {
            file_name: file_name.to_string(),
            payload: Bytes::from_static(b"solid model"),
            layer_height,
            material: "PLA".to_string(),
            infill_percent: 20,
            depth_mm: 2.0,
        }
    }

    #[tokio::test]
    async fn rejects_non_finite_layer_height() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path());
        let err = pipeline
            .process(Technology::FDM, form("model.stl", f64::NAN))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_LAYER_HEIGHT");

        let err = pipeline
            .process(Technology::FDM, form("model.stl", -0.2))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_LAYER_HEIGHT");
    }

    #[tokio::test]
    async fn rejects_layer_height_outside_technology_set() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path());
        // 0.05 is a valid SLA height but not an FDM one.
        let err = pipeline
            .process(Technology::FDM, form("model.stl", 0.05))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_LAYER_HEIGHT_FOR_TECHNOLOGY");
    }

    #[tokio::test]
    async fn rejects_unsupported_extension_before_filesystem_work() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path());
        let err = pipeline
            .process(Technology::FDM, form("malware.exe", 0.2))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_FILE_TYPE");
        // validate() failed before the input dir was ever touched.
        assert!(!dir.path().join("input").exists());
    }

    #[tokio::test]
    async fn rejects_missing_material() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path());
        let mut bad = form("model.stl", 0.2);
        bad.material = "  ".to_string();
        let err = pipeline.process(Technology::FDM, bad).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn failure_paths_clean_up_the_upload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("input")).unwrap();
        let pipeline = pipeline_in(dir.path());
        // The measure step fails (no slicer binary); the stored upload
        // must be gone regardless.
        let err = pipeline
            .process(Technology::FDM, form("model.stl", 0.2))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INTERNAL_PROCESSING_ERROR");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("input"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn cleanup_tolerates_already_missing_paths() {
        let mut ctx = UploadContext {
            original_filename: "model.stl".to_string(),
            extension: "stl".to_string(),
            technology: Technology::FDM,
            layer: Technology::FDM.resolve_layer_height(0.2).unwrap(),
            material: "PLA".to_string(),
            infill_percent: 20,
            depth_mm: 2.0,
            cleanup: Vec::new(),
        };
        ctx.track(PathBuf::from("/nonexistent/upload-gone.stl"));
        ctx.cleanup().await;
    }
}
