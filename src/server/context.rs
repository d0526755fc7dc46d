//! Shared server state.

use std::{sync::Arc, time::Instant};

use anyhow::Result;

use crate::{
    admission::{RateLimiter, SliceGate},
    archive::ZipLimits,
    config::Config,
    convert::Converters,
    errlog::ErrorLog,
    pipeline::Pipeline,
    pricing::PricingRegistry,
    runner::CommandRunner,
    slicer::Slicer,
};

/// Context for a given server -- everything a request handler needs:
/// configuration, the pricing registry, both admission gates, the error
/// log, and the slicing pipeline itself.
pub struct Context {
    /// Resolved runtime configuration.
    pub config: Config,

    /// Shared pricing registry.
    pub pricing: Arc<PricingRegistry>,

    /// Per-IP fixed-window rate limiter for the slicing endpoints.
    pub limiter: RateLimiter,

    /// Bounded worker gate for the slicing endpoints.
    pub gate: SliceGate,

    /// Rolling error log for internal failures.
    pub errlog: ErrorLog,

    /// The slicing pipeline.
    pub pipeline: Pipeline,

    /// Process start, for the health endpoint's uptime.
    pub started: Instant,
}

impl Context {
    /// Build the full server state from configuration. Creates working
    /// directories and loads (or seeds) the pricing registry.
    pub fn new(config: Config) -> Result<Self> {
        config.prepare_directories()?;

        let runner = CommandRunner::new(config.debug_command_logs);
        let pricing = Arc::new(PricingRegistry::load(&config.pricing_path()));

        let pipeline = Pipeline::new(
            config.input_dir.clone(),
            ZipLimits {
                max_entries: config.max_zip_entries,
                max_uncompressed_bytes: config.max_zip_uncompressed_bytes,
            },
            Converters::new(&config.converters_dir, runner.clone()),
            Slicer::new(
                &config.slicer_bin,
                &config.configs_dir,
                &config.output_dir,
                runner,
            ),
            pricing.clone(),
        );

        Ok(Self {
            limiter: RateLimiter::new(config.rate_limit_window, config.rate_limit_max_requests),
            gate: SliceGate::new(
                config.max_concurrent_slices,
                config.max_slice_queue_length,
                config.max_slice_queue_wait,
            ),
            errlog: ErrorLog::new(&config.error_log_path),
            pipeline,
            pricing,
            config,
            started: Instant::now(),
        })
    }
}
