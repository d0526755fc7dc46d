//! The HTTP server: endpoint registration and startup.

pub mod context;
pub mod endpoints;
pub mod responses;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use dropshot::{ApiDescription, ConfigDropshot, ConfigLogging, ConfigLoggingLevel, HttpServer, HttpServerStarter};

use crate::{config::Config, server::context::Context};

/// Create an API description for the server.
pub fn create_api_description() -> Result<ApiDescription<Arc<Context>>> {
    fn register_endpoints(api: &mut ApiDescription<Arc<Context>>) -> Result<(), String> {
        api.register(endpoints::get_pricing).map_err(|e| e.to_string())?;
        api.register(endpoints::create_pricing_material)
            .map_err(|e| e.to_string())?;
        api.register(endpoints::update_pricing_material)
            .map_err(|e| e.to_string())?;
        api.register(endpoints::delete_pricing_material)
            .map_err(|e| e.to_string())?;
        api.register(endpoints::slice_fdm).map_err(|e| e.to_string())?;
        api.register(endpoints::slice_sla).map_err(|e| e.to_string())?;
        api.register(endpoints::download_artifact)
            .map_err(|e| e.to_string())?;
        api.register(endpoints::get_health).map_err(|e| e.to_string())?;
        Ok(())
    }

    let mut api = ApiDescription::new();
    if let Err(err) = register_endpoints(&mut api) {
        return Err(anyhow!("failed to register entrypoints: {}", err));
    }

    Ok(api)
}

/// Build the server and its shared context, bound to `bind`.
pub async fn create_server(
    config: Config,
    bind: &str,
) -> Result<(HttpServer<Arc<Context>>, Arc<Context>)> {
    let api = create_api_description()?;

    let config_dropshot = ConfigDropshot {
        bind_address: bind.parse()?,
        request_body_max_bytes: config.max_upload_bytes as usize,
        ..Default::default()
    };

    // Dropshot wants its own logger; request logging stays quiet and the
    // application logs through `tracing`.
    let log = ConfigLogging::StderrTerminal {
        level: ConfigLoggingLevel::Error,
    }
    .to_logger("print-api")
    .map_err(|e| anyhow!("failed to create dropshot logger: {}", e))?;

    let context = Arc::new(Context::new(config)?);

    let server = HttpServerStarter::new(&config_dropshot, api, context.clone(), &log)
        .map_err(|e| anyhow!("failed to create server: {}", e))?
        .start();

    Ok((server, context))
}

/// Run the server until it exits.
pub async fn serve(config: Config, bind: &str) -> Result<()> {
    let (server, _context) = create_server(config, bind).await?;
    tracing::info!(bind = bind, "print-api serving");
    server.await.map_err(|e| anyhow!("server failed: {}", e))
}
