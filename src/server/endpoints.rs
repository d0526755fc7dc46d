//! HTTP endpoints: the pricing registry surface, the slicing pipeline
//! surface, artifact downloads, and the health probe.

use std::sync::Arc;

use bytes::Bytes;
use dropshot::{endpoint, Body, HttpError, HttpResponseOk, MultipartBody, Path, RequestContext, UntypedBody};
use http::{Response, StatusCode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiError,
    pipeline::{SliceForm, SliceOutcome},
    pricing::{PriceTable, PricingError},
    server::{context::Context, responses},
    Technology,
};

/// Default infill density when the form omits the field, percent.
const DEFAULT_INFILL_PERCENT: u8 = 20;

/// Default extrusion depth for 2D sources, millimeters.
const DEFAULT_DEPTH_MM: f64 = 2.0;

/** Return the full pricing map. */
#[endpoint {
    method = GET,
    path = "/pricing",
}]
pub async fn get_pricing(
    rqctx: RequestContext<Arc<Context>>,
) -> Result<HttpResponseOk<PriceTable>, HttpError> {
    Ok(HttpResponseOk(rqctx.context().pricing.get_all()))
}

/// Path parameters naming a technology.
#[derive(Deserialize, Debug, JsonSchema, Serialize)]
pub struct TechnologyPath {
    /// Technology segment, canonical uppercase (`FDM` or `SLA`).
    pub technology: String,
}

/// Path parameters naming a material within a technology.
#[derive(Deserialize, Debug, JsonSchema, Serialize)]
pub struct MaterialPath {
    /// Technology segment, canonical uppercase (`FDM` or `SLA`).
    pub technology: String,

    /// Material identifier; matched case-insensitively.
    pub material: String,
}

/// Body for creating a material.
#[derive(Deserialize, Debug, JsonSchema, Serialize)]
pub struct CreateMaterialBody {
    /// Material identifier to create.
    pub material: String,

    /// Hourly rate in HUF; a positive integer.
    pub price: f64,
}

/// Body for updating a material's price.
#[derive(Deserialize, Debug, JsonSchema, Serialize)]
pub struct UpdatePriceBody {
    /// Hourly rate in HUF; a positive integer.
    pub price: f64,
}

/// Success envelope for pricing mutations.
#[derive(Serialize, Debug, JsonSchema)]
pub struct PricingMutationResponse {
    /// Always true.
    pub success: bool,

    /// Technology the mutation applied to.
    pub technology: String,

    /// Canonical stored material key.
    pub material: String,

    /// The (new) hourly rate; absent on delete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<u32>,
}

/** Create a new material with its hourly rate. */
#[endpoint {
    method = POST,
    path = "/pricing/{technology}",
}]
pub async fn create_pricing_material(
    rqctx: RequestContext<Arc<Context>>,
    path_params: Path<TechnologyPath>,
    body: UntypedBody,
) -> Result<Response<Body>, HttpError> {
    let ctx = rqctx.context();
    if let Some(denied) = admin_denied(ctx, rqctx.request.headers()) {
        return denied;
    }
    let Some(technology) = Technology::parse(&path_params.into_inner().technology) else {
        return responses::envelope_error(StatusCode::NOT_FOUND, "NOT_FOUND", "unknown technology");
    };

    let body: CreateMaterialBody = match parse_json_body(ctx, &body) {
        Ok(body) => body,
        Err(rejected) => return rejected,
    };
    let material = body.material.trim().to_string();
    if material.is_empty() {
        return responses::envelope_error(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "material is required",
        );
    }
    let price = match validate_price(body.price) {
        Ok(price) => price,
        Err(message) => {
            return responses::envelope_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
        }
    };

    match ctx.pricing.create(technology, &material, price) {
        Ok(stored) => responses::json_response(
            StatusCode::CREATED,
            &PricingMutationResponse {
                success: true,
                technology: technology.as_str().to_string(),
                material: stored,
                price: Some(price),
            },
        ),
        Err(e) => pricing_error_response(e),
    }
}

/** Create or update a material's hourly rate. */
#[endpoint {
    method = PATCH,
    path = "/pricing/{technology}/{material}",
}]
pub async fn update_pricing_material(
    rqctx: RequestContext<Arc<Context>>,
    path_params: Path<MaterialPath>,
    body: UntypedBody,
) -> Result<Response<Body>, HttpError> {
    let ctx = rqctx.context();
    if let Some(denied) = admin_denied(ctx, rqctx.request.headers()) {
        return denied;
    }
    let params = path_params.into_inner();
    let Some(technology) = Technology::parse(&params.technology) else {
        return responses::envelope_error(StatusCode::NOT_FOUND, "NOT_FOUND", "unknown technology");
    };
    let body: UpdatePriceBody = match parse_json_body(ctx, &body) {
        Ok(body) => body,
        Err(rejected) => return rejected,
    };
    let price = match validate_price(body.price) {
        Ok(price) => price,
        Err(message) => {
            return responses::envelope_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
        }
    };

    match ctx.pricing.update(technology, params.material.trim(), price) {
        Ok((stored, _created)) => responses::json_response(
            StatusCode::OK,
            &PricingMutationResponse {
                success: true,
                technology: technology.as_str().to_string(),
                material: stored,
                price: Some(price),
            },
        ),
        Err(e) => pricing_error_response(e),
    }
}

/** Delete a material. The `default` material is protected. */
#[endpoint {
    method = DELETE,
    path = "/pricing/{technology}/{material}",
}]
pub async fn delete_pricing_material(
    rqctx: RequestContext<Arc<Context>>,
    path_params: Path<MaterialPath>,
) -> Result<Response<Body>, HttpError> {
    let ctx = rqctx.context();
    if let Some(denied) = admin_denied(ctx, rqctx.request.headers()) {
        return denied;
    }
    let params = path_params.into_inner();
    let Some(technology) = Technology::parse(&params.technology) else {
        return responses::envelope_error(StatusCode::NOT_FOUND, "NOT_FOUND", "unknown technology");
    };

    match ctx.pricing.delete(technology, params.material.trim()) {
        Ok(()) => responses::json_response(
            StatusCode::OK,
            &PricingMutationResponse {
                success: true,
                technology: technology.as_str().to_string(),
                material: params.material.trim().to_string(),
                price: None,
            },
        ),
        Err(e) => pricing_error_response(e),
    }
}

/// The response for a successfully sliced model.
#[derive(Serialize, Debug, JsonSchema)]
pub struct SliceResponse {
    /// Always true.
    pub success: bool,

    /// Technology the model was sliced for.
    pub technology: String,

    /// Material the estimate was priced with.
    pub material: String,

    /// Infill density as a percent string; FDM only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infill: Option<String>,

    /// Hourly rate the estimate was computed with, HUF.
    pub hourly_rate: u32,

    /// Total print time, seconds.
    pub print_time_seconds: u64,

    /// Human readable print time.
    pub print_time_readable: String,

    /// Filament consumed, meters. Zero for SLA.
    pub material_used_m: f64,

    /// Model height as measured by the slicer, millimeters.
    pub object_height_mm: f64,

    /// Estimated price, HUF, snapped up to the nearest 10.
    pub estimated_price_huf: u64,

    /// Where the sliced artifact can be fetched.
    pub download_url: String,
}

/** Slice an uploaded model for filament deposition printing. */
#[endpoint {
    method = POST,
    path = "/slice/FDM",
}]
pub async fn slice_fdm(
    rqctx: RequestContext<Arc<Context>>,
    body: MultipartBody,
) -> Result<Response<Body>, HttpError> {
    handle_slice(&rqctx, Technology::FDM, body).await
}

/** Slice an uploaded model for resin printing. */
#[endpoint {
    method = POST,
    path = "/slice/SLA",
}]
pub async fn slice_sla(
    rqctx: RequestContext<Arc<Context>>,
    body: MultipartBody,
) -> Result<Response<Body>, HttpError> {
    handle_slice(&rqctx, Technology::SLA, body).await
}

/// Shared slicing flow: rate limit, queue admission, multipart parse,
/// pipeline, response.
async fn handle_slice(
    rqctx: &RequestContext<Arc<Context>>,
    technology: Technology,
    body: MultipartBody,
) -> Result<Response<Body>, HttpError> {
    let ctx = rqctx.context();
    let request_path = format!("/slice/{}", technology);

    // Gate one: the per-IP fixed window.
    let ip = client_ip(rqctx);
    if let Err(retry_after_seconds) = ctx.limiter.check(&ip) {
        tracing::info!(ip = %ip, "rate limited slice request");
        return responses::error_response(&ApiError::RateLimitExceeded { retry_after_seconds });
    }

    // Gate two: the bounded worker queue. The permit is held for the
    // rest of the request.
    let _permit = match ctx.gate.admit().await {
        Ok(permit) => permit,
        Err(e) => return responses::error_response(&e),
    };

    let mut multipart = body.content;
    let form = match parse_slice_form(&mut multipart).await {
        Ok(form) => form,
        Err(e) => return responses::error_response(&e),
    };
    let material = form.material.trim().to_string();
    let infill_percent = form.infill_percent;

    match ctx.pipeline.process(technology, form).await {
        Ok(outcome) => {
            responses::json_response(StatusCode::OK, &slice_response(technology, material, infill_percent, outcome))
        }
        Err(e) => {
            if e.is_client_error() {
                tracing::info!(error = %e, path = %request_path, "rejected slice request");
            } else {
                let details = match &e {
                    ApiError::Internal(inner) => format!("{:#}", inner),
                    other => other.to_string(),
                };
                tracing::error!(error = %details, path = %request_path, "slice request failed");
                ctx.errlog.record(&e.to_string(), &details, &request_path).await;
            }
            responses::error_response(&e)
        }
    }
}

fn slice_response(
    technology: Technology,
    material: String,
    infill_percent: u8,
    outcome: SliceOutcome,
) -> SliceResponse {
    SliceResponse {
        success: true,
        technology: technology.as_str().to_string(),
        material,
        infill: match technology {
            Technology::FDM => Some(format!("{}%", infill_percent)),
            Technology::SLA => None,
        },
        hourly_rate: outcome.hourly_rate,
        print_time_seconds: outcome.stats.print_time_seconds,
        print_time_readable: outcome.stats.print_time_readable,
        material_used_m: outcome.stats.material_used_m,
        object_height_mm: outcome.stats.object_height_mm,
        estimated_price_huf: outcome.stats.estimated_price_huf,
        download_url: format!("/download/{}", outcome.artifact_name),
    }
}

/// Path parameters for artifact downloads.
#[derive(Deserialize, Debug, JsonSchema, Serialize)]
pub struct DownloadPath {
    /// Artifact file name, as returned in `download_url`.
    pub name: String,
}

/** Download a sliced artifact. */
#[endpoint {
    method = GET,
    path = "/download/{name}",
}]
pub async fn download_artifact(
    rqctx: RequestContext<Arc<Context>>,
    path_params: Path<DownloadPath>,
) -> Result<Response<Body>, HttpError> {
    let ctx = rqctx.context();
    let name = path_params.into_inner().name;

    // The artifact name is a single path component; anything else is an
    // escape attempt.
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return responses::envelope_error(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "invalid artifact name",
        );
    }

    match tokio::fs::read(ctx.config.output_dir.join(&name)).await {
        Ok(bytes) => Ok(Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "application/octet-stream")
            .header(
                http::header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", name),
            )
            .body(Body::from(bytes))?),
        Err(_) => {
            responses::envelope_error(StatusCode::NOT_FOUND, "NOT_FOUND", "artifact not found")
        }
    }
}

/// The response from the `/health` endpoint.
#[derive(Deserialize, Debug, JsonSchema, Serialize)]
pub struct Health {
    /// Always `"OK"` while the process is serving.
    pub status: String,

    /// Whole seconds since the process started.
    pub uptime: u64,
}

/** Liveness probe. */
#[endpoint {
    method = GET,
    path = "/health",
}]
pub async fn get_health(
    rqctx: RequestContext<Arc<Context>>,
) -> Result<HttpResponseOk<Health>, HttpError> {
    Ok(HttpResponseOk(Health {
        status: "OK".to_string(),
        uptime: rqctx.context().started.elapsed().as_secs(),
    }))
}

/// Check the pre-shared admin token. Returns the rejection response when
/// the caller may not mutate pricing.
fn admin_denied(
    ctx: &Context,
    headers: &http::HeaderMap,
) -> Option<Result<Response<Body>, HttpError>> {
    if ctx.config.admin_api_key.is_empty() {
        return Some(responses::envelope_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_MISCONFIGURED",
            "admin API key is not configured",
        ));
    }

    let presented = headers.get("x-api-key").and_then(|value| value.to_str().ok());
    if presented != Some(ctx.config.admin_api_key.as_str()) {
        return Some(responses::envelope_error(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing or invalid x-api-key header",
        ));
    }
    None
}

/// Bound and parse an admin JSON body. The length check runs on the
/// bytes actually received, so chunked requests without a
/// `Content-Length` header cannot sidestep the limit, and nothing is
/// deserialized past it.
fn parse_json_body<T: serde::de::DeserializeOwned>(
    ctx: &Context,
    body: &UntypedBody,
) -> Result<T, Result<Response<Body>, HttpError>> {
    let raw = body.as_bytes();
    if raw.len() as u64 > ctx.config.json_body_limit {
        return Err(responses::envelope_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "BODY_TOO_LARGE",
            "request body exceeds the JSON body limit",
        ));
    }
    serde_json::from_slice(raw).map_err(|e| {
        responses::envelope_error(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            format!("invalid JSON body: {}", e),
        )
    })
}

fn validate_price(price: f64) -> Result<u32, String> {
    if !price.is_finite() || price <= 0.0 {
        return Err("price must be a positive number".to_string());
    }
    if price.fract() != 0.0 || price > f64::from(u32::MAX) {
        return Err("price must be a whole number of HUF".to_string());
    }
    Ok(price as u32)
}

fn pricing_error_response(error: PricingError) -> Result<Response<Body>, HttpError> {
    match error {
        PricingError::AlreadyExists(material) => responses::envelope_error(
            StatusCode::CONFLICT,
            "MATERIAL_ALREADY_EXISTS",
            format!("material {} already exists", material),
        ),
        PricingError::NotFound(material) => responses::envelope_error(
            StatusCode::NOT_FOUND,
            "MATERIAL_NOT_FOUND",
            format!("material {} not found", material),
        ),
        PricingError::ProtectedDefault => responses::envelope_error(
            StatusCode::BAD_REQUEST,
            "DEFAULT_MATERIAL_PROTECTED",
            "the default material cannot be deleted",
        ),
        PricingError::InvalidPrice => responses::envelope_error(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "price must be a positive integer",
        ),
        PricingError::Persist(e) => {
            tracing::error!(error = %e, "pricing registry persistence failed");
            responses::envelope_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_PROCESSING_ERROR",
                "failed to persist pricing registry",
            )
        }
    }
}

/// Client IP for rate limiting: the first `X-Forwarded-For` entry when
/// present, else the socket peer.
fn client_ip(rqctx: &RequestContext<Arc<Context>>) -> String {
    rqctx
        .request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| rqctx.request.remote_addr().ip().to_string())
}

/// Parses the multipart slice request into a [SliceForm]. Parsing is
/// tolerant about optional fields but strict about the upload and the
/// required parameters.
async fn parse_slice_form(multipart: &mut multer::Multipart<'_>) -> Result<SliceForm, ApiError> {
    let mut file: Option<(String, Bytes)> = None;
    let mut layer_height: Option<String> = None;
    let mut material: Option<String> = None;
    let mut infill: Option<String> = None;
    let mut depth: Option<String> = None;

    while let Some(field) = next_field(multipart).await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "choosenFile" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("failed to read upload: {}", e)))?;
                file = Some((file_name, content));
            }
            "layerHeight" => layer_height = Some(field_text(field).await?),
            "material" => material = Some(field_text(field).await?),
            "infill" => infill = Some(field_text(field).await?),
            "depth" => depth = Some(field_text(field).await?),
            _ => {}
        }
    }

    let (file_name, payload) =
        file.ok_or_else(|| ApiError::Validation("missing choosenFile upload".to_string()))?;
    let layer_height = layer_height
        .ok_or_else(|| ApiError::Validation("missing layerHeight field".to_string()))?
        .trim()
        .parse::<f64>()
        .unwrap_or(f64::NAN);
    let material =
        material.ok_or_else(|| ApiError::Validation("missing material field".to_string()))?;

    let infill_percent = infill
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .unwrap_or(i64::from(DEFAULT_INFILL_PERCENT))
        .clamp(0, 100) as u8;
    let depth_mm = depth
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
        .unwrap_or(DEFAULT_DEPTH_MM);

    Ok(SliceForm {
        file_name,
        payload,
        layer_height,
        material,
        infill_percent,
        depth_mm,
    })
}

async fn next_field<'a, 'b>(
    multipart: &'a mut multer::Multipart<'b>,
) -> Result<Option<multer::Field<'b>>, ApiError> {
    multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {}", e)))
}

async fn field_text(field: multer::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Validation(format!("unreadable form field: {}", e)))
}
