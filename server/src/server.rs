use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use crate::openfoodfacts::OpenFoodFactsClient;
use fitlog_core::csv_io::WearableImportSummary;
use fitlog_core::forecast::{Forecast, ForecastOptions, MetricForecast, ModelKind};
use fitlog_core::models::{
    BodyMetrics, CachedFood, MacroTotals, MealItem, MealLog, MealTemplate, NewBodyMetrics,
    NewWearableRecord, SimAction, SimulationEntry, WearableRecord, quantity_in_grams,
    validate_body_metrics, validate_meal_items, validate_unit, validate_wearable,
};
use fitlog_core::service::TrackerService;

const BODY_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

#[derive(Clone)]
struct AppState {
    svc: Arc<Mutex<TrackerService>>,
    off: Arc<OpenFoodFactsClient>,
    api_key: Option<String>,
}

fn lock_service(state: &AppState) -> MutexGuard<'_, TrackerService> {
    state.svc.lock().unwrap_or_else(PoisonError::into_inner)
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct SaveMetricsRequest {
    date: Option<String>,
    weight: Option<f64>,
    height_cm: Option<f64>,
    bmi: Option<f64>,
    fat_percent: Option<f64>,
    waist_cm: Option<f64>,
    biceps_cm: Option<f64>,
    lats_cm: Option<f64>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    days: Option<i64>,
}

#[derive(Deserialize)]
struct SaveWearableRequest {
    date: String,
    heart_rate_avg: Option<f64>,
    spo2_avg: Option<f64>,
    sleep_hours: Option<f64>,
    steps: Option<i64>,
}

#[derive(Deserialize)]
struct SaveTemplateRequest {
    name: String,
    items: Vec<MealItem>,
}

#[derive(Deserialize)]
struct LogMealRequest {
    name: Option<String>,
    /// When set and `items` is empty, the named template's items are logged.
    template: Option<String>,
    #[serde(default)]
    items: Vec<MealItem>,
    date: Option<String>,
}

#[derive(Serialize)]
struct LogMealResponse {
    log: MealLog,
    /// Item names with no nutrition data; they contribute nothing to totals.
    unresolved: Vec<String>,
}

#[derive(Deserialize)]
struct PredictQuery {
    days: Option<u32>,
    model: Option<String>,
    calorie_offset: Option<f64>,
}

#[derive(Serialize)]
struct PredictionsResponse {
    insufficient_data: bool,
    metrics: Vec<MetricForecast>,
}

#[derive(Deserialize)]
struct SimulateRequest {
    action: String,
    food: String,
    quantity: f64,
    unit: String,
    duration_days: Option<u32>,
    model: Option<String>,
}

#[derive(Serialize)]
struct SimulationResponse {
    entry: SimulationEntry,
    baseline: PredictionsResponse,
    simulated: PredictionsResponse,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                eprintln!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date '{raw}'. Use YYYY-MM-DD")))
}

fn parse_date_or_today(raw: Option<&str>) -> Result<NaiveDate, ApiError> {
    match raw {
        Some(raw) => parse_date(raw),
        None => Ok(Local::now().date_naive()),
    }
}

fn parse_model(raw: Option<&str>) -> Result<ModelKind, ApiError> {
    match raw {
        Some(raw) => ModelKind::parse(raw).map_err(|e| ApiError::BadRequest(format!("{e}"))),
        None => Ok(ModelKind::Linear),
    }
}

fn forecast_response(forecast: Forecast) -> PredictionsResponse {
    match forecast {
        Forecast::InsufficientData => PredictionsResponse {
            insufficient_data: true,
            metrics: Vec::new(),
        },
        Forecast::Predicted(metrics) => PredictionsResponse {
            insufficient_data: false,
            metrics,
        },
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Food resolution (local cache first, then OpenFoodFacts) ---

async fn resolve_food(state: &AppState, name: &str) -> Result<Option<CachedFood>, ApiError> {
    let cached = {
        let svc = lock_service(state);
        svc.cached_food(name).context("database error")?
    };
    if let Some(food) = cached {
        return Ok(Some(food));
    }

    // Miss: best-effort remote lookup. Transport errors degrade to
    // "no nutrition data available" rather than failing the request.
    let facts = state.off.lookup_name_async(name).await.ok().flatten();

    match facts {
        Some(facts) => {
            let svc = lock_service(state);
            let food = svc.cache_food(name, facts).context("database error")?;
            Ok(Some(food))
        }
        None => Ok(None),
    }
}

// --- Body metrics handlers ---

async fn save_metrics(
    State(state): State<AppState>,
    Json(req): Json<SaveMetricsRequest>,
) -> Result<(StatusCode, Json<BodyMetrics>), ApiError> {
    let date = parse_date_or_today(req.date.as_deref())?;
    let metrics = NewBodyMetrics {
        date,
        weight: req.weight,
        height_cm: req.height_cm,
        bmi: req.bmi,
        fat_percent: req.fat_percent,
        waist_cm: req.waist_cm,
        biceps_cm: req.biceps_cm,
        lats_cm: req.lats_cm,
    };
    validate_body_metrics(&metrics).map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let svc = lock_service(&state);
    let saved = svc
        .save_body_metrics(&metrics)
        .context("failed to save body metrics")?;
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn list_metrics(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<BodyMetrics>>, ApiError> {
    let svc = lock_service(&state);
    let history = svc.metrics_history(query.days).context("database error")?;
    Ok(Json(history))
}

async fn get_metrics(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<BodyMetrics>, ApiError> {
    let date = parse_date(&date)?;
    let svc = lock_service(&state);
    let metrics = svc.get_body_metrics(date).context("database error")?;
    metrics.map(Json).ok_or_else(|| {
        ApiError::NotFound(format!("No body metrics for {}", date.format("%Y-%m-%d")))
    })
}

// --- Wearable handlers ---

async fn save_wearable(
    State(state): State<AppState>,
    Json(req): Json<SaveWearableRequest>,
) -> Result<(StatusCode, Json<WearableRecord>), ApiError> {
    let date = parse_date(&req.date)?;
    let record = NewWearableRecord {
        date,
        heart_rate_avg: req.heart_rate_avg,
        spo2_avg: req.spo2_avg,
        sleep_hours: req.sleep_hours,
        steps: req.steps,
    };
    validate_wearable(&record).map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let svc = lock_service(&state);
    let saved = svc
        .save_wearable(&record)
        .context("failed to save wearable data")?;
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn list_wearables(
    State(state): State<AppState>,
) -> Result<Json<Vec<WearableRecord>>, ApiError> {
    let svc = lock_service(&state);
    let history = svc.wearable_history().context("database error")?;
    Ok(Json(history))
}

async fn import_wearables(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<WearableImportSummary>, ApiError> {
    let svc = lock_service(&state);
    let summary = svc
        .import_wearable_csv(&body)
        .map_err(|e| ApiError::BadRequest(format!("{e}")))?;
    Ok(Json(summary))
}

// --- Template handlers ---

async fn save_template(
    State(state): State<AppState>,
    Json(req): Json<SaveTemplateRequest>,
) -> Result<(StatusCode, Json<MealTemplate>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Template name must not be empty".to_string(),
        ));
    }
    validate_meal_items(&req.items).map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let svc = lock_service(&state);
    let template = svc
        .save_template(&req.name, &req.items)
        .context("failed to save template")?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn list_templates(
    State(state): State<AppState>,
) -> Result<Json<Vec<MealTemplate>>, ApiError> {
    let svc = lock_service(&state);
    let templates = svc.list_templates().context("database error")?;
    Ok(Json(templates))
}

async fn get_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MealTemplate>, ApiError> {
    let svc = lock_service(&state);
    let template = svc.get_template(&name).context("database error")?;
    template
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Template '{name}' not found")))
}

async fn delete_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let svc = lock_service(&state);
    let deleted = svc.delete_template(&name).context("database error")?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Template '{name}' not found")))
    }
}

// --- Meal handlers ---

async fn log_meal(
    State(state): State<AppState>,
    Json(req): Json<LogMealRequest>,
) -> Result<(StatusCode, Json<LogMealResponse>), ApiError> {
    let date = parse_date_or_today(req.date.as_deref())?;

    let items = if req.items.is_empty() {
        let Some(template_name) = req.template.as_deref() else {
            return Err(ApiError::BadRequest(
                "Provide meal items or a template name".to_string(),
            ));
        };
        let svc = lock_service(&state);
        svc.get_template(template_name)
            .context("database error")?
            .ok_or_else(|| ApiError::NotFound(format!("Template '{template_name}' not found")))?
            .items
    } else {
        req.items
    };
    validate_meal_items(&items).map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let mut totals = MacroTotals::default();
    let mut unresolved = Vec::new();
    for item in &items {
        match resolve_food(&state, &item.food).await? {
            Some(food) => {
                let grams = quantity_in_grams(item.quantity, &item.unit);
                totals.add_food(&food, grams);
            }
            None => unresolved.push(item.food.clone()),
        }
    }
    let totals = totals.rounded();

    let name = req.name.unwrap_or_default();
    let svc = lock_service(&state);
    let log = svc
        .log_meal_prepared(&name, &items, &totals, Some(date))
        .context("failed to log meal")?;

    Ok((
        StatusCode::CREATED,
        Json(LogMealResponse { log, unresolved }),
    ))
}

async fn list_meals(State(state): State<AppState>) -> Result<Json<Vec<MealLog>>, ApiError> {
    let svc = lock_service(&state);
    let logs = svc.meal_logs().context("database error")?;
    Ok(Json(logs))
}

// --- Food handlers ---

async fn lookup_food(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<CachedFood>, ApiError> {
    let food = resolve_food(&state, &name).await?;
    food.map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No nutrition data found for '{name}'")))
}

async fn list_foods(State(state): State<AppState>) -> Result<Json<Vec<CachedFood>>, ApiError> {
    let svc = lock_service(&state);
    let foods = svc.list_cached_foods().context("database error")?;
    Ok(Json(foods))
}

// --- Prediction and simulation handlers ---

async fn get_predictions(
    State(state): State<AppState>,
    Query(query): Query<PredictQuery>,
) -> Result<Json<PredictionsResponse>, ApiError> {
    let options = ForecastOptions {
        horizon_days: query.days.unwrap_or(30),
        model: parse_model(query.model.as_deref())?,
        calorie_offset_kcal: query.calorie_offset.unwrap_or(0.0),
    };

    let svc = lock_service(&state);
    let forecast = svc.predict_trends(&options).context("forecast failed")?;
    Ok(Json(forecast_response(forecast)))
}

async fn run_simulation(
    State(state): State<AppState>,
    Json(req): Json<SimulateRequest>,
) -> Result<(StatusCode, Json<SimulationResponse>), ApiError> {
    let action = SimAction::parse(&req.action).map_err(|e| ApiError::BadRequest(format!("{e}")))?;
    let unit = validate_unit(&req.unit).map_err(|e| ApiError::BadRequest(format!("{e}")))?;
    if req.quantity <= 0.0 {
        return Err(ApiError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }
    let model = parse_model(req.model.as_deref())?;
    let duration_days = req.duration_days.unwrap_or(30);

    let Some(food) = resolve_food(&state, &req.food).await? else {
        return Err(ApiError::NotFound(format!(
            "No nutrition data available for '{}'",
            req.food
        )));
    };

    let grams = quantity_in_grams(req.quantity, &unit);
    let caloric_change = action.signed(food.calories_per_100g * grams / 100.0);

    let svc = lock_service(&state);
    let entry = svc
        .record_simulation(
            action,
            &food.name,
            req.quantity,
            &unit,
            caloric_change,
            i64::from(duration_days),
        )
        .context("failed to record simulation")?;

    let baseline_options = ForecastOptions {
        horizon_days: duration_days,
        model,
        calorie_offset_kcal: 0.0,
    };
    let simulated_options = ForecastOptions {
        calorie_offset_kcal: caloric_change,
        ..baseline_options.clone()
    };
    let baseline = svc
        .predict_trends(&baseline_options)
        .context("forecast failed")?;
    let simulated = svc
        .predict_trends(&simulated_options)
        .context("forecast failed")?;

    Ok((
        StatusCode::CREATED,
        Json(SimulationResponse {
            entry,
            baseline: forecast_response(baseline),
            simulated: forecast_response(simulated),
        }),
    ))
}

async fn simulation_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<SimulationEntry>>, ApiError> {
    let svc = lock_service(&state);
    let history = svc.simulation_history().context("database error")?;
    Ok(Json(history))
}

async fn export_simulation_csv(
    State(state): State<AppState>,
    Query(query): Query<PredictQuery>,
) -> Result<Response, ApiError> {
    let options = ForecastOptions {
        horizon_days: query.days.unwrap_or(30),
        model: parse_model(query.model.as_deref())?,
        calorie_offset_kcal: query.calorie_offset.unwrap_or(0.0),
    };

    let svc = lock_service(&state);
    let forecast = svc.predict_trends(&options).context("forecast failed")?;
    let csv_text = svc
        .simulated_weight_csv(&forecast)
        .context("failed to build CSV")?;

    match csv_text {
        Some(text) => Ok(([(header::CONTENT_TYPE, "text/csv")], text).into_response()),
        None => Err(ApiError::NotFound(
            "Not enough data to export a simulated series".to_string(),
        )),
    }
}

// --- Router builder ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/metrics", get(list_metrics).post(save_metrics))
        .route("/api/metrics/{date}", get(get_metrics))
        .route("/api/wearables", get(list_wearables).post(save_wearable))
        .route("/api/wearables/import", post(import_wearables))
        .route("/api/templates", get(list_templates).post(save_template))
        .route(
            "/api/templates/{name}",
            get(get_template).delete(delete_template),
        )
        .route("/api/meals", get(list_meals).post(log_meal))
        .route("/api/foods", get(list_foods))
        .route("/api/foods/{name}", get(lookup_food))
        .route("/api/predictions", get(get_predictions))
        .route(
            "/api/simulations",
            get(simulation_history).post(run_simulation),
        )
        .route("/api/simulations/export", get(export_simulation_csv))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    service: TrackerService,
    port: u16,
    bind: &str,
    api_key: Option<String>,
    new_api_key: bool,
) -> anyhow::Result<()> {
    let state = AppState {
        svc: Arc::new(Mutex::new(service)),
        off: Arc::new(OpenFoodFactsClient::new()?),
        api_key: api_key.clone(),
    };

    let app = build_router(state);

    if let Some(ref key) = api_key {
        eprintln!(
            "API key: {}...{} (see api_key file in data directory)",
            &key[..4],
            &key[key.len() - 4..],
        );
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    if new_api_key {
        eprintln!("First run: point your dashboard at this server with the key above.");
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
