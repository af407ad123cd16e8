//! HTTP API handlers for ForHealth.
//!
//! Handlers are thin: they validate input, call into [`FoodCatalog`] and map
//! the outcome to a status code. External database trouble never shows up
//! here as an error; the catalog has already degraded to local data.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::barcode::validate_barcode;
use crate::catalog::FoodCatalog;
use crate::model::{
    BarcodeScanResponse, CreateFoodRequest, DailyNutritionSummary, DailySummaryQuery, FoodRecord,
    FoodRecordRequest, FoodSearchQuery, FoodSearchResponse, RecipeNutritionRequest,
    RecipeNutritionResponse, StandardFoodRecord, StoredFood,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub catalog: FoodCatalog,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/foods", post(create_food))
        .route("/foods/search", get(search_foods))
        .route("/foods/barcode/:barcode", get(scan_barcode))
        .route("/foods/external/:id", get(get_external_food))
        .route("/foods/records", post(create_food_record))
        .route("/foods/records/daily", get(get_daily_summary))
        .route("/recipes/nutrition", post(recipe_nutrition))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// GET /foods/search - Search local and external foods.
///
/// # Query Parameters
///
/// - `keyword` (optional): Name or brand substring; without it only local foods are listed
/// - `page` (optional): External result page (default: 1)
/// - `include_full_nutrition` (optional): Fetch nutrient breakdowns for external hits (default: true)
/// - `owner` (optional): Include this owner's private foods
#[instrument(skip(state))]
pub async fn search_foods(
    State(state): State<AppState>,
    Query(query): Query<FoodSearchQuery>,
) -> Result<Json<FoodSearchResponse>, StatusCode> {
    if query.page < 1 {
        return Err(StatusCode::BAD_REQUEST);
    }

    match state.catalog.search_foods(&query).await {
        Ok(response) => {
            info!(
                hits = response.foods.len(),
                total_pages = response.total_pages,
                "Foods searched"
            );
            Ok(Json(response))
        }
        Err(e) => {
            warn!(error = %e, "Failed to search foods");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /foods/barcode/:barcode - Look up a product by barcode.
///
/// # Response
///
/// ```json
/// {
///     "found": true,
///     "message": "Found in external database",
///     "food": { "name": "统一 阿萨姆奶茶", "serving_size": 500.0, ... }
/// }
/// ```
///
/// Returns `400 Bad Request` for anything but 8 to 14 digits.
#[instrument(skip(state))]
pub async fn scan_barcode(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> Result<Json<BarcodeScanResponse>, StatusCode> {
    if !validate_barcode(&barcode) {
        return Err(StatusCode::BAD_REQUEST);
    }

    match state.catalog.resolve_barcode(&barcode).await {
        Ok(response) => {
            info!(found = response.found, "Barcode scanned");
            Ok(Json(response))
        }
        Err(e) => {
            warn!(error = %e, "Failed to resolve barcode");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Query parameters for the external food detail endpoint.
#[derive(Debug, Deserialize)]
pub struct ExternalFoodQuery {
    #[serde(default = "default_include_full_nutrition")]
    pub include_full_nutrition: bool,
}

fn default_include_full_nutrition() -> bool {
    true
}

/// GET /foods/external/:id - Food detail from the external database.
///
/// Returns `503 Service Unavailable` when the external API is disabled and
/// `404 Not Found` when the food cannot be fetched.
#[instrument(skip(state))]
pub async fn get_external_food(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ExternalFoodQuery>,
) -> Result<Json<StandardFoodRecord>, StatusCode> {
    if !state.catalog.external_enabled() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    state
        .catalog
        .food_by_external_id(id, query.include_full_nutrition)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// POST /foods - Add a food to the local catalogue.
///
/// # Request Body
///
/// ```json
/// {
///     "owner": "alice",
///     "name": "自制燕麦粥",
///     "serving_size": 250,
///     "nutrition_per_serving": { "calories": 180, "protein": 6, "carbohydrates": 30, "fat": 3 }
/// }
/// ```
///
/// Use `"owner": "all"` for a public food. Returns `201 Created`.
#[instrument(skip(state, request), fields(owner = %request.owner))]
pub async fn create_food(
    State(state): State<AppState>,
    Json(request): Json<CreateFoodRequest>,
) -> Result<(StatusCode, Json<StoredFood>), StatusCode> {
    let owner = request.owner.trim();
    if owner.is_empty() || request.food.name.trim().is_empty() || request.food.serving_size <= 0.0
    {
        return Err(StatusCode::BAD_REQUEST);
    }

    match state.catalog.create_food(owner, request.food).await {
        Ok(stored) => {
            info!(food_id = stored.id, "Food created");
            Ok((StatusCode::CREATED, Json(stored)))
        }
        Err(e) => {
            warn!(error = %e, "Failed to create food");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /foods/records - Record a portion of a catalogue food.
///
/// Returns `201 Created` with the stored record, `404 Not Found` when the
/// food is missing or belongs to someone else.
#[instrument(skip(state, request), fields(food_id = request.food_id))]
pub async fn create_food_record(
    State(state): State<AppState>,
    Json(request): Json<FoodRecordRequest>,
) -> Result<(StatusCode, Json<FoodRecord>), StatusCode> {
    if request.serving_amount <= 0.0 || request.owner.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    match state.catalog.create_food_record(request).await {
        Ok(Some(record)) => {
            info!(record_id = ?record.id, calories = record.nutrition.calories, "Food recorded");
            Ok((StatusCode::CREATED, Json(record)))
        }
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            warn!(error = %e, "Failed to record food");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /foods/records/daily - Nutrition totals for one day.
///
/// # Query Parameters
///
/// - `owner` (required): Whose records to sum
/// - `date` (required): Day in `YYYY-MM-DD` (UTC)
#[instrument(skip(state))]
pub async fn get_daily_summary(
    State(state): State<AppState>,
    Query(query): Query<DailySummaryQuery>,
) -> Result<Json<DailyNutritionSummary>, StatusCode> {
    match state.catalog.daily_summary(&query.owner, query.date).await {
        Ok(summary) => Ok(Json(summary)),
        Err(e) => {
            warn!(error = %e, "Failed to build daily summary");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /recipes/nutrition - Total nutrition of a recipe.
///
/// The summary is summed; the full breakdown lists every component's scaled
/// entries.
pub async fn recipe_nutrition(
    State(state): State<AppState>,
    Json(request): Json<RecipeNutritionRequest>,
) -> Result<Json<RecipeNutritionResponse>, StatusCode> {
    if request
        .foods
        .iter()
        .any(|c| c.serving_amount.is_some_and(|a| a < 0.0))
    {
        return Err(StatusCode::BAD_REQUEST);
    }

    Ok(Json(state.catalog.aggregate_recipe_nutrition(&request.foods)))
}
