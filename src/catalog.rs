//! Food catalogue service.
//!
//! Combines the local store with the external food database. This is where
//! external failures stop: quota exhaustion, timeouts, unknown barcodes and
//! a disabled client all degrade to local-only results, logged at `warn`.

use std::collections::HashSet;

use chrono::{Duration, NaiveDate, Utc};
use tracing::{info, instrument, warn};

use crate::aggregation::{aggregate_recipe_nutrition, record_totals};
use crate::barcode::{BarcodeResolver, validate_barcode};
use crate::data_sources::BooheeClient;
use crate::error::ExternalApiError;
use crate::model::{
    BarcodeScanResponse, DailyNutritionSummary, FoodRecord, FoodRecordRequest, FoodSearchItem,
    FoodSearchQuery, FoodSearchResponse, RecipeComponent, RecipeNutritionResponse,
    StandardFoodRecord, StoredFood,
};
use crate::nutrition::{scale, scale_basic};
use crate::storage::Storage;

/// Maximum number of local hits per search.
const LOCAL_SEARCH_LIMIT: u32 = 20;

/// Local store plus external lookups.
#[derive(Clone)]
pub struct FoodCatalog {
    storage: Storage,
    client: BooheeClient,
    barcodes: BarcodeResolver,
}

impl FoodCatalog {
    pub fn new(storage: Storage, client: BooheeClient) -> Self {
        Self {
            barcodes: BarcodeResolver::new(client.clone()),
            storage,
            client,
        }
    }

    pub fn external_enabled(&self) -> bool {
        self.client.is_enabled()
    }

    /// Search local foods, then the external database.
    ///
    /// External hits are cached locally so they get a local id. The merged
    /// list keeps the first hit for each code. `total_pages` is the upstream
    /// page count, 0 when the external database was not consulted or failed.
    #[instrument(skip(self, query), fields(keyword = ?query.keyword, page = query.page))]
    pub async fn search_foods(&self, query: &FoodSearchQuery) -> anyhow::Result<FoodSearchResponse> {
        let keyword = query
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());

        let local = self
            .storage
            .search_foods(keyword, query.owner.as_deref(), LOCAL_SEARCH_LIMIT)
            .await?;

        let mut items: Vec<FoodSearchItem> = local
            .into_iter()
            .map(|stored| search_item(stored, query.include_full_nutrition))
            .collect();
        let mut total_pages = 0;

        if let Some(keyword) = keyword.filter(|_| self.client.is_enabled()) {
            match self
                .client
                .search(keyword, query.page, query.include_full_nutrition)
                .await
            {
                Ok(page) => {
                    total_pages = page.total_pages;
                    for food in page.foods {
                        let id = self.storage.upsert_external_food(&food).await?;
                        items.push(FoodSearchItem {
                            food_id: id,
                            code: item_code(id, &food),
                            food,
                        });
                    }
                }
                Err(e) => warn!(error = %e, "External search unavailable, returning local results"),
            }
        }

        let mut seen = HashSet::new();
        items.retain(|item| seen.insert(item.code.clone()));

        Ok(FoodSearchResponse {
            page: query.page,
            total_pages,
            foods: items,
        })
    }

    /// Plain external search, with every failure mapped to no results.
    pub async fn search_external(&self, keyword: &str, page: i64) -> Vec<StandardFoodRecord> {
        match self.client.search(keyword, page, true).await {
            Ok(page) => page.foods,
            Err(e) => {
                warn!(error = %e, "External search failed");
                Vec::new()
            }
        }
    }

    /// Resolve a barcode against the local store, then the external database.
    #[instrument(skip(self))]
    pub async fn resolve_barcode(&self, barcode: &str) -> anyhow::Result<BarcodeScanResponse> {
        if !validate_barcode(barcode) {
            return Ok(not_found("Invalid barcode format"));
        }

        if let Some(stored) = self.storage.find_by_barcode(barcode).await? {
            return Ok(BarcodeScanResponse {
                found: true,
                message: "Found in local database".to_string(),
                food: Some(stored.food),
            });
        }

        match self.barcodes.resolve(barcode).await {
            Ok(Some(food)) => {
                let id = self.storage.upsert_external_food(&food).await?;
                info!(barcode, food_id = id, "Barcode resolved externally");
                Ok(BarcodeScanResponse {
                    found: true,
                    message: "Found in external database".to_string(),
                    food: Some(food),
                })
            }
            Ok(None) => Ok(not_found("No food found for this barcode")),
            Err(ExternalApiError::Disabled) => Ok(not_found("No food found for this barcode")),
            Err(e) => {
                warn!(barcode, error = %e, "External barcode lookup failed");
                Ok(not_found("No food found for this barcode"))
            }
        }
    }

    /// Food detail from the external database.
    pub async fn food_by_external_id(
        &self,
        id: i64,
        include_full_nutrition: bool,
    ) -> Option<StandardFoodRecord> {
        match self.client.food_detail(id, include_full_nutrition).await {
            Ok(food) => food,
            Err(e) => {
                warn!(id, error = %e, "External food detail unavailable");
                None
            }
        }
    }

    /// Add a food to the local catalogue.
    pub async fn create_food(
        &self,
        owner: &str,
        food: StandardFoodRecord,
    ) -> anyhow::Result<StoredFood> {
        let id = self.storage.insert_food(owner, &food).await?;
        Ok(StoredFood {
            id,
            created_by: owner.to_string(),
            food,
        })
    }

    /// Record that `owner` ate `serving_amount` servings of a food.
    ///
    /// The record keeps a nutrition snapshot scaled to the amount eaten.
    /// Returns `None` when the food does not exist or is not visible to the
    /// owner.
    #[instrument(skip(self, request), fields(owner = %request.owner, food_id = request.food_id))]
    pub async fn create_food_record(
        &self,
        request: FoodRecordRequest,
    ) -> anyhow::Result<Option<FoodRecord>> {
        let Some(stored) = self.storage.get_food(request.food_id).await? else {
            return Ok(None);
        };
        if !stored.is_visible_to(&request.owner) {
            return Ok(None);
        }

        let amount = request.serving_amount;
        let food = stored.food;
        let mut record = FoodRecord {
            id: None,
            owner: request.owner,
            food_id: stored.id,
            food_name: food.name,
            serving_amount: amount,
            serving_size: food.serving_size,
            serving_unit: food.serving_unit,
            nutrition: scale_basic(&food.nutrition_per_serving, amount),
            full_nutrition: food.full_nutrition.as_ref().map(|f| scale(f, amount)),
            recorded_at: request.recorded_at.unwrap_or_else(Utc::now),
            meal_type: request.meal_type,
            notes: request.notes,
        };

        record.id = Some(self.storage.insert_food_record(&record).await?);
        Ok(Some(record))
    }

    /// Everything `owner` recorded on `date` (UTC) with totals.
    pub async fn daily_summary(
        &self,
        owner: &str,
        date: NaiveDate,
    ) -> anyhow::Result<DailyNutritionSummary> {
        let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = start + Duration::days(1);

        let records = self.storage.records_between(owner, start, end).await?;
        Ok(DailyNutritionSummary {
            date,
            total: record_totals(&records),
            meal_count: records.len(),
            records,
        })
    }

    /// Totals for a recipe's components.
    pub fn aggregate_recipe_nutrition(&self, components: &[RecipeComponent]) -> RecipeNutritionResponse {
        let (total_nutrition, total_full_nutrition) = aggregate_recipe_nutrition(components);
        RecipeNutritionResponse {
            total_nutrition,
            total_full_nutrition,
        }
    }
}

fn item_code(id: i64, food: &StandardFoodRecord) -> String {
    food.external_code.clone().unwrap_or_else(|| id.to_string())
}

fn search_item(stored: StoredFood, include_full_nutrition: bool) -> FoodSearchItem {
    let mut food = stored.food;
    if !include_full_nutrition {
        food.full_nutrition = None;
    }

    FoodSearchItem {
        code: item_code(stored.id, &food),
        food_id: stored.id,
        food,
    }
}

fn not_found(message: &str) -> BarcodeScanResponse {
    BarcodeScanResponse {
        found: false,
        message: message.to_string(),
        food: None,
    }
}
