//! Data models for ForHealth.
//!
//! # Nutrition shapes
//!
//! Two nutrition representations flow through the service:
//!
//! - [`FullNutrition`]: the six-category breakdown mirroring the third-party
//!   schema (`calory`, `base_ingredients`, `vitamin`, `mineral`,
//!   `amino_acid`, `other_ingredients`). It is an audit trail: merging
//!   several foods concatenates their entries.
//! - [`BasicNutrition`]: the seven-field summary (calories, protein,
//!   carbohydrates, fat, fiber, sugar, sodium) used everywhere a single
//!   total is needed.
//!
//! Upstream payloads are loosely typed, so numeric fields accept either JSON
//! numbers or numeric strings and unknown fields are ignored.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Serving unit used when the upstream gives none.
pub const DEFAULT_SERVING_UNIT: &str = "克";

/// Serving weight in grams used when the upstream gives none.
pub const DEFAULT_SERVING_SIZE: f64 = 100.0;

/// Interpret a JSON value as a float, accepting numeric strings.
fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Deserialize a number that may be sent as a string; missing or
/// unparsable values become `None`.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number_from_value))
}

/// Deserialize an integer id that may be sent as a string.
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Deserialize a code-like field that may be sent as a number.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Deserialize a flag sent as a bool, a 0/1 number or a string.
pub(crate) fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0),
        Some(Value::String(s)) => match s.trim() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// Deserialize a label; `null` or any non-string becomes `None`.
fn lenient_label<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

/// Like [`lenient_label`] but defaults to an empty string.
fn lenient_label_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_label(deserializer)?.unwrap_or_default())
}

/// Like [`lenient_f64`] but defaults to zero.
fn lenient_f64_or_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_f64(deserializer)?.unwrap_or(0.0))
}

/// A single nutrient line, e.g. "蛋白质 3.2 g".
///
/// `name_en` doubles as the machine code (`total_calory`, `protein`,
/// `fiber_dietary`, ...). Only base ingredients carry nested `items`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NutrientEntry {
    #[serde(
        default,
        deserialize_with = "lenient_label",
        skip_serializing_if = "Option::is_none"
    )]
    pub name: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient_label",
        skip_serializing_if = "Option::is_none"
    )]
    pub name_en: Option<String>,

    #[serde(default, deserialize_with = "lenient_f64_or_zero")]
    pub value: f64,

    #[serde(default, deserialize_with = "lenient_label_or_empty")]
    pub unit_name: String,

    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub percent: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<NutrientEntry>>,
}

impl NutrientEntry {
    /// Build an entry with a code and a value; handy in tests and fixtures.
    pub fn new(name: &str, code: &str, value: f64, unit_name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            name_en: Some(code.to_string()),
            value,
            unit_name: unit_name.to_string(),
            percent: None,
            items: None,
        }
    }

    /// Attach nested sub-entries.
    pub fn with_items(mut self, items: Vec<NutrientEntry>) -> Self {
        self.items = Some(items);
        self
    }

    /// The machine code of this entry, if any.
    pub fn code(&self) -> Option<&str> {
        self.name_en.as_deref()
    }
}

/// The six nutrient categories of the full breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NutrientCategory {
    Calory,
    BaseIngredients,
    Vitamin,
    Mineral,
    AminoAcid,
    OtherIngredients,
}

impl NutrientCategory {
    /// All categories, in wire order.
    pub const ALL: [NutrientCategory; 6] = [
        NutrientCategory::Calory,
        NutrientCategory::BaseIngredients,
        NutrientCategory::Vitamin,
        NutrientCategory::Mineral,
        NutrientCategory::AminoAcid,
        NutrientCategory::OtherIngredients,
    ];
}

/// Full six-category nutrition breakdown.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FullNutrition {
    #[serde(default)]
    pub calory: Vec<NutrientEntry>,
    #[serde(default)]
    pub base_ingredients: Vec<NutrientEntry>,
    #[serde(default)]
    pub vitamin: Vec<NutrientEntry>,
    #[serde(default)]
    pub mineral: Vec<NutrientEntry>,
    #[serde(default)]
    pub amino_acid: Vec<NutrientEntry>,
    #[serde(default)]
    pub other_ingredients: Vec<NutrientEntry>,
}

impl FullNutrition {
    /// Entries of one category.
    pub fn category(&self, category: NutrientCategory) -> &[NutrientEntry] {
        match category {
            NutrientCategory::Calory => &self.calory,
            NutrientCategory::BaseIngredients => &self.base_ingredients,
            NutrientCategory::Vitamin => &self.vitamin,
            NutrientCategory::Mineral => &self.mineral,
            NutrientCategory::AminoAcid => &self.amino_acid,
            NutrientCategory::OtherIngredients => &self.other_ingredients,
        }
    }

    /// Mutable entries of one category.
    pub fn category_mut(&mut self, category: NutrientCategory) -> &mut Vec<NutrientEntry> {
        match category {
            NutrientCategory::Calory => &mut self.calory,
            NutrientCategory::BaseIngredients => &mut self.base_ingredients,
            NutrientCategory::Vitamin => &mut self.vitamin,
            NutrientCategory::Mineral => &mut self.mineral,
            NutrientCategory::AminoAcid => &mut self.amino_acid,
            NutrientCategory::OtherIngredients => &mut self.other_ingredients,
        }
    }

    /// True when no category has any entry.
    pub fn is_empty(&self) -> bool {
        NutrientCategory::ALL
            .iter()
            .all(|c| self.category(*c).is_empty())
    }
}

/// Flat nutrition summary.
///
/// Calories in kcal, macronutrients in grams, sodium in milligrams.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BasicNutrition {
    #[serde(default)]
    pub calories: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub carbohydrates: f64,
    #[serde(default)]
    pub fat: f64,
    #[serde(default)]
    pub fiber: Option<f64>,
    #[serde(default)]
    pub sugar: Option<f64>,
    #[serde(default)]
    pub sodium: Option<f64>,
}

impl BasicNutrition {
    /// A summary carrying only a calorie value.
    pub fn calories_only(calories: f64) -> Self {
        Self {
            calories,
            ..Self::default()
        }
    }
}

/// Where a food record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FoodSource {
    /// Live result from the Boohee food database.
    Boohee,
    /// Local catalogue entry.
    #[default]
    Local,
}

/// Normalized food as handed to the rest of the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardFoodRecord {
    pub name: String,

    #[serde(default)]
    pub brand: Option<String>,

    #[serde(default)]
    pub category: Option<String>,

    pub serving_size: f64,

    #[serde(default = "default_serving_unit")]
    pub serving_unit: String,

    #[serde(default)]
    pub nutrition_per_serving: BasicNutrition,

    #[serde(default)]
    pub full_nutrition: Option<FullNutrition>,

    #[serde(default)]
    pub barcode: Option<String>,

    #[serde(default)]
    pub image_url: Option<String>,

    #[serde(default)]
    pub source: FoodSource,

    /// Numeric id in the external database.
    #[serde(default)]
    pub external_id: Option<i64>,

    /// Food code in the external database, used for ingredient lookups.
    #[serde(default)]
    pub external_code: Option<String>,

    #[serde(default)]
    pub is_liquid: Option<bool>,

    /// Upstream health light: 0 none, 1 green, 2 yellow, 3 red.
    #[serde(default)]
    pub health_light: Option<i32>,
}

fn default_serving_unit() -> String {
    DEFAULT_SERVING_UNIT.to_string()
}

/// A food as stored in the local catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFood {
    pub id: i64,

    /// Owner identifier, or `"all"` for public foods.
    pub created_by: String,

    #[serde(flatten)]
    pub food: StandardFoodRecord,
}

/// Owner marker for foods visible to everyone.
pub const PUBLIC_OWNER: &str = "all";

impl StoredFood {
    /// Whether `owner` may read this food.
    pub fn is_visible_to(&self, owner: &str) -> bool {
        self.created_by == PUBLIC_OWNER || self.created_by == owner
    }
}

/// One eaten portion of a catalogue food, with a nutrition snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub owner: String,
    pub food_id: i64,
    pub food_name: String,
    /// Number of servings eaten.
    pub serving_amount: f64,
    pub serving_size: f64,
    pub serving_unit: String,
    pub nutrition: BasicNutrition,
    #[serde(default)]
    pub full_nutrition: Option<FullNutrition>,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub meal_type: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// One page of external search results.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SearchPage {
    pub page: i64,
    pub total_pages: i64,
    pub foods: Vec<StandardFoodRecord>,
}

/// One constituent of a recipe or meal total.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecipeComponent {
    #[serde(default)]
    pub nutrition: BasicNutrition,

    #[serde(default)]
    pub full_nutrition: Option<FullNutrition>,

    /// Serving multiplier; 1.0 when absent.
    #[serde(default)]
    pub serving_amount: Option<f64>,
}

impl RecipeComponent {
    /// Effective multiplier for this component.
    pub fn multiplier(&self) -> f64 {
        self.serving_amount.unwrap_or(1.0)
    }
}

// ============================================================================
// HTTP request/response bodies
// ============================================================================

/// Query parameters for GET /foods/search.
#[derive(Debug, Deserialize)]
pub struct FoodSearchQuery {
    #[serde(default)]
    pub keyword: Option<String>,

    #[serde(default = "default_page")]
    pub page: i64,

    #[serde(default = "default_true")]
    pub include_full_nutrition: bool,

    /// Whose private foods to include alongside public ones.
    #[serde(default)]
    pub owner: Option<String>,
}

fn default_page() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

/// Response for GET /foods/search.
#[derive(Debug, Clone, Serialize)]
pub struct FoodSearchResponse {
    pub page: i64,
    pub total_pages: i64,
    pub foods: Vec<FoodSearchItem>,
}

/// A search hit, either local or cached from the external database.
#[derive(Debug, Clone, Serialize)]
pub struct FoodSearchItem {
    /// Local catalogue id.
    pub food_id: i64,

    /// De-duplication key: the external code when present, else the local id.
    pub code: String,

    #[serde(flatten)]
    pub food: StandardFoodRecord,
}

/// Response for GET /foods/barcode/{barcode}.
#[derive(Debug, Clone, Serialize)]
pub struct BarcodeScanResponse {
    pub found: bool,
    pub message: String,
    pub food: Option<StandardFoodRecord>,
}

/// Request body for POST /foods.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFoodRequest {
    pub owner: String,

    #[serde(flatten)]
    pub food: StandardFoodRecord,
}

/// Request body for POST /foods/records.
#[derive(Debug, Clone, Deserialize)]
pub struct FoodRecordRequest {
    pub owner: String,
    pub food_id: i64,
    pub serving_amount: f64,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub meal_type: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Query parameters for GET /foods/records/daily.
#[derive(Debug, Deserialize)]
pub struct DailySummaryQuery {
    pub owner: String,
    pub date: NaiveDate,
}

/// Response for GET /foods/records/daily.
#[derive(Debug, Clone, Serialize)]
pub struct DailyNutritionSummary {
    pub date: NaiveDate,
    pub total: BasicNutrition,
    pub meal_count: usize,
    pub records: Vec<FoodRecord>,
}

/// Request body for POST /recipes/nutrition.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipeNutritionRequest {
    pub foods: Vec<RecipeComponent>,
}

/// Response for POST /recipes/nutrition.
#[derive(Debug, Clone, Serialize)]
pub struct RecipeNutritionResponse {
    pub total_nutrition: BasicNutrition,
    pub total_full_nutrition: Option<FullNutrition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nutrient_entry_accepts_string_numbers() {
        let entry: NutrientEntry = serde_json::from_value(json!({
            "name": "钠",
            "value": "0.5",
            "unit_name": "g",
            "percent": "12",
            "unexpected": {"ignored": true}
        }))
        .unwrap();

        assert_eq!(entry.value, 0.5);
        assert_eq!(entry.percent, Some(12.0));
        assert_eq!(entry.name.as_deref(), Some("钠"));
        assert!(entry.code().is_none());
    }

    #[test]
    fn test_nutrient_entry_missing_value_is_zero() {
        let entry: NutrientEntry =
            serde_json::from_value(json!({"name_en": "fat", "value": null})).unwrap();
        assert_eq!(entry.value, 0.0);
        assert_eq!(entry.unit_name, "");
    }

    #[test]
    fn test_nutrient_entry_null_labels_default() {
        let entry: NutrientEntry = serde_json::from_value(json!({
            "name": null,
            "name_en": 12,
            "value": 0,
            "unit_name": null
        }))
        .unwrap();

        assert!(entry.name.is_none());
        assert!(entry.code().is_none());
        assert_eq!(entry.unit_name, "");

        let full: FullNutrition = serde_json::from_value(json!({
            "calory": [{"name_en": "total_calory", "value": 52, "unit_name": "kcal"}],
            "vitamin": [{"name_en": "vitamin_d", "value": 0, "unit_name": null}]
        }))
        .unwrap();
        assert_eq!(full.calory[0].unit_name, "kcal");
        assert_eq!(full.vitamin[0].code(), Some("vitamin_d"));
    }

    #[test]
    fn test_full_nutrition_missing_categories_default() {
        let full: FullNutrition = serde_json::from_value(json!({
            "calory": [{"name_en": "total_calory", "value": 52, "unit_name": "kcal"}]
        }))
        .unwrap();

        assert_eq!(full.calory.len(), 1);
        assert!(full.vitamin.is_empty());
        assert!(!full.is_empty());
        assert!(FullNutrition::default().is_empty());
    }

    #[test]
    fn test_food_source_wire_names() {
        assert_eq!(serde_json::to_value(FoodSource::Boohee).unwrap(), "boohee");
        assert_eq!(serde_json::to_value(FoodSource::Local).unwrap(), "local");
    }

    #[test]
    fn test_recipe_component_default_multiplier() {
        let component: RecipeComponent =
            serde_json::from_value(json!({"nutrition": {"calories": 10.0}})).unwrap();
        assert_eq!(component.multiplier(), 1.0);
        assert_eq!(component.nutrition.calories, 10.0);
        assert!(component.full_nutrition.is_none());
    }

    #[test]
    fn test_stored_food_visibility() {
        let food = StoredFood {
            id: 1,
            created_by: "alice".to_string(),
            food: StandardFoodRecord {
                name: "Toast".to_string(),
                brand: None,
                category: None,
                serving_size: 30.0,
                serving_unit: DEFAULT_SERVING_UNIT.to_string(),
                nutrition_per_serving: BasicNutrition::calories_only(80.0),
                full_nutrition: None,
                barcode: None,
                image_url: None,
                source: FoodSource::Local,
                external_id: None,
                external_code: None,
                is_liquid: None,
                health_light: None,
            },
        };

        assert!(food.is_visible_to("alice"));
        assert!(!food.is_visible_to("bob"));

        let public = StoredFood {
            created_by: PUBLIC_OWNER.to_string(),
            ..food
        };
        assert!(public.is_visible_to("bob"));
    }
}
