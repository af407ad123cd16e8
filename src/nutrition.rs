//! Nutrition normalization.
//!
//! Converts the upstream nutrient payload into [`FullNutrition`], derives the
//! flat [`BasicNutrition`] summary from it, and scales either one by a
//! serving multiplier.

use crate::data_sources::boohee::{RawFood, RawNutritionPayload};
use crate::model::{
    BasicNutrition, DEFAULT_SERVING_SIZE, DEFAULT_SERVING_UNIT, FoodSource, FullNutrition,
    NutrientCategory, NutrientEntry, StandardFoodRecord,
};

const TOTAL_CALORY: &str = "total_calory";
const PROTEIN: &str = "protein";
const CARBOHYDRATE: &str = "carbohydrate";
const FAT: &str = "fat";
const SUGAR: &str = "sugar";
const FIBER: &str = "fiber_dietary";
const SODIUM_NAME: &str = "钠";
const SODIUM_CODE: &str = "sodium";

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Pin the upstream payload into the internal six-category shape.
///
/// Categories are copied as-is; absent categories become empty.
pub fn normalize(raw: RawNutritionPayload) -> FullNutrition {
    FullNutrition {
        calory: raw.calory.unwrap_or_default(),
        base_ingredients: raw.base_ingredients.unwrap_or_default(),
        vitamin: raw.vitamin.unwrap_or_default(),
        mineral: raw.mineral.unwrap_or_default(),
        amino_acid: raw.amino_acid.unwrap_or_default(),
        other_ingredients: raw.other_ingredients.unwrap_or_default(),
    }
}

/// The last entry carrying `code`; later entries override earlier ones.
fn find<'a>(entries: &'a [NutrientEntry], code: &str) -> Option<&'a NutrientEntry> {
    entries.iter().rev().find(|e| e.code() == Some(code))
}

/// Sodium in milligrams, or `None` for an unknown unit.
fn sodium_mg(entry: &NutrientEntry) -> Option<f64> {
    match entry.unit_name.trim() {
        "g" | "克" => Some(entry.value * 1000.0),
        "mg" | "毫克" => Some(entry.value),
        _ => None,
    }
}

/// Derive the flat summary from a full breakdown.
///
/// Missing entries leave the macronutrients at zero and the optional fields
/// at `None`.
pub fn extract_basic(full: &FullNutrition) -> BasicNutrition {
    let base = &full.base_ingredients;
    let carbohydrate = find(base, CARBOHYDRATE);
    let carb_items = carbohydrate
        .and_then(|c| c.items.as_deref())
        .unwrap_or_default();

    let sodium = full
        .mineral
        .iter()
        .rev()
        .find(|m| m.name.as_deref() == Some(SODIUM_NAME) || m.code() == Some(SODIUM_CODE))
        .and_then(sodium_mg);

    BasicNutrition {
        calories: find(&full.calory, TOTAL_CALORY).map_or(0.0, |e| e.value),
        protein: find(base, PROTEIN).map_or(0.0, |e| e.value),
        carbohydrates: carbohydrate.map_or(0.0, |e| e.value),
        fat: find(base, FAT).map_or(0.0, |e| e.value),
        fiber: find(carb_items, FIBER).map(|e| e.value),
        sugar: find(carb_items, SUGAR).map(|e| e.value),
        sodium,
    }
}

fn scale_entry(entry: &NutrientEntry, multiplier: f64) -> NutrientEntry {
    NutrientEntry {
        value: entry.value * multiplier,
        items: entry
            .items
            .as_ref()
            .map(|items| items.iter().map(|i| scale_entry(i, multiplier)).collect()),
        ..entry.clone()
    }
}

/// Multiply every value, nested items included, by `multiplier`.
pub fn scale(full: &FullNutrition, multiplier: f64) -> FullNutrition {
    let mut scaled = FullNutrition::default();
    for category in NutrientCategory::ALL {
        *scaled.category_mut(category) = full
            .category(category)
            .iter()
            .map(|e| scale_entry(e, multiplier))
            .collect();
    }
    scaled
}

/// Scale a summary by `multiplier`, rounding every field to two decimals.
pub fn scale_basic(basic: &BasicNutrition, multiplier: f64) -> BasicNutrition {
    let apply = |v: f64| round2(v * multiplier);
    BasicNutrition {
        calories: apply(basic.calories),
        protein: apply(basic.protein),
        carbohydrates: apply(basic.carbohydrates),
        fat: apply(basic.fat),
        fiber: basic.fiber.map(apply),
        sugar: basic.sugar.map(apply),
        sodium: basic.sodium.map(apply),
    }
}

/// Calorie-only record for a search hit or food detail.
///
/// Hits carrying an upstream id or code are marked as live Boohee data.
pub fn search_item_to_record(food: &RawFood) -> StandardFoodRecord {
    let source = if food.code.is_some() || food.id.is_some() {
        FoodSource::Boohee
    } else {
        FoodSource::Local
    };

    StandardFoodRecord {
        name: food.name.clone().unwrap_or_default(),
        brand: food.brand.clone(),
        category: None,
        serving_size: food.weight.unwrap_or(DEFAULT_SERVING_SIZE),
        serving_unit: DEFAULT_SERVING_UNIT.to_string(),
        nutrition_per_serving: BasicNutrition::calories_only(food.calory.unwrap_or(0.0)),
        full_nutrition: None,
        barcode: food.barcode.clone(),
        image_url: food.thumb_image_url.clone(),
        source,
        external_id: food.id,
        external_code: food.code.clone(),
        is_liquid: food.is_liquid,
        health_light: food.health_light.and_then(|h| i32::try_from(h).ok()),
    }
}

/// Replace a record's calorie-only summary with one derived from `full`.
///
/// The record's own calories are kept when the breakdown has no total.
pub fn apply_full_nutrition(record: &mut StandardFoodRecord, full: FullNutrition) {
    let mut basic = extract_basic(&full);
    if basic.calories == 0.0 {
        basic.calories = record.nutrition_per_serving.calories;
    }
    record.nutrition_per_serving = basic;
    record.full_nutrition = Some(full);
}
