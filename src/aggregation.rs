//! Nutrition aggregation across recipes, meals and days.
//!
//! Two totals are produced and they deliberately differ in shape:
//!
//! - [`aggregate`] keeps the full breakdown as an audit trail. Every item's
//!   entries are scaled and appended, so two foods with protein give two
//!   protein lines.
//! - [`aggregate_basic`] collapses everything into one summary whose fields
//!   are sums rounded to two decimals.

use crate::model::{BasicNutrition, FoodRecord, FullNutrition, NutrientCategory, RecipeComponent};
use crate::nutrition::{round2, scale};

/// Concatenate the scaled full breakdowns of `items`.
///
/// # Arguments
///
/// * `items` - `(full nutrition, multiplier)` pairs; items without a
///   breakdown are skipped
///
/// # Returns
///
/// `None` when no item carried a breakdown, so callers can tell "nothing
/// known" apart from "known to be zero".
pub fn aggregate<'a, I>(items: I) -> Option<FullNutrition>
where
    I: IntoIterator<Item = (Option<&'a FullNutrition>, f64)>,
{
    let mut total: Option<FullNutrition> = None;

    for (full, multiplier) in items {
        let Some(full) = full else {
            continue;
        };
        let scaled = scale(full, multiplier);
        let merged = total.get_or_insert_with(FullNutrition::default);
        for category in NutrientCategory::ALL {
            merged
                .category_mut(category)
                .extend(scaled.category(category).iter().cloned());
        }
    }

    total
}

/// Sum the summaries of `items`, each times its multiplier.
///
/// Absent optional fields count as zero; every output field is present and
/// rounded to two decimals.
pub fn aggregate_basic<'a, I>(items: I) -> BasicNutrition
where
    I: IntoIterator<Item = (&'a BasicNutrition, f64)>,
{
    let mut calories = 0.0;
    let mut protein = 0.0;
    let mut carbohydrates = 0.0;
    let mut fat = 0.0;
    let mut fiber = 0.0;
    let mut sugar = 0.0;
    let mut sodium = 0.0;

    for (basic, multiplier) in items {
        calories += basic.calories * multiplier;
        protein += basic.protein * multiplier;
        carbohydrates += basic.carbohydrates * multiplier;
        fat += basic.fat * multiplier;
        fiber += basic.fiber.unwrap_or(0.0) * multiplier;
        sugar += basic.sugar.unwrap_or(0.0) * multiplier;
        sodium += basic.sodium.unwrap_or(0.0) * multiplier;
    }

    BasicNutrition {
        calories: round2(calories),
        protein: round2(protein),
        carbohydrates: round2(carbohydrates),
        fat: round2(fat),
        fiber: Some(round2(fiber)),
        sugar: Some(round2(sugar)),
        sodium: Some(round2(sodium)),
    }
}

/// Summary and breakdown totals for the components of a recipe.
pub fn aggregate_recipe_nutrition(
    components: &[RecipeComponent],
) -> (BasicNutrition, Option<FullNutrition>) {
    let basic = aggregate_basic(
        components
            .iter()
            .map(|c| (&c.nutrition, c.multiplier())),
    );
    let full = aggregate(
        components
            .iter()
            .map(|c| (c.full_nutrition.as_ref(), c.multiplier())),
    );
    (basic, full)
}

/// Totals for a set of food records.
///
/// Record snapshots are already scaled to the eaten amount, so each counts
/// once.
pub fn record_totals(records: &[FoodRecord]) -> BasicNutrition {
    aggregate_basic(records.iter().map(|r| (&r.nutrition, 1.0)))
}
