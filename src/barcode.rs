//! Barcode resolution.
//!
//! A barcode is looked up upstream, the product's default serving is
//! resolved from its unit list, and the nutrient breakdown for that serving
//! is fetched and folded into a [`StandardFoodRecord`].

use tracing::{debug, instrument, warn};

use crate::data_sources::boohee::{BooheeClient, RawFood, RawUnit};
use crate::error::{ExternalApiError, ExternalResult};
use crate::model::{
    BasicNutrition, DEFAULT_SERVING_SIZE, DEFAULT_SERVING_UNIT, FoodSource, FullNutrition,
    StandardFoodRecord,
};
use crate::nutrition::{apply_full_nutrition, normalize};

const MIN_BARCODE_LEN: usize = 8;
const MAX_BARCODE_LEN: usize = 14;

/// Longest name prefix still taken as a brand.
const MAX_BRAND_CHARS: usize = 20;

/// Whether `barcode` is 8 to 14 ASCII digits (EAN-8 through GTIN-14).
pub fn validate_barcode(barcode: &str) -> bool {
    (MIN_BARCODE_LEN..=MAX_BARCODE_LEN).contains(&barcode.len())
        && barcode.bytes().all(|b| b.is_ascii_digit())
}

/// Serving weight and unit from a product's unit list.
///
/// Uses the unit flagged as default, else the first one. Without a usable
/// weight the serving is 100 克.
pub fn default_serving(units: &[RawUnit]) -> (f64, String) {
    let unit = units
        .iter()
        .find(|u| u.is_default == Some(true))
        .or_else(|| units.first());

    match unit.and_then(|u| u.weight.filter(|w| *w > 0.0).map(|w| (w, u))) {
        Some((weight, unit)) => (
            weight,
            unit.unit_name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_SERVING_UNIT.to_string()),
        ),
        None => (DEFAULT_SERVING_SIZE, DEFAULT_SERVING_UNIT.to_string()),
    }
}

/// Brand guessed from a product name like "统一 阿萨姆奶茶".
pub fn derive_brand(name: &str) -> Option<String> {
    let (prefix, _) = name.split_once(' ')?;
    if prefix.is_empty() || prefix.chars().count() > MAX_BRAND_CHARS {
        return None;
    }
    Some(prefix.to_string())
}

/// Assemble the record for a barcode hit.
///
/// `calory` on barcode hits is per 100 g and is scaled to the serving. When a
/// breakdown is available it supplies the summary, keeping the scaled
/// calories if the breakdown has no total.
pub fn to_standard_record(
    raw: &RawFood,
    barcode: &str,
    nutrition: Option<FullNutrition>,
) -> StandardFoodRecord {
    let name = raw.name.clone().unwrap_or_default();
    let (serving_size, serving_unit) = default_serving(raw.units());

    let calories_per_100g = raw.calory.unwrap_or(0.0);
    let calories = if serving_size == DEFAULT_SERVING_SIZE {
        calories_per_100g
    } else {
        calories_per_100g / 100.0 * serving_size
    };

    let mut record = StandardFoodRecord {
        brand: derive_brand(&name).or_else(|| raw.brand.clone()),
        name,
        category: None,
        serving_size,
        serving_unit,
        nutrition_per_serving: BasicNutrition::calories_only(calories),
        full_nutrition: None,
        barcode: Some(barcode.to_string()),
        image_url: raw.thumb_image_url.clone(),
        source: FoodSource::Boohee,
        external_id: raw.id,
        external_code: raw.code.clone(),
        is_liquid: raw.is_liquid,
        health_light: raw.health_light.and_then(|h| i32::try_from(h).ok()),
    };

    if let Some(full) = nutrition {
        apply_full_nutrition(&mut record, full);
    }
    record
}

/// Resolves barcodes to standard food records through the external client.
#[derive(Clone)]
pub struct BarcodeResolver {
    client: BooheeClient,
}

impl BarcodeResolver {
    pub fn new(client: BooheeClient) -> Self {
        Self { client }
    }

    /// Resolve `barcode`, or `Ok(None)` when the upstream does not know it.
    ///
    /// Malformed barcodes fail with [`ExternalApiError::Validation`] before
    /// any request is made. A failed nutrient lookup degrades to a
    /// calorie-only record.
    #[instrument(skip(self))]
    pub async fn resolve(&self, barcode: &str) -> ExternalResult<Option<StandardFoodRecord>> {
        if !validate_barcode(barcode) {
            return Err(ExternalApiError::Validation(format!(
                "barcode must be {MIN_BARCODE_LEN} to {MAX_BARCODE_LEN} digits"
            )));
        }

        let Some(raw) = self.client.lookup_by_barcode(barcode).await? else {
            debug!(barcode, "No product for barcode");
            return Ok(None);
        };

        let (serving_size, _) = default_serving(raw.units());
        let nutrition = match raw.code.as_deref() {
            Some(code) => match self.client.fetch_ingredients(code, serving_size).await {
                Ok(payload) => Some(normalize(payload)),
                Err(e) => {
                    warn!(barcode, code, error = %e, "Nutrient lookup failed, using calories only");
                    None
                }
            },
            None => None,
        };

        Ok(Some(to_standard_record(&raw, barcode, nutrition)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NutrientEntry;

    fn unit(weight: Option<f64>, name: &str, is_default: Option<bool>) -> RawUnit {
        RawUnit {
            weight,
            unit_name: Some(name.to_string()),
            is_default,
        }
    }

    #[test]
    fn test_validate_barcode() {
        assert!(!validate_barcode("1234567"));
        assert!(validate_barcode("12345678"));
        assert!(validate_barcode("6901234567892"));
        assert!(validate_barcode("12345678901234"));
        assert!(!validate_barcode("123456789012345"));
        assert!(!validate_barcode("abcd1234"));
        assert!(!validate_barcode(""));
        assert!(!validate_barcode("１２３４５６７８"));
    }

    #[test]
    fn test_default_serving_prefers_flagged_unit() {
        let units = vec![
            unit(Some(30.0), "片", None),
            unit(Some(250.0), "盒", Some(true)),
        ];
        assert_eq!(default_serving(&units), (250.0, "盒".to_string()));
    }

    #[test]
    fn test_default_serving_falls_back() {
        let units = vec![unit(Some(30.0), "片", Some(false)), unit(Some(60.0), "份", None)];
        assert_eq!(default_serving(&units), (30.0, "片".to_string()));

        assert_eq!(default_serving(&[]), (100.0, "克".to_string()));
        assert_eq!(
            default_serving(&[unit(None, "瓶", Some(true))]),
            (100.0, "克".to_string())
        );
    }

    #[test]
    fn test_derive_brand() {
        assert_eq!(derive_brand("统一 阿萨姆奶茶"), Some("统一".to_string()));
        assert_eq!(derive_brand("阿萨姆奶茶"), None);
        assert_eq!(derive_brand(&format!("{} 奶茶", "长".repeat(21))), None);
        assert_eq!(
            derive_brand(&format!("{} 奶茶", "长".repeat(20))),
            Some("长".repeat(20))
        );
    }

    #[test]
    fn test_calories_scaled_to_serving() {
        let raw = RawFood {
            code: Some("assam".to_string()),
            name: Some("统一 阿萨姆奶茶".to_string()),
            calory: Some(60.0),
            units: Some(vec![unit(Some(500.0), "瓶", Some(true))]),
            ..Default::default()
        };

        let record = to_standard_record(&raw, "6925303721398", None);
        assert_eq!(record.nutrition_per_serving.calories, 300.0);
        assert_eq!(record.serving_size, 500.0);
        assert_eq!(record.serving_unit, "瓶");
        assert_eq!(record.brand.as_deref(), Some("统一"));
        assert_eq!(record.barcode.as_deref(), Some("6925303721398"));
        assert_eq!(record.source, FoodSource::Boohee);
        assert!(record.full_nutrition.is_none());
    }

    #[test]
    fn test_breakdown_without_total_keeps_serving_calories() {
        let raw = RawFood {
            code: Some("assam".to_string()),
            name: Some("奶茶".to_string()),
            calory: Some(60.0),
            units: Some(vec![unit(Some(500.0), "瓶", None)]),
            ..Default::default()
        };
        let full = FullNutrition {
            base_ingredients: vec![NutrientEntry::new("蛋白质", "protein", 4.5, "g")],
            ..Default::default()
        };

        let record = to_standard_record(&raw, "12345678", Some(full));
        assert_eq!(record.nutrition_per_serving.calories, 300.0);
        assert_eq!(record.nutrition_per_serving.protein, 4.5);
        assert!(record.full_nutrition.is_some());
    }
}
