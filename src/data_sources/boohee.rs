//! Boohee food database client.
//!
//! Boohee (薄荷健康) exposes a signed REST API for food search, barcode
//! lookup, food details and per-weight nutrient breakdowns.
//!
//! # Authentication
//!
//! Each configured account trades its app id and a signature for an access
//! token (valid for 30 days). The token travels in the `AccessToken` header
//! and is never part of the signed parameters. Every request carries `app_id`
//! and a Unix `timestamp` and is signed with the same account's app key.
//!
//! # Quotas
//!
//! Accounts have per-day quotas that the API does not always report with a
//! status code. An exhausted account tends to answer searches with an empty
//! first page instead. [`BooheeClient::search`] treats that as a signal to
//! move to the next account and retry, at most once per account.
//!
//! # API Reference
//!
//! See: <https://fc.boohee.com>

use std::sync::Arc;

use chrono::{Duration, Utc};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use crate::config::{Credential, ExternalApiConfig};
use crate::error::{ExternalApiError, ExternalResult};
use crate::model::{
    DEFAULT_SERVING_SIZE, FoodSource, NutrientEntry, SearchPage, StandardFoodRecord, lenient_f64,
    lenient_flag, lenient_i64, lenient_string,
};
use crate::nutrition;
use crate::rotation::AccountRotationState;
use crate::signature::{canonical_value, sign};

const TOKEN_PATH: &str = "/api/v2/access_tokens";
const BARCODE_PATH: &str = "/api/v1/foods/barcode";
const SEARCH_PATH: &str = "/api/v1/foods/search";
const INGREDIENTS_PATH: &str = "/api/v2/foods/ingredients";

/// Header carrying the access token.
const TOKEN_HEADER: &str = "AccessToken";

/// Token validity announced by the API (30 days).
const TOKEN_LIFETIME_SECS: i64 = 2_592_000;

/// Tokens are dropped this long before the announced expiry.
const TOKEN_SAFETY_MARGIN_SECS: i64 = 60;

/// Client for the Boohee food database.
///
/// Cheap to clone; clones share the HTTP connection pool and the rotation
/// state.
#[derive(Clone)]
pub struct BooheeClient {
    client: reqwest::Client,
    base_url: String,
    accounts: Arc<Vec<Credential>>,
    state: Arc<AccountRotationState>,
    enabled: bool,
}

impl BooheeClient {
    /// Create a client with fresh rotation state.
    pub fn new(config: &ExternalApiConfig) -> ExternalResult<Self> {
        let state = Arc::new(AccountRotationState::new(
            config.accounts.len(),
            config.start_index,
        ));
        Self::with_state(config, state)
    }

    /// Create a client around existing rotation state.
    pub fn with_state(
        config: &ExternalApiConfig,
        state: Arc<AccountRotationState>,
    ) -> ExternalResult<Self> {
        if state.pool_size() != config.accounts.len() {
            return Err(ExternalApiError::Config(format!(
                "rotation state sized for {} accounts but {} are configured",
                state.pool_size(),
                config.accounts.len()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            accounts: Arc::new(config.accounts.clone()),
            state,
            enabled: config.enabled,
        })
    }

    /// Shared rotation state.
    pub fn state(&self) -> &Arc<AccountRotationState> {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn ensure_enabled(&self) -> ExternalResult<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(ExternalApiError::Disabled)
        }
    }

    fn credential(&self, index: usize) -> ExternalResult<&Credential> {
        self.accounts.get(index).ok_or_else(|| {
            ExternalApiError::Config(format!("no credential configured for account {index}"))
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Access token for account `index`, from cache or freshly fetched.
    #[instrument(skip(self), fields(account = index))]
    pub async fn access_token(&self, index: usize) -> ExternalResult<String> {
        if let Some(token) = self.state.cached_token(index, Utc::now()).await {
            return Ok(token);
        }

        let credential = self.credential(index)?;
        let now = Utc::now();
        let timestamp = now.timestamp();

        let mut params = Map::new();
        params.insert("app_id".to_string(), json!(credential.app_id));
        params.insert("timestamp".to_string(), json!(timestamp));
        let signature = sign(&params, &credential.app_key);

        let form = [
            ("app_id", credential.app_id.clone()),
            ("timestamp", timestamp.to_string()),
            ("sign", signature),
        ];

        let response = self
            .client
            .post(self.url(TOKEN_PATH))
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        let auth_failure = |message: String| ExternalApiError::Auth {
            account: index,
            message,
        };

        if !status.is_success() {
            return Err(auth_failure(format!(
                "HTTP {}: {}",
                status.as_u16(),
                message_from_body(&body)
            )));
        }

        let payload: Value = serde_json::from_str(&body)
            .map_err(|e| auth_failure(format!("unreadable token response: {e}")))?;

        if is_business_failure(&payload) {
            return Err(auth_failure(upstream_message(&payload)));
        }

        let token = payload
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| auth_failure("no access token in response".to_string()))?
            .to_string();

        let expires_at = now + Duration::seconds(TOKEN_LIFETIME_SECS - TOKEN_SAFETY_MARGIN_SECS);
        self.state
            .store_token(index, token.clone(), expires_at)
            .await;

        info!(account = index, %expires_at, "Obtained access token");
        Ok(token)
    }

    /// Signed call on behalf of account `index`.
    async fn call(
        &self,
        index: usize,
        method: Method,
        path: &str,
        mut params: Map<String, Value>,
    ) -> ExternalResult<Value> {
        let token = self.access_token(index).await?;
        let credential = self.credential(index)?;

        params.insert("app_id".to_string(), json!(credential.app_id));
        params.insert("timestamp".to_string(), json!(Utc::now().timestamp()));
        let signature = sign(&params, &credential.app_key);
        params.insert("sign".to_string(), Value::String(signature));

        let request = if method == Method::GET {
            let url = format!("{}?{}", self.url(path), query_string(&params));
            self.client.get(url)
        } else {
            self.client.request(method, self.url(path)).json(&params)
        };

        let response = request.header(TOKEN_HEADER, token).send().await?;
        let status = response.status();
        let body = response.text().await?;

        debug!(account = index, path, status = status.as_u16(), "Upstream responded");
        classify(status, &body)
    }

    /// Nutrient breakdown for `weight` grams of the food with `code`.
    #[instrument(skip(self))]
    pub async fn fetch_ingredients(
        &self,
        code: &str,
        weight: f64,
    ) -> ExternalResult<RawNutritionPayload> {
        self.ensure_enabled()?;
        let index = self.state.current().await;
        self.fetch_ingredients_with(index, code, weight).await
    }

    async fn fetch_ingredients_with(
        &self,
        index: usize,
        code: &str,
        weight: f64,
    ) -> ExternalResult<RawNutritionPayload> {
        let mut params = Map::new();
        params.insert(
            "foods".to_string(),
            json!([{ "code": code, "weight": weight }]),
        );

        let payload = self
            .call(index, Method::POST, INGREDIENTS_PATH, params)
            .await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Search foods by keyword, rotating accounts when one looks exhausted.
    ///
    /// Each hit is normalized into a [`StandardFoodRecord`]; with
    /// `include_full_nutrition` its nutrient breakdown is fetched as well.
    /// Fails with [`ExternalApiError::QuotaExhausted`] once every account has
    /// been tried.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        keyword: &str,
        page: i64,
        include_full_nutrition: bool,
    ) -> ExternalResult<SearchPage> {
        self.ensure_enabled()?;

        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(ExternalApiError::Validation(
                "search keyword is empty".to_string(),
            ));
        }

        let attempts = self.state.max_attempts();
        for attempt in 1..=attempts {
            let index = self.state.current().await;

            let raw = match self.search_once(index, keyword, page).await {
                Ok(raw) => raw,
                Err(e) if e.rotates_account() => {
                    warn!(account = index, attempt, error = %e, "Search failed, rotating account");
                    self.state.advance_from(index).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut foods: Vec<StandardFoodRecord> = raw
                .foods()
                .iter()
                .map(nutrition::search_item_to_record)
                .collect();

            if is_account_exhausted(&raw, &foods) {
                warn!(account = index, attempt, "Account looks exhausted, rotating");
                self.state.advance_from(index).await;
                continue;
            }

            if include_full_nutrition {
                self.enrich(index, &mut foods).await;
            }

            info!(account = index, hits = foods.len(), "External search succeeded");
            return Ok(SearchPage {
                page: raw.page.unwrap_or(page),
                total_pages: raw.total_pages.unwrap_or(0),
                foods,
            });
        }

        Err(ExternalApiError::QuotaExhausted { attempts })
    }

    async fn search_once(
        &self,
        index: usize,
        keyword: &str,
        page: i64,
    ) -> ExternalResult<RawSearchPage> {
        let mut params = Map::new();
        params.insert("q".to_string(), json!(keyword));
        params.insert("page".to_string(), json!(page));

        let payload = self.call(index, Method::GET, SEARCH_PATH, params).await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Attach full nutrition to each record that has a food code. A failed
    /// lookup leaves the calorie-only record in place.
    async fn enrich(&self, index: usize, foods: &mut [StandardFoodRecord]) {
        for food in foods.iter_mut() {
            let Some(code) = food.external_code.clone() else {
                continue;
            };

            match self
                .fetch_ingredients_with(index, &code, food.serving_size)
                .await
            {
                Ok(raw) => nutrition::apply_full_nutrition(food, nutrition::normalize(raw)),
                Err(e) => {
                    debug!(code = %code, error = %e, "Ingredients unavailable, keeping calories only")
                }
            }
        }
    }

    /// First product registered under `barcode`, if any.
    #[instrument(skip(self))]
    pub async fn lookup_by_barcode(&self, barcode: &str) -> ExternalResult<Option<RawFood>> {
        self.ensure_enabled()?;
        let index = self.state.current().await;

        let mut params = Map::new();
        params.insert("barcode".to_string(), json!(barcode));

        let payload = match self.call(index, Method::GET, BARCODE_PATH, params).await {
            Ok(payload) => payload,
            Err(ExternalApiError::Business { message }) => {
                debug!(barcode, message = %message, "Barcode not found upstream");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let list: RawFoodList = serde_json::from_value(payload)?;
        Ok(list.foods.unwrap_or_default().into_iter().next())
    }

    /// Food detail by numeric id.
    ///
    /// The detail may come bare or wrapped in `{"food": {...}}`. Missing
    /// `id` and `code` are filled from the requested id, the serving weight
    /// and calories are resolved from their alternative field names.
    #[instrument(skip(self))]
    pub async fn lookup_by_external_id(&self, id: i64) -> ExternalResult<Option<RawFood>> {
        self.ensure_enabled()?;
        let index = self.state.current().await;

        let path = format!("/api/v2/foods/{id}");
        let payload = match self.call(index, Method::GET, &path, Map::new()).await {
            Ok(payload) => payload,
            Err(ExternalApiError::Business { message }) => {
                debug!(id, message = %message, "Food not found upstream");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let detail = match payload {
            Value::Object(mut map) => match map.remove("food") {
                Some(food @ Value::Object(_)) => food,
                Some(other) => {
                    map.insert("food".to_string(), other);
                    Value::Object(map)
                }
                None => Value::Object(map),
            },
            other => other,
        };

        let mut food: RawFood = serde_json::from_value(detail)?;
        let food_id = *food.id.get_or_insert(id);
        if food.code.is_none() {
            food.code = Some(food_id.to_string());
        }
        food.weight = Some(food.serving_weight().unwrap_or(DEFAULT_SERVING_SIZE));
        if food.calory.is_none() {
            food.calory = food.calorie.or(food.calories);
        }

        Ok(Some(food))
    }

    /// Food detail by id, normalized, optionally with full nutrition.
    pub async fn food_detail(
        &self,
        id: i64,
        include_full_nutrition: bool,
    ) -> ExternalResult<Option<StandardFoodRecord>> {
        let Some(raw) = self.lookup_by_external_id(id).await? else {
            return Ok(None);
        };

        let mut record = nutrition::search_item_to_record(&raw);
        if include_full_nutrition {
            let index = self.state.current().await;
            self.enrich(index, std::slice::from_mut(&mut record)).await;
        }
        Ok(Some(record))
    }
}

/// Whether a search answer looks like the account ran out of quota.
///
/// Either the upstream reported nothing at all (no pages, no hits) or none
/// of the converted hits came from the live database.
pub fn is_account_exhausted(raw: &RawSearchPage, converted: &[StandardFoodRecord]) -> bool {
    if raw.total_pages.unwrap_or(0) == 0 && raw.foods().is_empty() {
        return true;
    }

    !converted.is_empty() && !converted.iter().any(|f| f.source == FoodSource::Boohee)
}

fn query_string(params: &Map<String, Value>) -> String {
    params
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                urlencoding::encode(k),
                urlencoding::encode(&canonical_value(v))
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Sort an upstream answer into success, business failure or HTTP failure.
fn classify(status: StatusCode, body: &str) -> ExternalResult<Value> {
    if !status.is_success() {
        let payload = serde_json::from_str::<Value>(body).unwrap_or(Value::Null);
        return Err(ExternalApiError::Http {
            status: status.as_u16(),
            code: upstream_code(&payload),
            message: message_from_body(body),
        });
    }

    let payload: Value = serde_json::from_str(body)?;
    if is_business_failure(&payload) || has_error(&payload) {
        return Err(ExternalApiError::Business {
            message: upstream_message(&payload),
        });
    }

    Ok(payload)
}

fn is_business_failure(payload: &Value) -> bool {
    match payload.get("success") {
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::Bool(ok)) => !ok,
        _ => false,
    }
}

fn has_error(payload: &Value) -> bool {
    match payload.get("error") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn upstream_message(payload: &Value) -> String {
    let error = payload.get("error");
    payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.and_then(|e| e.get("message")).and_then(Value::as_str))
        .or_else(|| error.and_then(Value::as_str))
        .unwrap_or("no message")
        .to_string()
}

fn upstream_code(payload: &Value) -> Option<i64> {
    payload
        .get("code")
        .or_else(|| payload.get("error").and_then(|e| e.get("code")))
        .and_then(Value::as_i64)
}

fn message_from_body(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(payload) => upstream_message(&payload),
        Err(_) => body.chars().take(200).collect(),
    }
}

// ============================================================================
// Upstream schema
// ============================================================================

/// A food as returned by search, barcode and detail endpoints.
///
/// Only the fields we use are modelled; numbers may arrive as strings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawFood {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub id: Option<i64>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub code: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub brand: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub barcode: Option<String>,

    #[serde(default, deserialize_with = "lenient_f64")]
    pub weight: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64")]
    pub serving_size: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64")]
    pub serving_weight: Option<f64>,

    /// kcal per 100 g for barcode results, per `weight` for search hits.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub calory: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64")]
    pub calorie: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64")]
    pub calories: Option<f64>,

    #[serde(default)]
    pub thumb_image_url: Option<String>,

    #[serde(default)]
    pub units: Option<Vec<RawUnit>>,

    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_liquid: Option<bool>,

    #[serde(default, deserialize_with = "lenient_i64")]
    pub health_light: Option<i64>,
}

impl RawFood {
    /// First usable serving weight among the alternative field names.
    pub fn serving_weight(&self) -> Option<f64> {
        self.weight.or(self.serving_size).or(self.serving_weight)
    }

    pub fn units(&self) -> &[RawUnit] {
        self.units.as_deref().unwrap_or_default()
    }
}

/// A serving unit of a food, e.g. "1 瓶 = 500 克".
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawUnit {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub weight: Option<f64>,

    #[serde(default)]
    pub unit_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_default: Option<bool>,
}

/// One page of search hits.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawSearchPage {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub page: Option<i64>,

    #[serde(default, deserialize_with = "lenient_i64")]
    pub total_pages: Option<i64>,

    #[serde(default)]
    pub foods: Option<Vec<RawFood>>,
}

impl RawSearchPage {
    pub fn foods(&self) -> &[RawFood] {
        self.foods.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct RawFoodList {
    #[serde(default)]
    foods: Option<Vec<RawFood>>,
}

/// Nutrient breakdown as returned by the ingredients endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawNutritionPayload {
    #[serde(default)]
    pub calory: Option<Vec<NutrientEntry>>,
    #[serde(default)]
    pub base_ingredients: Option<Vec<NutrientEntry>>,
    #[serde(default)]
    pub vitamin: Option<Vec<NutrientEntry>>,
    #[serde(default)]
    pub mineral: Option<Vec<NutrientEntry>>,
    #[serde(default)]
    pub amino_acid: Option<Vec<NutrientEntry>>,
    #[serde(default)]
    pub other_ingredients: Option<Vec<NutrientEntry>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: FoodSource) -> StandardFoodRecord {
        StandardFoodRecord {
            name: "苹果".to_string(),
            brand: None,
            category: None,
            serving_size: 100.0,
            serving_unit: "克".to_string(),
            nutrition_per_serving: Default::default(),
            full_nutrition: None,
            barcode: None,
            image_url: None,
            source,
            external_id: None,
            external_code: None,
            is_liquid: None,
            health_light: None,
        }
    }

    #[test]
    fn test_empty_page_means_exhausted() {
        let raw = RawSearchPage {
            page: Some(1),
            total_pages: Some(0),
            foods: Some(vec![]),
        };
        assert!(is_account_exhausted(&raw, &[]));

        let missing = RawSearchPage::default();
        assert!(is_account_exhausted(&missing, &[]));
    }

    #[test]
    fn test_hits_without_live_source_mean_exhausted() {
        let raw = RawSearchPage {
            page: Some(1),
            total_pages: Some(1),
            foods: Some(vec![RawFood::default()]),
        };
        assert!(is_account_exhausted(&raw, &[record(FoodSource::Local)]));
        assert!(!is_account_exhausted(
            &raw,
            &[record(FoodSource::Local), record(FoodSource::Boohee)]
        ));
    }

    #[test]
    fn test_pages_without_hits_are_not_exhausted() {
        let raw = RawSearchPage {
            page: Some(3),
            total_pages: Some(2),
            foods: Some(vec![]),
        };
        assert!(!is_account_exhausted(&raw, &[]));
    }

    #[test]
    fn test_classify_business_failure() {
        let err = classify(StatusCode::OK, r#"{"success":0,"message":"找不到对应的食物"}"#)
            .unwrap_err();
        match err {
            ExternalApiError::Business { message } => assert_eq!(message, "找不到对应的食物"),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = classify(
            StatusCode::OK,
            r#"{"error":{"code":40001,"message":"food not found"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ExternalApiError::Business { .. }));
    }

    #[test]
    fn test_classify_http_failure_keeps_code() {
        let err = classify(
            StatusCode::FORBIDDEN,
            r#"{"code":1001,"message":"quota exceeded"}"#,
        )
        .unwrap_err();
        match err {
            ExternalApiError::Http {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 403);
                assert_eq!(code, Some(1001));
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = classify(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, ExternalApiError::Http { status: 502, code: None, .. }));
    }

    #[test]
    fn test_classify_success_and_malformed() {
        let payload = classify(StatusCode::OK, r#"{"success":1,"foods":[]}"#).unwrap();
        assert_eq!(payload["success"], 1);

        let err = classify(StatusCode::OK, "not json").unwrap_err();
        assert!(matches!(err, ExternalApiError::Decode(_)));
    }

    #[test]
    fn test_query_string_encodes_values() {
        let mut params = Map::new();
        params.insert("q".to_string(), json!("苹果 汁"));
        params.insert("page".to_string(), json!(2));

        let query = query_string(&params);
        assert!(query.contains("page=2"));
        assert!(query.contains("q=%E8%8B%B9%E6%9E%9C%20%E6%B1%81"));
    }

    #[test]
    fn test_raw_food_lenient_fields() {
        let food: RawFood = serde_json::from_value(json!({
            "id": "42",
            "code": 12345,
            "name": "牛奶",
            "serving_size": "250",
            "calory": "65.5",
            "is_liquid": 1,
            "units": [{"unit_name": "盒", "weight": "250", "is_default": true}],
            "unknown": [1, 2, 3]
        }))
        .unwrap();

        assert_eq!(food.id, Some(42));
        assert_eq!(food.code.as_deref(), Some("12345"));
        assert_eq!(food.serving_weight(), Some(250.0));
        assert_eq!(food.calory, Some(65.5));
        assert_eq!(food.is_liquid, Some(true));
        assert_eq!(food.units()[0].weight, Some(250.0));
    }

    #[test]
    fn test_disabled_client_short_circuits() {
        let client = BooheeClient::new(&ExternalApiConfig::disabled()).unwrap();
        assert!(!client.is_enabled());
        let err = tokio_test::block_on(client.search("苹果", 1, false)).unwrap_err();
        assert!(matches!(err, ExternalApiError::Disabled));
    }
}
