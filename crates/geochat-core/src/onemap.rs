//! OneMap Singapore client: planning-area boundaries and dengue-cluster themes.
//!
//! Pure I/O plus shape normalization. Both upstream payloads are massaged into
//! GeoJSON `Feature`s so the gateway and the grounding layer share one shape.
//! Grounding callers use the `*_or_empty` variants, which absorb every failure
//! into an empty feature set so the chat pipeline degrades to "0 items".

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const ONEMAP_BASE: &str = "https://www.onemap.gov.sg";
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Property keys tried, in order, for a dengue cluster's display name.
const DENGUE_NAME_KEYS: &[&str] = &["DESCRIPTION", "NAME", "Description", "Name"];

#[derive(Debug, thiserror::Error)]
pub enum OneMapError {
    #[error("Missing ONEMAP_TOKEN environment variable.")]
    MissingToken,
    #[error("OneMap request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("OneMap returned status {0}")]
    Status(u16),
}

/// A normalized GeoJSON feature: named properties plus a geometry value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: serde_json::Map<String, Value>,
    pub geometry: Value,
}

impl Feature {
    fn new(properties: serde_json::Map<String, Value>, geometry: Value) -> Self {
        Self {
            kind: "Feature".to_string(),
            properties,
            geometry,
        }
    }

    /// First truthy display name among `keys`. Empty strings, nulls, zeros,
    /// and missing keys all fall through to the next candidate; numbers are
    /// rendered bare, without JSON quoting.
    pub fn display_name(&self, keys: &[&str]) -> Option<String> {
        for key in keys {
            match self.properties.get(*key) {
                Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
                Some(Value::Number(n)) if n.as_f64() != Some(0.0) => return Some(n.to_string()),
                _ => continue,
            }
        }
        None
    }

    /// Display name for a dengue cluster feature.
    pub fn dengue_name(&self) -> Option<String> {
        self.display_name(DENGUE_NAME_KEYS)
    }

    /// Display name for a planning-area feature.
    pub fn planning_name(&self) -> Option<String> {
        self.display_name(&["name"])
    }
}

/// Wraps features as a GeoJSON FeatureCollection value for the data routes.
pub fn feature_collection(features: Vec<Feature>) -> Value {
    serde_json::json!({ "type": "FeatureCollection", "features": features })
}

/// Bearer-token OneMap client. The token is optional: without it the fallible
/// methods fail with `MissingToken` and the grounding variants yield nothing.
pub struct OneMapClient {
    http: reqwest::Client,
    token: Option<String>,
}

impl OneMapClient {
    pub fn new(token: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            token: token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        }
    }

    /// Token from `ONEMAP_TOKEN`; absent or blank means unconfigured.
    pub fn from_env() -> Self {
        Self::new(std::env::var("ONEMAP_TOKEN").ok())
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, OneMapError> {
        let token = self.token.as_deref().ok_or(OneMapError::MissingToken)?;
        let url = format!("{ONEMAP_BASE}{path}");
        let res = self
            .http
            .get(&url)
            .header("Authorization", token)
            .query(params)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(OneMapError::Status(res.status().as_u16()));
        }
        Ok(res.json().await?)
    }

    /// Planning-area boundaries from `getAllPlanningarea`. Each result item
    /// carries `pln_area_n` and a stringified `geojson` geometry; items with
    /// missing or unparseable geometry are skipped.
    pub async fn planning_features(&self, year: Option<&str>) -> Result<Vec<Feature>, OneMapError> {
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(y) = year {
            params.push(("year", y));
        }
        let data = self
            .get_json("/api/public/popapi/getAllPlanningarea", &params)
            .await?;
        let items = data
            .get("SearchResults")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(items.iter().filter_map(normalize_planning_item).collect())
    }

    /// Dengue-cluster polygons from the `dengue_cluster` theme. Upstream nests
    /// the geometry under a `GeoJSON` key, sometimes with string-encoded
    /// coordinates and single-ring polygons; both quirks are normalized here.
    pub async fn dengue_features(&self) -> Result<Vec<Feature>, OneMapError> {
        let data = self
            .get_json(
                "/api/public/themesvc/retrieveTheme",
                &[("queryName", "dengue_cluster")],
            )
            .await?;
        let items = data
            .get("SrchResults")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(items.iter().filter_map(normalize_dengue_item).collect())
    }

    /// Raw theme catalogue from `getAllThemesInfo`, untouched.
    pub async fn themes_info(&self) -> Result<Value, OneMapError> {
        self.get_json("/api/public/themesvc/getAllThemesInfo", &[])
            .await
    }

    /// Grounding variant: any failure collapses to an empty feature set.
    pub async fn planning_features_or_empty(&self, year: Option<&str>) -> Vec<Feature> {
        match self.planning_features(year).await {
            Ok(features) => features,
            Err(e) => {
                tracing::warn!("planning-area fetch degraded to empty: {e}");
                Vec::new()
            }
        }
    }

    /// Grounding variant: any failure collapses to an empty feature set.
    pub async fn dengue_features_or_empty(&self) -> Vec<Feature> {
        match self.dengue_features().await {
            Ok(features) => features,
            Err(e) => {
                tracing::warn!("dengue-cluster fetch degraded to empty: {e}");
                Vec::new()
            }
        }
    }
}

fn normalize_planning_item(item: &Value) -> Option<Feature> {
    let name = item.get("pln_area_n").cloned().unwrap_or(Value::Null);
    let geojson_str = item.get("geojson").and_then(Value::as_str)?;
    let geometry: Value = serde_json::from_str(geojson_str).ok()?;
    let mut properties = serde_json::Map::new();
    properties.insert("name".to_string(), name);
    Some(Feature::new(properties, geometry))
}

fn normalize_dengue_item(item: &Value) -> Option<Feature> {
    let gj = item.get("GeoJSON")?.as_object()?;
    let mut geometry = gj.get("geometry")?.clone();
    {
        let geom = geometry.as_object_mut()?;
        // Coordinates sometimes arrive as a JSON string inside the JSON.
        let reparsed = match geom.get("coordinates") {
            Some(Value::String(raw)) => Some(serde_json::from_str::<Value>(raw).ok()?),
            _ => None,
        };
        if let Some(parsed) = reparsed {
            geom.insert("coordinates".to_string(), parsed);
        }
        // Single-ring polygons arrive one nesting level short.
        let is_polygon = geom.get("type").and_then(Value::as_str) == Some("Polygon");
        if is_polygon {
            let needs_wrap = geom
                .get("coordinates")
                .and_then(|c| c.get(0))
                .and_then(|ring| ring.get(0))
                .map(Value::is_number)
                .unwrap_or(false);
            if needs_wrap {
                let coords = geom.get("coordinates").cloned().unwrap_or(Value::Null);
                geom.insert("coordinates".to_string(), Value::Array(vec![coords]));
            }
        }
    }
    let properties: serde_json::Map<String, Value> = item
        .as_object()?
        .iter()
        .filter(|(k, _)| k.as_str() != "GeoJSON")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Some(Feature::new(properties, geometry))
}
