use serde::{Deserialize, Serialize};

/// District row used by list and search views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistrictSummary {
  pub slug: String,
  pub name: String,
  pub state: String,
  pub population: u64,
}

/// Full district record shown in the detail view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistrictDetail {
  pub slug: String,
  pub name: String,
  pub state: String,
  pub population: u64,
  pub area_km2: f64,
  pub forest_cover_pct: Option<f64>,
  pub aqi: Option<u32>,
  pub updated_at: String,
}

/// Output of the oxygen computation for one district and parameter pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OxygenMetrics {
  pub oxygen_demand_kg: f64,
  pub oxygen_supply_kg: f64,
  pub trees_required: u64,
}

impl OxygenMetrics {
  /// Demand not covered by supply, zero when there is a surplus
  pub fn deficit_kg(&self) -> f64 {
    (self.oxygen_demand_kg - self.oxygen_supply_kg).max(0.0)
  }
}
