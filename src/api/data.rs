//! Read-only listings of stored records.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::info;
use validator::Validate;

use crate::{
    api::{error::ApiError, response::ApiResponse},
    controller::AppState,
    domain::{
        latest_forecasts as latest_per_key, CaseSummary, CleanupReport, ClimateRecord, DiseaseType,
        Forecast, MunicipalityCode, SurveillanceRecord,
    },
    repo::{ClimateQuery, ForecastQuery, SurveillanceQuery},
};

/// GET /api/v1/data/climate
pub async fn list_climate(
    State(state): State<AppState>,
    Query(query): Query<ClimateQuery>,
) -> Result<ApiResponse<Vec<ClimateRecord>>, ApiError> {
    let records = state.store.climate(&query).await?;
    let count = records.len();
    Ok(ApiResponse::success(records).with_count(count))
}

/// GET /api/v1/data/surveillance
pub async fn list_surveillance(
    State(state): State<AppState>,
    Query(query): Query<SurveillanceQuery>,
) -> Result<ApiResponse<Vec<SurveillanceRecord>>, ApiError> {
    let records = state.store.surveillance(&query).await?;
    let count = records.len();
    Ok(ApiResponse::success(records).with_count(count))
}

/// GET /api/v1/data/forecasts
pub async fn list_forecasts(
    State(state): State<AppState>,
    Query(query): Query<ForecastQuery>,
) -> Result<ApiResponse<Vec<Forecast>>, ApiError> {
    let forecasts = state.store.forecasts(&query).await?;
    let count = forecasts.len();
    Ok(ApiResponse::success(forecasts).with_count(count))
}

/// Filter for aggregated views. `state` selects the configured
/// municipalities of that UF.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryQuery {
    pub municipality_code: Option<MunicipalityCode>,
    pub disease_type: Option<DiseaseType>,
    pub state: Option<String>,
    pub year: Option<i32>,
}

impl SummaryQuery {
    /// Municipality codes allowed by `state`, or `None` when unrestricted.
    pub(crate) fn state_codes(&self, state: &AppState) -> Result<Option<HashSet<MunicipalityCode>>, ApiError> {
        let Some(uf) = &self.state else {
            return Ok(None);
        };
        let codes: HashSet<_> = state
            .cfg
            .municipalities_in(uf)
            .into_iter()
            .map(|m| m.code.clone())
            .collect();
        if codes.is_empty() {
            return Err(ApiError::NotFound(format!("no municipalities configured for state '{uf}'")));
        }
        Ok(Some(codes))
    }
}

/// GET /api/v1/data/forecasts/latest - Most recent forecast per municipality and disease
pub async fn latest_forecasts(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<ApiResponse<Vec<Forecast>>, ApiError> {
    let codes = query.state_codes(&state)?;
    let forecasts = state
        .store
        .forecasts(&ForecastQuery {
            municipality_code: query.municipality_code.clone(),
            disease_type: query.disease_type,
            ..ForecastQuery::default()
        })
        .await?;
    let latest: Vec<_> = latest_per_key(forecasts)
        .into_iter()
        .filter(|f| codes.as_ref().map_or(true, |c| c.contains(&f.municipality_code)))
        .collect();
    let count = latest.len();
    Ok(ApiResponse::success(latest).with_count(count))
}

/// GET /api/v1/data/surveillance/summary - Case totals per municipality and disease
pub async fn surveillance_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<ApiResponse<Vec<CaseSummary>>, ApiError> {
    let codes = query.state_codes(&state)?;
    let records: Vec<_> = state
        .store
        .surveillance(&SurveillanceQuery {
            municipality_code: query.municipality_code.clone(),
            disease_type: query.disease_type,
            start_year: query.year,
            end_year: query.year,
            ..SurveillanceQuery::default()
        })
        .await?
        .into_iter()
        .filter(|r| codes.as_ref().map_or(true, |c| c.contains(&r.municipality_code)))
        .collect();
    let summary = CaseSummary::aggregate(&records);
    let count = summary.len();
    Ok(ApiResponse::success(summary).with_count(count))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CleanupBody {
    #[validate(range(min = 1, max = 36500))]
    pub days_to_keep: Option<i64>,
}

const DEFAULT_DAYS_TO_KEEP: i64 = 365;

/// POST /api/v1/data/cleanup - Drop climate records and forecasts older than the retention window
pub async fn cleanup(
    State(state): State<AppState>,
    Json(body): Json<CleanupBody>,
) -> Result<ApiResponse<CleanupReport>, ApiError> {
    body.validate()?;
    let days = body.days_to_keep.unwrap_or(DEFAULT_DAYS_TO_KEEP);
    let cutoff = Utc::now().date_naive() - Duration::days(days);
    let report = state.store.delete_before(cutoff).await?;
    info!(
        %cutoff,
        climate = report.climate_deleted,
        forecasts = report.forecasts_deleted,
        "Removed old records"
    );
    Ok(ApiResponse::success(report))
}
