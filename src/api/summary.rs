use axum::extract::{Path, Query, State};

use crate::{
    api::{data::SummaryQuery, error::ApiError, response::ApiResponse},
    controller::AppState,
    domain::{latest_forecasts, CaseSummary, RecordStatistics, StateSummary},
    repo::{ForecastQuery, SurveillanceQuery},
};

/// GET /api/v1/statistics
pub async fn statistics(
    State(state): State<AppState>,
) -> Result<ApiResponse<RecordStatistics>, ApiError> {
    Ok(ApiResponse::success(state.store.statistics().await?))
}

/// GET /api/v1/summary/state/:state - Observed cases, alert levels and
/// latest forecasts across a state's configured municipalities
pub async fn state_summary(
    State(state): State<AppState>,
    Path(uf): Path<String>,
    Query(query): Query<SummaryQuery>,
) -> Result<ApiResponse<StateSummary>, ApiError> {
    let query = SummaryQuery {
        state: Some(uf.clone()),
        ..query
    };
    let codes = query.state_codes(&state)?.unwrap_or_default();

    let records: Vec<_> = state
        .store
        .surveillance(&SurveillanceQuery {
            disease_type: query.disease_type,
            start_year: query.year,
            end_year: query.year,
            ..SurveillanceQuery::default()
        })
        .await?
        .into_iter()
        .filter(|r| codes.contains(&r.municipality_code))
        .collect();
    let forecasts = state
        .store
        .forecasts(&ForecastQuery {
            disease_type: query.disease_type,
            ..ForecastQuery::default()
        })
        .await?;
    let latest: Vec<_> = latest_forecasts(forecasts)
        .into_iter()
        .filter(|f| codes.contains(&f.municipality_code))
        .collect();

    let mut municipalities: Vec<_> = codes.into_iter().collect();
    municipalities.sort();
    let summary = StateSummary::build(
        uf.to_uppercase(),
        municipalities,
        &CaseSummary::aggregate(&records),
        latest,
    );
    Ok(ApiResponse::success(summary))
}
