//! Forecast Generator
//!
//! Rolls a trained model forward week by week. Future climate is unknown, so
//! climate features are seasonal placeholders for the target month; lag and
//! rolling features start from the model's recent observed history and then
//! consume the model's own predictions. Quality degrades with the horizon,
//! which each forecast reports through its confidence.

use chrono::{Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use ndarray::Array2;
use tracing::{debug, info};

use super::synthetic::SeasonalClimate;
use crate::domain::{
    alert_level_for, ConfidenceBand, EpiWeek, Forecast, ForecastConfidence, TargetField,
};
use crate::error::{PipelineError, PipelineResult};
use crate::ml::TrainedModel;

/// Lag values used when a model carries no usable history.
const FALLBACK_LAGS: [f64; 4] = [50.0, 45.0, 40.0, 35.0];
/// Rolling-mean values used when a model carries no usable history.
const FALLBACK_ROLLING: [f64; 3] = [45.0, 42.0, 40.0];

pub struct ForecastGenerator {
    timezone: Tz,
}

impl Default for ForecastGenerator {
    fn default() -> Self {
        Self::new(chrono_tz::America::Sao_Paulo)
    }
}

impl ForecastGenerator {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    /// Current local date in the generator's timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    pub fn generate(
        &self,
        model: &TrainedModel,
        periods_ahead: u32,
    ) -> PipelineResult<Vec<Forecast>> {
        self.generate_from(model, periods_ahead, self.today())
    }

    /// Forecasts for weeks `1..=periods_ahead` after `today`, in order.
    pub fn generate_from(
        &self,
        model: &TrainedModel,
        periods_ahead: u32,
        today: NaiveDate,
    ) -> PipelineResult<Vec<Forecast>> {
        if periods_ahead == 0 {
            return Err(PipelineError::Configuration(
                "periods_ahead must be at least 1".to_string(),
            ));
        }

        let builder = model.feature_builder()?;
        let index = |field: TargetField| {
            model.targets.iter().position(|t| *t == field).ok_or_else(|| {
                PipelineError::Configuration(format!("model {} has no {field} output", model.run_id))
            })
        };
        let suspected_idx = index(TargetField::CasesSuspected)?;
        let confirmed_idx = index(TargetField::CasesConfirmed)?;
        let incidence_idx = index(TargetField::IncidenceRate)?;
        let history_idx = index(model.lag_target)?;

        let mut history = model.recent_targets.clone();
        if history.len() < builder.config().max_lag() {
            debug!(
                model = %model.key,
                available = history.len(),
                "Model history too short, using fallback lag values"
            );
        }

        let created_at = Utc::now();
        let mut forecasts = Vec::with_capacity(periods_ahead as usize);

        for period in 1..=periods_ahead {
            let date = today + Duration::weeks(i64::from(period));
            let epi_week =
                EpiWeek::containing(date).map_err(|e| PipelineError::Configuration(e.to_string()))?;

            let climate = SeasonalClimate::for_month(date.month()).placeholder_aggregates();
            let (lags, rolling) = builder
                .next_period_targets(&history)
                .unwrap_or_else(|| fallback_targets(builder.config().lags.len(), builder.config().rolling_windows.len()));
            let features = builder.assemble(&climate, &lags, &rolling, date);

            let x = Array2::from_shape_vec((1, features.len()), features)
                .map_err(|e| PipelineError::Configuration(e.to_string()))?;
            let y = model.predict(&x)?;
            let output = y.row(0);
            if output.iter().any(|v| !v.is_finite()) {
                return Err(PipelineError::Training(format!(
                    "model {} produced a non-finite prediction for period {period}",
                    model.run_id
                )));
            }

            let suspected = output[suspected_idx].max(0.0).round();
            let confirmed = output[confirmed_idx].max(0.0);
            let incidence = output[incidence_idx].max(0.0);
            // Band around the reported count, so both agree.
            let band = ConfidenceBand::heuristic(suspected);

            forecasts.push(Forecast {
                municipality_code: model.key.municipality_code.clone(),
                disease_type: model.key.disease_type,
                prediction_date: date,
                epidemiological_week: epi_week.week,
                year: epi_week.year,
                predicted_cases_suspected: suspected as u32,
                predicted_cases_confirmed: confirmed.round() as u32,
                predicted_incidence_rate: incidence,
                confidence_interval_lower: band.lower,
                confidence_interval_upper: band.upper,
                alert_level: alert_level_for(incidence),
                confidence: ForecastConfidence::for_horizon(period),
                model_version: model.model_version.clone(),
                created_at,
            });

            history.push(output[history_idx].max(0.0));
        }

        info!(
            model = %model.key,
            periods = forecasts.len(),
            first = %today,
            "Generated forecasts"
        );
        Ok(forecasts)
    }
}

fn fallback_targets(lags: usize, windows: usize) -> (Vec<f64>, Vec<f64>) {
    let pick = |values: &[f64], i: usize| values.get(i).or(values.last()).copied().unwrap_or(0.0);
    (
        (0..lags).map(|i| pick(&FALLBACK_LAGS, i)).collect(),
        (0..windows).map(|i| pick(&FALLBACK_ROLLING, i)).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::tests::quick_model;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 6).unwrap()
    }

    #[test]
    fn test_generates_consecutive_weeks() {
        let model = quick_model("3550308");
        let forecasts = ForecastGenerator::default()
            .generate_from(&model, 4, today())
            .unwrap();

        assert_eq!(forecasts.len(), 4);
        for (k, f) in forecasts.iter().enumerate() {
            assert_eq!(f.prediction_date, today() + Duration::weeks(k as i64 + 1));
            assert_eq!(f.municipality_code, model.key.municipality_code);
            assert!((1..=4).contains(&f.alert_level));
            assert!(f.confidence_interval_lower <= f.confidence_interval_upper);
            assert!(f.predicted_incidence_rate >= 0.0);
            assert_eq!(f.model_version, model.model_version);
        }
        assert_eq!(forecasts[0].confidence, ForecastConfidence::Medium);
        assert_eq!(forecasts[3].confidence, ForecastConfidence::Low);
        // 2024-03-13 falls in epidemiological week 11
        assert_eq!(forecasts[0].period_label(), "2024-W11");
    }

    #[test]
    fn test_band_follows_suspected_cases() {
        let model = quick_model("3550308");
        let forecasts = ForecastGenerator::default()
            .generate_from(&model, 4, today())
            .unwrap();
        for f in &forecasts {
            let point = f64::from(f.predicted_cases_suspected);
            assert!((f.confidence_interval_lower - 0.8 * point).abs() < 1e-9);
            assert!((f.confidence_interval_upper - 1.2 * point).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_history_uses_fallback() {
        let mut model = quick_model("3550308");
        model.recent_targets.clear();
        let forecasts = ForecastGenerator::default()
            .generate_from(&model, 2, today())
            .unwrap();
        assert_eq!(forecasts.len(), 2);

        let (lags, rolling) = fallback_targets(4, 3);
        assert_eq!(lags, vec![50.0, 45.0, 40.0, 35.0]);
        assert_eq!(rolling, vec![45.0, 42.0, 40.0]);
        assert_eq!(fallback_targets(5, 1).0[4], 35.0);
    }

    #[test]
    fn test_zero_periods_rejected() {
        let model = quick_model("3550308");
        assert!(matches!(
            ForecastGenerator::default().generate_from(&model, 0, today()),
            Err(PipelineError::Configuration(_))
        ));
    }
}
