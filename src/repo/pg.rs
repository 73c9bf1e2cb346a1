#![cfg(feature = "db")]

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder};

use super::{ClimateQuery, ForecastQuery, RecordStore, SurveillanceQuery};
use crate::domain::{
    CleanupReport, ClimateRecord, DiseaseType, EpiWeek, Forecast, ForecastConfidence,
    MunicipalityCode, RecordStatistics, SurveillanceRecord, TableCounts,
};

pub struct PgStore {
    pub pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .context("connecting to Postgres")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("running migrations")?;
        Ok(Self { pool })
    }
}

#[derive(sqlx::FromRow)]
struct ClimateRow {
    municipality_code: String,
    date: NaiveDate,
    temperature_max: f64,
    temperature_min: f64,
    temperature_avg: f64,
    humidity: f64,
    precipitation: f64,
    wind_speed: f64,
    pressure: f64,
}

impl TryFrom<ClimateRow> for ClimateRecord {
    type Error = anyhow::Error;

    fn try_from(row: ClimateRow) -> Result<Self> {
        Ok(Self {
            municipality_code: MunicipalityCode::new(row.municipality_code)?,
            date: row.date,
            temperature_max: row.temperature_max,
            temperature_min: row.temperature_min,
            temperature_avg: row.temperature_avg,
            humidity: row.humidity,
            precipitation: row.precipitation,
            wind_speed: row.wind_speed,
            pressure: row.pressure,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SurveillanceRow {
    municipality_code: String,
    disease_type: String,
    year: i32,
    epidemiological_week: i32,
    cases_suspected: i32,
    cases_confirmed: i32,
    cases_probable: i32,
    incidence_rate: f64,
    alert_level: i16,
    population: Option<i64>,
}

impl TryFrom<SurveillanceRow> for SurveillanceRecord {
    type Error = anyhow::Error;

    fn try_from(row: SurveillanceRow) -> Result<Self> {
        Ok(Self {
            municipality_code: MunicipalityCode::new(row.municipality_code)?,
            disease_type: row.disease_type.parse::<DiseaseType>()?,
            year: row.year,
            epidemiological_week: u32::try_from(row.epidemiological_week)?,
            cases_suspected: u32::try_from(row.cases_suspected)?,
            cases_confirmed: u32::try_from(row.cases_confirmed)?,
            cases_probable: u32::try_from(row.cases_probable)?,
            incidence_rate: row.incidence_rate,
            alert_level: u8::try_from(row.alert_level)?,
            population: row.population.map(u64::try_from).transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ForecastRow {
    municipality_code: String,
    disease_type: String,
    prediction_date: NaiveDate,
    epidemiological_week: i32,
    year: i32,
    predicted_cases_suspected: i32,
    predicted_cases_confirmed: i32,
    predicted_incidence_rate: f64,
    confidence_interval_lower: f64,
    confidence_interval_upper: f64,
    alert_level: i16,
    confidence: String,
    model_version: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ForecastRow> for Forecast {
    type Error = anyhow::Error;

    fn try_from(row: ForecastRow) -> Result<Self> {
        let confidence = match row.confidence.as_str() {
            "medium" => ForecastConfidence::Medium,
            "low" => ForecastConfidence::Low,
            other => anyhow::bail!("unknown forecast confidence '{other}'"),
        };
        Ok(Self {
            municipality_code: MunicipalityCode::new(row.municipality_code)?,
            disease_type: row.disease_type.parse::<DiseaseType>()?,
            prediction_date: row.prediction_date,
            epidemiological_week: u32::try_from(row.epidemiological_week)?,
            year: row.year,
            predicted_cases_suspected: u32::try_from(row.predicted_cases_suspected)?,
            predicted_cases_confirmed: u32::try_from(row.predicted_cases_confirmed)?,
            predicted_incidence_rate: row.predicted_incidence_rate,
            confidence_interval_lower: row.confidence_interval_lower,
            confidence_interval_upper: row.confidence_interval_upper,
            alert_level: u8::try_from(row.alert_level)?,
            confidence,
            model_version: row.model_version,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TableStats {
    total: i64,
    municipalities: i64,
}

async fn table_stats(pool: &PgPool, table: &str) -> Result<TableStats> {
    let sql = format!(
        "SELECT COUNT(*) AS total, COUNT(DISTINCT municipality_code) AS municipalities FROM {table}"
    );
    Ok(sqlx::query_as(&sql).fetch_one(pool).await?)
}

fn push_limit(qb: &mut QueryBuilder<'_, Postgres>, limit: Option<usize>) -> Result<()> {
    if let Some(limit) = limit {
        qb.push(" LIMIT ").push_bind(i64::try_from(limit)?);
    }
    Ok(())
}

#[async_trait]
impl RecordStore for PgStore {
    async fn climate(&self, query: &ClimateQuery) -> Result<Vec<ClimateRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT municipality_code, date, temperature_max, temperature_min, temperature_avg, \
             humidity, precipitation, wind_speed, pressure FROM climate_records WHERE TRUE",
        );
        if let Some(code) = &query.municipality_code {
            qb.push(" AND municipality_code = ").push_bind(code.as_str().to_owned());
        }
        if let Some(start) = query.start_date {
            qb.push(" AND date >= ").push_bind(start);
        }
        if let Some(end) = query.end_date {
            qb.push(" AND date <= ").push_bind(end);
        }
        qb.push(" ORDER BY date DESC");
        push_limit(&mut qb, query.limit)?;

        let rows: Vec<ClimateRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().rev().map(ClimateRecord::try_from).collect()
    }

    async fn surveillance(&self, query: &SurveillanceQuery) -> Result<Vec<SurveillanceRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT municipality_code, disease_type, year, epidemiological_week, cases_suspected, \
             cases_confirmed, cases_probable, incidence_rate, alert_level, population \
             FROM surveillance_records WHERE TRUE",
        );
        if let Some(code) = &query.municipality_code {
            qb.push(" AND municipality_code = ").push_bind(code.as_str().to_owned());
        }
        if let Some(disease) = query.disease_type {
            qb.push(" AND disease_type = ").push_bind(disease.to_string());
        }
        if let Some(year) = query.start_year {
            qb.push(" AND year >= ").push_bind(year);
        }
        if let Some(year) = query.end_year {
            qb.push(" AND year <= ").push_bind(year);
        }
        if let Some(week) = query.start_week {
            qb.push(" AND epidemiological_week >= ").push_bind(i32::try_from(week)?);
        }
        if let Some(week) = query.end_week {
            qb.push(" AND epidemiological_week <= ").push_bind(i32::try_from(week)?);
        }
        qb.push(" ORDER BY year DESC, epidemiological_week DESC");
        push_limit(&mut qb, query.limit)?;

        let rows: Vec<SurveillanceRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter()
            .rev()
            .map(SurveillanceRecord::try_from)
            .collect()
    }

    async fn forecasts(&self, query: &ForecastQuery) -> Result<Vec<Forecast>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT municipality_code, disease_type, prediction_date, epidemiological_week, year, \
             predicted_cases_suspected, predicted_cases_confirmed, predicted_incidence_rate, \
             confidence_interval_lower, confidence_interval_upper, alert_level, confidence, \
             model_version, created_at FROM forecasts WHERE TRUE",
        );
        if let Some(code) = &query.municipality_code {
            qb.push(" AND municipality_code = ").push_bind(code.as_str().to_owned());
        }
        if let Some(disease) = query.disease_type {
            qb.push(" AND disease_type = ").push_bind(disease.to_string());
        }
        if let Some(start) = query.start_date {
            qb.push(" AND prediction_date >= ").push_bind(start);
        }
        if let Some(end) = query.end_date {
            qb.push(" AND prediction_date <= ").push_bind(end);
        }
        qb.push(" ORDER BY prediction_date DESC");
        push_limit(&mut qb, query.limit)?;

        let rows: Vec<ForecastRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().rev().map(Forecast::try_from).collect()
    }

    async fn upsert_climate(&self, records: &[ClimateRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO climate_records (municipality_code, date, temperature_max, temperature_min,
                    temperature_avg, humidity, precipitation, wind_speed, pressure)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (municipality_code, date) DO UPDATE SET
                    temperature_max = EXCLUDED.temperature_max,
                    temperature_min = EXCLUDED.temperature_min,
                    temperature_avg = EXCLUDED.temperature_avg,
                    humidity = EXCLUDED.humidity,
                    precipitation = EXCLUDED.precipitation,
                    wind_speed = EXCLUDED.wind_speed,
                    pressure = EXCLUDED.pressure
                "#,
            )
            .bind(r.municipality_code.as_str())
            .bind(r.date)
            .bind(r.temperature_max)
            .bind(r.temperature_min)
            .bind(r.temperature_avg)
            .bind(r.humidity)
            .bind(r.precipitation)
            .bind(r.wind_speed)
            .bind(r.pressure)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    async fn upsert_surveillance(&self, records: &[SurveillanceRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO surveillance_records (municipality_code, disease_type, year,
                    epidemiological_week, cases_suspected, cases_confirmed, cases_probable,
                    incidence_rate, alert_level, population)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (municipality_code, disease_type, year, epidemiological_week) DO UPDATE SET
                    cases_suspected = EXCLUDED.cases_suspected,
                    cases_confirmed = EXCLUDED.cases_confirmed,
                    cases_probable = EXCLUDED.cases_probable,
                    incidence_rate = EXCLUDED.incidence_rate,
                    alert_level = EXCLUDED.alert_level,
                    population = EXCLUDED.population
                "#,
            )
            .bind(r.municipality_code.as_str())
            .bind(r.disease_type.to_string())
            .bind(r.year)
            .bind(i32::try_from(r.epidemiological_week)?)
            .bind(i32::try_from(r.cases_suspected)?)
            .bind(i32::try_from(r.cases_confirmed)?)
            .bind(i32::try_from(r.cases_probable)?)
            .bind(r.incidence_rate)
            .bind(i16::from(r.alert_level))
            .bind(r.population.map(i64::try_from).transpose()?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    async fn upsert_forecasts(&self, forecasts: &[Forecast]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for f in forecasts {
            sqlx::query(
                r#"
                INSERT INTO forecasts (municipality_code, disease_type, prediction_date,
                    epidemiological_week, year, predicted_cases_suspected, predicted_cases_confirmed,
                    predicted_incidence_rate, confidence_interval_lower, confidence_interval_upper,
                    alert_level, confidence, model_version, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (municipality_code, disease_type, prediction_date) DO UPDATE SET
                    epidemiological_week = EXCLUDED.epidemiological_week,
                    year = EXCLUDED.year,
                    predicted_cases_suspected = EXCLUDED.predicted_cases_suspected,
                    predicted_cases_confirmed = EXCLUDED.predicted_cases_confirmed,
                    predicted_incidence_rate = EXCLUDED.predicted_incidence_rate,
                    confidence_interval_lower = EXCLUDED.confidence_interval_lower,
                    confidence_interval_upper = EXCLUDED.confidence_interval_upper,
                    alert_level = EXCLUDED.alert_level,
                    confidence = EXCLUDED.confidence,
                    model_version = EXCLUDED.model_version,
                    created_at = EXCLUDED.created_at
                "#,
            )
            .bind(f.municipality_code.as_str())
            .bind(f.disease_type.to_string())
            .bind(f.prediction_date)
            .bind(i32::try_from(f.epidemiological_week)?)
            .bind(f.year)
            .bind(i32::try_from(f.predicted_cases_suspected)?)
            .bind(i32::try_from(f.predicted_cases_confirmed)?)
            .bind(f.predicted_incidence_rate)
            .bind(f.confidence_interval_lower)
            .bind(f.confidence_interval_upper)
            .bind(i16::from(f.alert_level))
            .bind(f.confidence.to_string())
            .bind(&f.model_version)
            .bind(f.created_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("upserting forecast for {}", f.prediction_date))?;
        }
        tx.commit().await?;
        Ok(forecasts.len())
    }

    async fn statistics(&self) -> Result<RecordStatistics> {
        let climate = table_stats(&self.pool, "climate_records").await?;
        let surveillance = table_stats(&self.pool, "surveillance_records").await?;
        let forecasts = table_stats(&self.pool, "forecasts").await?;

        let diseases: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT disease_type FROM surveillance_records ORDER BY disease_type",
        )
        .fetch_all(&self.pool)
        .await?;
        let latest_climate_date: Option<NaiveDate> =
            sqlx::query_scalar("SELECT MAX(date) FROM climate_records")
                .fetch_one(&self.pool)
                .await?;
        let latest_week: Option<(i32, i32)> = sqlx::query_as(
            "SELECT year, epidemiological_week FROM surveillance_records \
             ORDER BY year DESC, epidemiological_week DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let latest_prediction_date: Option<NaiveDate> =
            sqlx::query_scalar("SELECT MAX(prediction_date) FROM forecasts")
                .fetch_one(&self.pool)
                .await?;

        let count = |n: i64| u64::try_from(n).unwrap_or_default();
        Ok(RecordStatistics {
            total_records: TableCounts {
                climate: count(climate.total),
                surveillance: count(surveillance.total),
                forecasts: count(forecasts.total),
            },
            unique_municipalities: TableCounts {
                climate: count(climate.municipalities),
                surveillance: count(surveillance.municipalities),
                forecasts: count(forecasts.municipalities),
            },
            disease_types: diseases
                .iter()
                .map(|d| d.parse::<DiseaseType>())
                .collect::<Result<_, _>>()?,
            latest_climate_date,
            latest_surveillance_week: latest_week
                .map(|(year, week)| -> Result<EpiWeek> {
                    Ok(EpiWeek {
                        year,
                        week: u32::try_from(week)?,
                    })
                })
                .transpose()?,
            latest_prediction_date,
        })
    }

    async fn delete_before(&self, cutoff: NaiveDate) -> Result<CleanupReport> {
        let mut tx = self.pool.begin().await?;
        let climate = sqlx::query("DELETE FROM climate_records WHERE date < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        let forecasts = sqlx::query("DELETE FROM forecasts WHERE prediction_date < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        tx.commit().await.context("committing cleanup")?;
        Ok(CleanupReport {
            cutoff: Some(cutoff),
            climate_deleted: climate.rows_affected(),
            forecasts_deleted: forecasts.rows_affected(),
        })
    }
}
