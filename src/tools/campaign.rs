//! Campaign analytics tools.
//!
//! Numeric and date columns are CAST in SQL (DOUBLE PRECISION, BIGINT,
//! TEXT) so both backends hand back the same JSON shapes, and the rows
//! deserialize straight into the models. Joined metrics columns carry an
//! `m_` prefix and are split off after fetching.

use crate::config::DatabaseKind;
use crate::db::{DbPool, JsonRow, QueryExecutor, QueryParam};
use crate::error::{AdsError, AdsResult};
use crate::models::{
    AdGroupPerformance, BudgetRecommendation, CampaignPerformance, DateRange, Metric,
    Recommendation, Trends,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use schemars::JsonSchema;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

const METRIC_PREFIX: &str = "m_";

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CampaignPerformanceInput {
    /// Campaign identifier
    pub campaign_id: String,
    /// Only join metrics rows dated inside this window
    #[serde(default)]
    pub date_range: Option<DateRange>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdGroupPerformanceInput {
    /// Ad group identifier
    pub ad_group_id: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeBudgetInput {
    /// Advertising profile whose campaigns are analyzed
    pub profile_id: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrendsInput {
    /// Advertising profile identifier
    pub profile_id: String,
    /// Inclusive date window
    pub date_range: DateRange,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BudgetRow {
    campaign_id: String,
    name: String,
    current_budget: f64,
    roas: Option<f64>,
}

#[derive(Clone)]
pub struct CampaignToolHandler {
    pool: Arc<DbPool>,
    executor: QueryExecutor,
}

impl CampaignToolHandler {
    pub fn new(pool: Arc<DbPool>, executor: QueryExecutor) -> Self {
        Self { pool, executor }
    }

    /// A campaign joined with its metrics rows. An unknown campaign yields
    /// an empty list; a campaign without metrics in the window yields one
    /// entry with `metrics: null`.
    pub async fn analyze_campaign_performance(
        &self,
        input: CampaignPerformanceInput,
    ) -> AdsResult<Vec<CampaignPerformance>> {
        let mut params = vec![QueryParam::from(input.campaign_id.as_str())];
        let mut join = "m.campaign_id = c.campaign_id".to_string();
        if let Some(range) = &input.date_range {
            validate_range(range)?;
            join.push_str(&format!(
                " AND m.date >= {} AND m.date <= {}",
                self.date_param(2),
                self.date_param(3)
            ));
            params.push(range.start.as_str().into());
            params.push(range.end.as_str().into());
        }

        let sql = format!(
            "SELECT {}, {} FROM campaigns c LEFT JOIN metrics m ON {} WHERE c.campaign_id = {} ORDER BY m.date",
            CAMPAIGN_COLUMNS,
            metric_columns(METRIC_PREFIX),
            join,
            self.pool.placeholder(1)
        );
        info!(campaign_id = %input.campaign_id, windowed = input.date_range.is_some(), "Analyzing campaign");

        let rows = self.executor.fetch_all(&self.pool, &sql, &params).await?;
        rows.into_iter()
            .map(|row| {
                let (campaign, metrics) = split_metrics(row)?;
                Ok(CampaignPerformance {
                    campaign: decode(campaign)?,
                    metrics,
                })
            })
            .collect()
    }

    /// An ad group joined with its metrics, newest first.
    pub async fn analyze_ad_group_performance(
        &self,
        input: AdGroupPerformanceInput,
    ) -> AdsResult<Vec<AdGroupPerformance>> {
        let sql = format!(
            "SELECT {}, {} FROM ad_groups g LEFT JOIN metrics m ON m.ad_group_id = g.ad_group_id \
             WHERE g.ad_group_id = {} ORDER BY m.date DESC",
            AD_GROUP_COLUMNS,
            metric_columns(METRIC_PREFIX),
            self.pool.placeholder(1)
        );
        info!(ad_group_id = %input.ad_group_id, "Analyzing ad group");

        let rows = self
            .executor
            .fetch_all(&self.pool, &sql, &[QueryParam::from(input.ad_group_id.as_str())])
            .await?;
        rows.into_iter()
            .map(|row| {
                let (ad_group, metrics) = split_metrics(row)?;
                Ok(AdGroupPerformance {
                    ad_group: decode(ad_group)?,
                    metrics,
                })
            })
            .collect()
    }

    /// One recommendation per campaign of the profile, best ROAS first.
    pub async fn optimize_budget(
        &self,
        input: OptimizeBudgetInput,
    ) -> AdsResult<Vec<BudgetRecommendation>> {
        let sql = format!(
            r#"SELECT c.campaign_id AS "campaignId", c.name AS name,
                      CAST(c.budget AS DOUBLE PRECISION) AS "currentBudget",
                      CAST(AVG(m.roas) AS DOUBLE PRECISION) AS roas
               FROM campaigns c LEFT JOIN metrics m ON m.campaign_id = c.campaign_id
               WHERE c.profile_id = {}
               GROUP BY c.campaign_id, c.name, c.budget"#,
            self.pool.placeholder(1)
        );
        info!(profile_id = %input.profile_id, "Optimizing budget");

        let rows = self
            .executor
            .fetch_all(&self.pool, &sql, &[QueryParam::from(input.profile_id.as_str())])
            .await?;
        let mut rows: Vec<BudgetRow> = rows.into_iter().map(decode).collect::<AdsResult<_>>()?;
        rows.sort_by(|a, b| by_roas_desc(a.roas, b.roas).then_with(|| a.campaign_id.cmp(&b.campaign_id)));

        Ok(rows
            .into_iter()
            .map(|row| BudgetRecommendation {
                recommendation: Recommendation::for_roas(row.roas),
                campaign_id: row.campaign_id,
                name: row.name,
                current_budget: row.current_budget,
                roas: row.roas,
            })
            .collect())
    }

    /// Totals and daily series for a profile over a date window.
    pub async fn analyze_trends(&self, input: TrendsInput) -> AdsResult<Trends> {
        validate_range(&input.date_range)?;
        let sql = format!(
            "SELECT {} FROM metrics m WHERE m.profile_id = {} AND m.date >= {} AND m.date <= {} ORDER BY m.date",
            metric_columns(""),
            self.pool.placeholder(1),
            self.date_param(2),
            self.date_param(3)
        );
        info!(profile_id = %input.profile_id, "Analyzing trends");

        let params = [
            QueryParam::from(input.profile_id.as_str()),
            input.date_range.start.as_str().into(),
            input.date_range.end.as_str().into(),
        ];
        let rows = self.executor.fetch_all(&self.pool, &sql, &params).await?;
        let metrics: Vec<Metric> = rows.into_iter().map(decode).collect::<AdsResult<_>>()?;
        debug!(rows = metrics.len(), "Trend rows fetched");
        Ok(Trends::from_metrics(&metrics))
    }

    /// PostgreSQL compares `date` as TIMESTAMP; SQLite stores ISO text and
    /// compares lexically.
    fn date_param(&self, n: usize) -> String {
        match self.pool.kind() {
            DatabaseKind::Postgres => format!("CAST({} AS TIMESTAMP)", self.pool.placeholder(n)),
            DatabaseKind::Sqlite => self.pool.placeholder(n),
        }
    }
}

const CAMPAIGN_COLUMNS: &str = r#"c.campaign_id AS "campaignId", c.profile_id AS "profileId",
    c.name AS name, c.state AS state, CAST(c.budget AS DOUBLE PRECISION) AS budget,
    CAST(c.start_date AS TEXT) AS "startDate", CAST(c.end_date AS TEXT) AS "endDate""#;

const AD_GROUP_COLUMNS: &str = r#"g.ad_group_id AS "adGroupId", g.campaign_id AS "campaignId",
    g.name AS name, g.state AS state, CAST(g.default_bid AS DOUBLE PRECISION) AS "defaultBid""#;

/// Metrics columns of table alias `m`, aliased to the camelCase field names
/// behind `prefix`.
fn metric_columns(prefix: &str) -> String {
    [
        ("CAST(m.date AS TEXT)", "date"),
        ("m.profile_id", "profileId"),
        ("m.campaign_id", "campaignId"),
        ("m.ad_group_id", "adGroupId"),
        ("CAST(m.impressions AS BIGINT)", "impressions"),
        ("CAST(m.clicks AS BIGINT)", "clicks"),
        ("CAST(m.spend AS DOUBLE PRECISION)", "spend"),
        ("CAST(m.sales AS DOUBLE PRECISION)", "sales"),
        ("CAST(m.acos AS DOUBLE PRECISION)", "acos"),
        ("CAST(m.roas AS DOUBLE PRECISION)", "roas"),
    ]
    .iter()
    .map(|(expr, field)| format!(r#"{} AS "{}{}""#, expr, prefix, field))
    .collect::<Vec<_>>()
    .join(", ")
}

/// Separate the `m_`-prefixed columns of a joined row. A left join miss
/// (NULL metrics date) yields `None`.
fn split_metrics(row: JsonRow) -> AdsResult<(JsonRow, Option<Metric>)> {
    let mut base = JsonRow::new();
    let mut joined = JsonRow::new();
    for (key, value) in row {
        match key.strip_prefix(METRIC_PREFIX) {
            Some(field) => {
                joined.insert(field.to_string(), value);
            }
            None => {
                base.insert(key, value);
            }
        }
    }

    let metrics = match joined.get("date") {
        None | Some(Value::Null) => None,
        Some(_) => Some(decode(joined)?),
    };
    Ok((base, metrics))
}

fn decode<T: DeserializeOwned>(row: JsonRow) -> AdsResult<T> {
    serde_json::from_value(Value::Object(row))
        .map_err(|e| AdsError::internal(format!("Unexpected row shape: {}", e)))
}

fn by_roas_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn validate_range(range: &DateRange) -> AdsResult<()> {
    validate_date("dateRange.start", &range.start)?;
    validate_date("dateRange.end", &range.end)
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` (or with `T`) and RFC 3339.
fn validate_date(field: &str, value: &str) -> AdsResult<()> {
    let valid = NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").is_ok()
        || DateTime::parse_from_rfc3339(value).is_ok();
    if valid {
        Ok(())
    } else {
        Err(AdsError::invalid_input(format!(
            "{} is not a valid date: {}",
            field, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_date_formats() {
        assert!(validate_date("d", "2024-01-31").is_ok());
        assert!(validate_date("d", "2024-01-31 10:00:00").is_ok());
        assert!(validate_date("d", "2024-01-31T10:00:00").is_ok());
        assert!(validate_date("d", "2024-01-31T10:00:00Z").is_ok());
        let err = validate_date("dateRange.start", "last tuesday").unwrap_err();
        assert!(err.to_string().contains("dateRange.start"));
        assert!(validate_date("d", "2024-02-30").is_err());
    }

    #[test]
    fn test_metric_columns_prefix() {
        let columns = metric_columns("m_");
        assert!(columns.contains(r#"CAST(m.roas AS DOUBLE PRECISION) AS "m_roas""#));
        assert!(columns.starts_with(r#"CAST(m.date AS TEXT) AS "m_date""#));
        assert!(!metric_columns("").contains("m_"));
    }

    #[test]
    fn test_split_metrics_left_join_miss() {
        let row = json!({
            "campaignId": "c1",
            "m_date": null,
            "m_impressions": null
        });
        let Value::Object(row) = row else { unreachable!() };
        let (base, metrics) = split_metrics(row).unwrap();
        assert_eq!(base.len(), 1);
        assert!(metrics.is_none());
    }

    #[test]
    fn test_roas_ordering_puts_missing_last() {
        let mut values = vec![None, Some(1.0), Some(3.0), None, Some(2.0)];
        values.sort_by(|a, b| by_roas_desc(*a, *b));
        assert_eq!(values, vec![Some(3.0), Some(2.0), Some(1.0), None, None]);
    }

    #[test]
    fn test_input_field_names() {
        let input: TrendsInput = serde_json::from_value(json!({
            "profileId": "p1",
            "dateRange": {"start": "2024-01-01", "end": "2024-01-31"}
        }))
        .unwrap();
        assert_eq!(input.date_range.end, "2024-01-31");
        assert!(serde_json::from_value::<TrendsInput>(json!({"profileId": "p1"})).is_err());
    }
}
