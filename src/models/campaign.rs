//! Campaign analytics models.
//!
//! Row types deserialize from the JSON rows produced by the query executor;
//! report types are what the analysis tools return.

use serde::{Deserialize, Serialize};

/// Inclusive date window. Values are ISO dates or RFC 3339 timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DateRange {
    /// Start date, e.g. "2024-01-01"
    pub start: String,
    /// End date, e.g. "2024-01-31"
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub campaign_id: String,
    pub profile_id: Option<String>,
    pub name: String,
    pub state: String,
    pub budget: f64,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdGroup {
    pub ad_group_id: String,
    pub campaign_id: Option<String>,
    pub name: String,
    pub state: String,
    pub default_bid: Option<f64>,
}

/// One daily metrics row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub date: String,
    pub profile_id: Option<String>,
    pub campaign_id: Option<String>,
    pub ad_group_id: Option<String>,
    pub impressions: i64,
    pub clicks: i64,
    pub spend: f64,
    pub sales: f64,
    pub acos: Option<f64>,
    pub roas: Option<f64>,
}

/// A campaign joined with one of its metrics rows (absent when the campaign
/// has no metrics).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignPerformance {
    pub campaign: Campaign,
    pub metrics: Option<Metric>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdGroupPerformance {
    pub ad_group: AdGroup,
    pub metrics: Option<Metric>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Recommendation {
    #[serde(rename = "Increase budget")]
    Increase,
    #[serde(rename = "Decrease budget")]
    Decrease,
    #[serde(rename = "Maintain budget")]
    Maintain,
}

impl Recommendation {
    /// ROAS above 2 earns more budget, below 1 less. A campaign without
    /// ROAS data counts as 0.
    pub fn for_roas(roas: Option<f64>) -> Self {
        let roas = roas.unwrap_or(0.0);
        if roas > 2.0 {
            Self::Increase
        } else if roas < 1.0 {
            Self::Decrease
        } else {
            Self::Maintain
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetRecommendation {
    pub campaign_id: String,
    pub name: String,
    pub current_budget: f64,
    /// Mean ROAS over the campaign's metrics rows
    pub roas: Option<f64>,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyValue<T> {
    pub date: String,
    pub value: T,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalSeries<T> {
    pub total: T,
    pub daily: Vec<DailyValue<T>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AverageSeries {
    /// `None` when the window holds no rows
    pub average: Option<f64>,
    pub daily: Vec<DailyValue<Option<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trends {
    pub impressions: TotalSeries<i64>,
    pub clicks: TotalSeries<i64>,
    pub spend: TotalSeries<f64>,
    pub roas: AverageSeries,
}

fn daily<T>(rows: &[Metric], value: impl Fn(&Metric) -> T) -> Vec<DailyValue<T>> {
    rows.iter()
        .map(|m| DailyValue {
            date: m.date.clone(),
            value: value(m),
        })
        .collect()
}

impl Trends {
    /// Fold date-ordered metrics rows into totals and daily series.
    pub fn from_metrics(rows: &[Metric]) -> Self {
        let roas_sum: f64 = rows.iter().map(|m| m.roas.unwrap_or(0.0)).sum();
        let average = (!rows.is_empty()).then(|| roas_sum / rows.len() as f64);

        Self {
            impressions: TotalSeries {
                total: rows.iter().map(|m| m.impressions).sum(),
                daily: daily(rows, |m| m.impressions),
            },
            clicks: TotalSeries {
                total: rows.iter().map(|m| m.clicks).sum(),
                daily: daily(rows, |m| m.clicks),
            },
            spend: TotalSeries {
                total: rows.iter().map(|m| m.spend).sum(),
                daily: daily(rows, |m| m.spend),
            },
            roas: AverageSeries {
                average,
                daily: daily(rows, |m| m.roas),
            },
        }
    }
}
