//! Data models for the ads MCP server.

pub mod campaign;
pub mod user;

pub use campaign::{
    AdGroup, AdGroupPerformance, BudgetRecommendation, Campaign, CampaignPerformance, DateRange,
    Metric, Recommendation, Trends,
};
pub use user::User;
