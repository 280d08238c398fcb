//! Campaign statistics

mod aggregator;

pub use aggregator::{
    percentage, ActivityItem, CampaignStats, CampaignSummary, DeliveryStats, Performance, Rates,
    StatsAggregator, RECENT_ACTIVITY_LIMIT,
};
