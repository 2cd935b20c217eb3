pub mod env_checker;
pub mod provider;
pub mod proxy;
pub mod usage_stats;

pub use env_checker::{check_env_conflicts, EnvConflict, EnvSource};
pub use provider::{ConnectionTestResult, ProviderService};
pub use proxy::ProxyService;
pub use usage_stats::{
    DailyStats, LogFilters, PaginatedLogs, UsageAggregate, UsageStatsService, UsageSummary,
};
