pub mod environment;
pub mod report;

pub use environment::{
    Allocation, BacktestEnvironment, BacktestMetrics, EnvConfig, EnvStatus, PortfolioState,
    StepInfo, StepOutcome,
};
pub use report::BacktestReport;
