pub mod discretizer;
pub mod q_agent;
pub mod replay;

pub use discretizer::{FirstComponentDiscretizer, StateDiscretizer};
pub use q_agent::{ActionMapper, AgentConfig, OverweightMapper, RLAgent, TrainOptions, TrainingStats};
pub use replay::{ReplayBuffer, ReplayRecord};
