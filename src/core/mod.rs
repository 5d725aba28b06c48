pub mod allocation;
pub mod indicators;
pub mod regime;
pub mod risk;

pub use allocation::{MegaLayerTable, MegaWeights, RegimeTilts, SectorAllocator, Tilt};
pub use regime::{RegimeConfig, RegimeDetector};
pub use risk::{RiskConfig, RiskManager, RiskMetrics, VarMethod};
