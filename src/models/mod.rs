pub mod decision;
pub mod macro_data;
pub mod price;
pub mod regime;
pub mod sector;

pub use decision::{AllocationDecision, AssetClassSplit, DecisionRow};
pub use macro_data::MacroSnapshot;
pub use price::{PricePoint, PriceSeries, PriceTable};
pub use regime::{MovingAverages, Regime, RegimeResult};
pub use sector::{Sector, SectorWeights};
