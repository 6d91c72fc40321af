pub mod device;
pub mod price;
pub mod recommendation;
pub mod state;

pub use device::{Device, PerDevice};
pub use price::{Classification, PricePoint, PriceWindowStats};
pub use recommendation::{
    BatteryMode, DecisionSource, DeviceDecision, OptimizationStatus, Recommendation,
};
pub use state::SystemState;
