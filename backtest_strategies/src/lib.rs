pub mod rolling;
pub mod sma;
pub mod pairs;

pub use pairs::{PairsParams, PairsTrading, SpreadKind};
pub use sma::{SmaCrossover, SmaParams};
