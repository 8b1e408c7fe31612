pub mod association;
pub mod contingency;
pub mod describe;
pub mod filter;
pub mod proportion;
pub mod ttest;

pub use association::odds_risk_ratio;
pub use contingency::chi_square;
pub use describe::describe;
pub use proportion::proportion;
pub use ttest::ttest;
