//! Market structure analysis: trend classification and chart patterns

pub mod patterns;
pub mod trend;

pub use patterns::{
    DoublePeak, Formation, HeadAndShoulders, Pattern, PatternConfig, PatternDetector, PatternKind,
    Rectangle,
};
pub use trend::{majority_vote, Trend, TrendClassifier};
