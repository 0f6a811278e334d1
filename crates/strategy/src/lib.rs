pub mod config;
pub mod indicators;
pub mod listing_backrun;
pub mod mrat_zscore;
pub mod rsi_daily;

pub use config::{
    ListingBackrunParams, MratZscoreParams, RsiDailyParams, StrategyConfig, StrategyFileConfig,
    StrategyParams, TradingParams,
};
pub use listing_backrun::ListingBackrunEvaluator;
pub use mrat_zscore::MratZscoreEvaluator;
pub use rsi_daily::RsiDailyEvaluator;

/// Signal evaluator dispatched by the `kind` tag of the strategy config.
///
/// Each variant pairs an `enrich` step (indicator columns over a snapshot)
/// with an `evaluate` step (snapshot + indicators -> decision). Both are pure
/// over their inputs: no exchange calls happen inside evaluation.
#[derive(Clone)]
pub enum Evaluator {
    MratZscore(MratZscoreEvaluator),
    ListingBackrun(ListingBackrunEvaluator),
    RsiDaily(RsiDailyEvaluator),
}

impl Evaluator {
    pub fn from_params(params: &StrategyParams) -> Self {
        match params {
            StrategyParams::MratZscore(p) => {
                Evaluator::MratZscore(MratZscoreEvaluator::new(p.clone()))
            }
            StrategyParams::ListingBackrun(p) => {
                Evaluator::ListingBackrun(ListingBackrunEvaluator::new(p.clone()))
            }
            StrategyParams::RsiDaily(p) => Evaluator::RsiDaily(RsiDailyEvaluator::new(p.clone())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Evaluator::MratZscore(_) => "mrat_zscore",
            Evaluator::ListingBackrun(_) => "listing_backrun",
            Evaluator::RsiDaily(_) => "rsi_daily",
        }
    }
}
