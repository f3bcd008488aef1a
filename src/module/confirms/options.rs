use crate::library::communication::confirm::PublishStrategy;
use crate::library::helpers::parse_millis;
use crate::module::options::BrokerOptions;
use std::str::FromStr;
use std::time::Duration;
use structopt::StructOpt;
use thiserror::Error;

/// Options for the confirms module
#[derive(Debug, StructOpt)]
pub struct Options {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    /// Number of messages published per strategy
    #[structopt(long, env, default_value = "50000")]
    pub count: usize,

    /// Number of messages published between two waits by the batched strategy
    #[structopt(long, env, default_value = "100")]
    pub batch_size: usize,

    /// Strategies to benchmark
    #[structopt(
        long,
        env,
        default_value = "all",
        value_name = "individual|batched|async|all"
    )]
    pub strategy: StrategySelection,

    /// Maximum duration (in milliseconds) a single wait for confirms may take
    #[structopt(long, env, default_value = "5000", parse(try_from_str = parse_millis))]
    pub confirm_timeout: Duration,

    /// Maximum duration (in milliseconds) to wait for outstanding confirms after publishing
    /// asynchronously
    #[structopt(long, env, default_value = "60000", parse(try_from_str = parse_millis))]
    pub drain_timeout: Duration,
}

/// Publish strategies selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategySelection {
    /// Wait for every publish
    Individual,
    /// Wait for every batch
    Batched,
    /// Wait once at the end
    Async,
    /// Every strategy, one after another
    All,
}

impl StrategySelection {
    /// Strategies to run in order
    pub fn strategies(&self, batch_size: usize) -> Vec<PublishStrategy> {
        match self {
            StrategySelection::Individual => vec![PublishStrategy::Individual],
            StrategySelection::Batched => vec![PublishStrategy::Batched(batch_size)],
            StrategySelection::Async => vec![PublishStrategy::FullyAsync],
            StrategySelection::All => vec![
                PublishStrategy::Individual,
                PublishStrategy::Batched(batch_size),
                PublishStrategy::FullyAsync,
            ],
        }
    }
}

/// Error returned when parsing an unknown [`StrategySelection`]
#[derive(Debug, Error)]
#[error("unknown strategy {0}, expected individual, batched, async or all")]
pub struct ParseSelectionError(String);

impl FromStr for StrategySelection {
    type Err = ParseSelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "individual" => Ok(StrategySelection::Individual),
            "batched" => Ok(StrategySelection::Batched),
            "async" => Ok(StrategySelection::Async),
            "all" => Ok(StrategySelection::All),
            other => Err(ParseSelectionError(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn expand_all_strategies_in_order() {
        let selection: StrategySelection = "all".parse().unwrap();

        assert_eq!(
            selection.strategies(7),
            vec![
                PublishStrategy::Individual,
                PublishStrategy::Batched(7),
                PublishStrategy::FullyAsync
            ]
        );
    }

    #[test]
    fn parse_command_line_defaults() {
        let options = Options::from_iter(vec!["confirms"]);

        assert_eq!(options.count, 50_000);
        assert_eq!(options.batch_size, 100);
        assert_eq!(options.strategy, StrategySelection::All);
        assert_eq!(options.confirm_timeout, Duration::from_secs(5));
        assert_eq!(options.drain_timeout, Duration::from_secs(60));
    }
}
