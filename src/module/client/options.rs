use crate::library::helpers::parse_millis;
use crate::module::options::BrokerOptions;
use std::time::Duration;
use structopt::StructOpt;

/// Options for the client module
#[derive(Debug, StructOpt)]
pub struct Options {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    /// Number whose Fibonacci number is requested
    #[structopt(default_value = "30")]
    pub n: u64,

    /// Queue requests are sent to
    #[structopt(long, env, default_value = "rpc_queue")]
    pub queue: String,

    /// Maximum duration (in milliseconds) to wait for the reply
    #[structopt(
        long,
        env = "CALL_TIMEOUT",
        default_value = "30000",
        parse(try_from_str = parse_millis)
    )]
    pub timeout: Duration,
}
