use crate::library::communication::request::FailurePolicy;
use crate::module::options::BrokerOptions;
use structopt::StructOpt;

/// Options for the server module
#[derive(Debug, StructOpt)]
pub struct Options {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    /// Queue requests are consumed from
    #[structopt(long, env, default_value = "rpc_queue")]
    pub queue: String,

    /// Maximum number of requests processed concurrently
    #[structopt(long, env, default_value = "1")]
    pub prefetch: usize,

    /// What to do with requests whose computation failed
    ///
    /// `reply` sends a failure reply to the caller, `requeue` returns the request to the queue
    /// without replying
    #[structopt(long, env, default_value = "reply", value_name = "reply|requeue")]
    pub on_failure: FailurePolicy,
}
