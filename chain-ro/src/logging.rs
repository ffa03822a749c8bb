use anyhow::Result as AnyResult;
use structopt::StructOpt;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Clone, Debug, StructOpt, PartialEq)]
pub struct LogOptions {
    /// Log filter, using the `tracing_subscriber::EnvFilter` syntax, e.g.
    /// `chain_ro=debug,chain_ro_core=info`.
    #[structopt(long, env = "RUST_LOG", default_value = "info")]
    log_filter: String,

    /// Render logs as JSON instead of the default human-readable format.
    #[structopt(long, env = "LOG_JSON")]
    log_json: bool,
}

impl LogOptions {
    pub fn init(&mut self) -> AnyResult<()> {
        let filter = EnvFilter::try_new(&self.log_filter)?;
        let subscriber = FmtSubscriber::builder().with_env_filter(filter);
        if self.log_json {
            subscriber.json().try_init()?;
        } else {
            subscriber.try_init()?;
        }
        Ok(())
    }
}
