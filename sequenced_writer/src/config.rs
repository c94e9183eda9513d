//! Config surface, following `clap_blocks`' one-struct-per-concern pattern: every field is
//! settable from the command line or its matching environment variable.

use clap::Parser;

/// Runtime configuration for a [`crate::SequencedWriter`].
#[derive(Debug, Clone, Parser)]
pub struct Config {
    /// Identifier of this process, recorded as the `node` field of every key this process
    /// writes. Must be stable across restarts for sequence markers to remain meaningful.
    #[clap(long = "node-id", env = "NODE_ID")]
    pub node_id: String,

    /// Number of offset-collision retries a mutating operation tolerates before failing with
    /// `exhausted_retries`.
    #[clap(long = "retry-budget", env = "RETRY_BUDGET", default_value = "5")]
    pub retry_budget: u32,

    /// Number of Store replicas (one coordinator plus `n - 1` followers). Mutating operations
    /// always run on replica 0.
    #[clap(long = "num-shards", env = "NUM_SHARDS", default_value = "1")]
    pub num_shards: usize,

    /// Logging output format and filter directives, shared with every other binary in the
    /// workspace.
    #[clap(flatten)]
    pub logging: trogging::LoggingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_id_from_args() {
        test_helpers::maybe_start_logging();
        let config = Config::parse_from(["sequenced-writer", "--node-id", "node-a"]);
        assert_eq!(config.node_id, "node-a");
        assert_eq!(config.retry_budget, 5);
        assert_eq!(config.num_shards, 1);
    }

    #[test]
    fn retry_budget_overridable() {
        test_helpers::maybe_start_logging();
        let config = Config::parse_from([
            "sequenced-writer",
            "--node-id",
            "node-a",
            "--retry-budget",
            "10",
        ]);
        assert_eq!(config.retry_budget, 10);
    }
}
