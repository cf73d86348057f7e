//! Command-line surface: `--config <path>`, `--debug`, `--version`.

use std::path::PathBuf;

use bpaf::Bpaf;

const DEFAULT_CONFIG_PATH: &str = "/etc/roomwatch/config.yaml";

#[derive(Bpaf, Debug, Clone)]
#[bpaf(options, version(env!("CARGO_PKG_VERSION")))]
pub struct Args {
    /// Path to the YAML config file.
    #[bpaf(long, short, argument("PATH"), fallback(DEFAULT_CONFIG_PATH.into()))]
    pub config: PathBuf,

    /// Enable debug-level logging.
    #[bpaf(long)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    #[test]
    fn bpaf_invariants() {
        super::args().check_invariants(false);
    }
}
