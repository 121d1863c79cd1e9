use std::env;

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` applies unless verbose
/// output was requested.
pub fn init(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn env_flag() -> bool {
    env::var("FORMFILL_VERBOSE")
        .map(|value| parse_bool(value.trim()))
        .unwrap_or(false)
}

pub fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for yes in ["1", "true", "YES", " on "] {
            assert!(parse_bool(yes), "{yes}");
        }
        for no in ["0", "false", "", "maybe"] {
            assert!(!parse_bool(no), "{no}");
        }
    }
}
