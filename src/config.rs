// Engine configuration.
//
// Defaults match the fixed configuration in spec.md §6: 10 sites, 20
// variables. All fields are overridable from the command line (see
// `main.rs`).

/// Default base port for the optional per-site HTTP status endpoint.
/// Site `i` is served on `BASE_PORT + 20 * i`.
pub const DEFAULT_BASE_PORT: u16 = 9000;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Script path, or `None` when instructions are read from stdin.
    pub script_path: Option<String>,
    /// Number of sites (spec default: 10).
    pub num_sites: usize,
    /// Number of variables (spec default: 20).
    pub num_variables: usize,
    /// Optional output log file path; stdout is used when absent.
    pub output_path: Option<String>,
    /// Expose each site's state over HTTP at `BASE_PORT + 20*i`.
    pub expose_http: bool,
    /// Base port used when `expose_http` is set.
    pub base_port: u16,
    /// Read instructions from stdin instead of `script_path`.
    pub read_stdin: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            script_path: None,
            num_sites: 10,
            num_variables: 20,
            output_path: None,
            expose_http: false,
            base_port: DEFAULT_BASE_PORT,
            read_stdin: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = EngineConfig::default();
        assert_eq!(config.num_sites, 10);
        assert_eq!(config.num_variables, 20);
        assert!(!config.expose_http);
        assert!(!config.read_stdin);
    }
}
