// Reads a script, from a file or stdin, and feeds it to the engine
// one instruction at a time (spec.md §2 "Driver" — an external
// collaborator of the core engine, included here as the glue a
// runnable binary needs).

use std::fs;
use std::io::Read as _;

use tracing::{error, info};

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::http::SnapshotStore;
use crate::script::{split_statements, Instruction};

pub struct Driver {
    engine: Engine,
    config: EngineConfig,
    snapshot_store: Option<SnapshotStore>,
}

impl Driver {
    pub fn new(config: EngineConfig, snapshot_store: Option<SnapshotStore>) -> Self {
        let engine = Engine::new(&config);
        Self { engine, config, snapshot_store }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Reads the configured script and dispatches every instruction in
    /// order, publishing an HTTP snapshot after each one when enabled.
    pub fn run(&mut self) -> Result<()> {
        let script = self.read_script()?;
        for line in split_statements(&script) {
            match Instruction::parse(&line) {
                Ok(instruction) => {
                    self.engine.dispatch(instruction);
                    if let Some(store) = &self.snapshot_store {
                        crate::http::publish(store, self.engine.site_manager(), self.config.num_sites);
                    }
                }
                Err(err) => error!(%err, line, "skipping malformed instruction"),
            }
        }
        info!("script complete");
        Ok(())
    }

    fn read_script(&self) -> Result<String> {
        if self.config.read_stdin {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        } else {
            let path = self.config.script_path.as_ref().ok_or_else(|| {
                EngineError::ParseError("no script path given and -i not set".to_string())
            })?;
            Ok(fs::read_to_string(path)?)
        }
    }
}
