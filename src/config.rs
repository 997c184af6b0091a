use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Scoring constants for the rename heuristic detector.
///
/// These are empirical constants with no derivation from first
/// principles, so they are carried as configuration rather than
/// hard-coded. The defaults are the tuned production values.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RenameScoring {
    /// Candidates scoring below this are treated as unrelated delete+add.
    pub threshold: u32,
    /// Granted for a compatible abstract type.
    pub base_type_match: u32,
    /// Granted per matching `required`/`unique`/`private` flag.
    pub flag_bonus: u32,
    /// Relations: granted for an identical target.
    pub relation_target_bonus: u32,
    /// Relations: granted for an identical cardinality.
    pub relation_cardinality_bonus: u32,
    /// Components: granted for an identical component reference.
    pub component_ref_bonus: u32,
    /// Components: granted for a matching `repeatable` flag.
    pub component_repeatable_bonus: u32,
    /// Text-like scalars: granted per matching length bound.
    pub length_bonus: u32,
}

impl RenameScoring {
    pub const MAX_SCORE: u32 = 100;
}

impl Default for RenameScoring {
    fn default() -> Self {
        RenameScoring {
            threshold: 60,
            base_type_match: 40,
            flag_bonus: 10,
            relation_target_bonus: 20,
            relation_cardinality_bonus: 15,
            component_ref_bonus: 30,
            component_repeatable_bonus: 5,
            length_bonus: 5,
        }
    }
}

/// Engine configuration, constructed once per boot and passed by
/// reference into the migrator. There is deliberately no process-wide
/// config global.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub rename: RenameScoring,
    /// Force the rebuild-only alteration strategy even where the storage
    /// engine could alter in place (pre-3.25 SQLite compatibility).
    pub legacy_alter: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            rename: RenameScoring::default(),
            legacy_alter: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration by layering an optional TOML file and
    /// `SCHEMASYNC_`-prefixed environment variables over the defaults.
    /// Invalid values fall back to defaults rather than failing boot.
    pub fn load(config_path: Option<&Path>) -> Self {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("SCHEMASYNC_"));

        let mut config: EngineConfig = match figment.extract() {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Config error: {err} - using defaults");
                EngineConfig::default()
            }
        };

        config.ensure_valid();
        config
    }

    fn ensure_valid(&mut self) {
        if self.rename.threshold > RenameScoring::MAX_SCORE {
            eprintln!(
                "Config error: rename threshold of {} exceeds the maximum score - using {}",
                self.rename.threshold,
                RenameScoring::MAX_SCORE
            );
            self.rename.threshold = RenameScoring::MAX_SCORE;
        }
    }
}
