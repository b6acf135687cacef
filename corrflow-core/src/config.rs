//! Process configuration: execution mode, correlation sets, session starters.
//!
//! Loaded once (usually from YAML) and shared read-only through `Arc` for the
//! lifetime of the engine.

use crate::path::{PathError, VariablePath};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Exactly one implicit session.
    Single,
    /// Any number of sessions, told apart by correlation.
    #[default]
    Concurrent,
}

/// How correlation compares session and message values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqualityMode {
    /// Type-insensitive: `"42"` matches `42`.
    #[default]
    Loose,
    /// Types must agree as well as values.
    Strict,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("bad {side} path for operation '{operation}' in set '{set}': {source}")]
    Path {
        set: String,
        operation: String,
        side: &'static str,
        #[source]
        source: PathError,
    },

    #[error("operation '{operation}' is bound to both '{first}' and '{second}'")]
    DuplicateBinding {
        operation: String,
        first: String,
        second: String,
    },

    #[error("correlation set '{set}' declares no pairs for operation '{operation}'")]
    EmptyPairs { set: String, operation: String },

    #[error("duplicate correlation set name '{0}'")]
    DuplicateSet(String),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Yaml(_) => "CONFIG_YAML",
            Self::Path { .. } => "CONFIG_PATH",
            Self::DuplicateBinding { .. } => "CONFIG_DUPLICATE_BINDING",
            Self::EmptyPairs { .. } => "CONFIG_EMPTY_PAIRS",
            Self::DuplicateSet(_) => "CONFIG_DUPLICATE_SET",
        }
    }
}

/// One matching rule: the value at `session_path` in the session state must
/// equal the value at `message_path` in the message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationPair {
    pub session_path: VariablePath,
    pub message_path: VariablePath,
}

impl CorrelationPair {
    pub fn new(session_path: VariablePath, message_path: VariablePath) -> Self {
        Self {
            session_path,
            message_path,
        }
    }
}

/// A named set of per-operation pair lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationSet {
    name: String,
    operations: BTreeMap<String, Vec<CorrelationPair>>,
}

impl CorrelationSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: BTreeMap::new(),
        }
    }

    /// Bind `operation` to `pairs`. Replaces an earlier binding in this set.
    pub fn with_operation(
        mut self,
        operation: impl Into<String>,
        pairs: Vec<CorrelationPair>,
    ) -> Self {
        self.operations.insert(operation.into(), pairs);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pairs_for(&self, operation: &str) -> Option<&[CorrelationPair]> {
        self.operations.get(operation).map(Vec::as_slice)
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }
}

// ── YAML format for deserialization ──

#[derive(Debug, Deserialize)]
struct ProcessConfigYaml {
    #[serde(default)]
    execution: ExecutionMode,
    #[serde(default)]
    equality: EqualityMode,
    #[serde(default)]
    starters: Vec<String>,
    #[serde(default)]
    correlation_sets: Vec<CorrelationSetYaml>,
}

#[derive(Debug, Deserialize)]
struct CorrelationSetYaml {
    name: String,
    #[serde(default)]
    operations: BTreeMap<String, Vec<CorrelationPairYaml>>,
}

#[derive(Debug, Deserialize)]
struct CorrelationPairYaml {
    session: String,
    message: String,
}

/// Immutable process configuration.
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    execution_mode: ExecutionMode,
    equality: EqualityMode,
    correlation_sets: Vec<CorrelationSet>,
    starters: BTreeSet<String>,
    /// operation → index into `correlation_sets`.
    by_operation: HashMap<String, usize>,
}

impl ProcessConfig {
    pub fn new(execution_mode: ExecutionMode) -> Self {
        Self {
            execution_mode,
            ..Self::default()
        }
    }

    pub fn with_equality(mut self, equality: EqualityMode) -> Self {
        self.equality = equality;
        self
    }

    pub fn with_starter(mut self, operation: impl Into<String>) -> Self {
        self.starters.insert(operation.into());
        self
    }

    /// Add a correlation set. Each operation may be bound by one set only,
    /// and every binding must declare at least one pair.
    pub fn with_correlation_set(mut self, set: CorrelationSet) -> Result<Self, ConfigError> {
        if self.correlation_sets.iter().any(|s| s.name == set.name) {
            return Err(ConfigError::DuplicateSet(set.name));
        }
        let index = self.correlation_sets.len();
        for (operation, pairs) in &set.operations {
            if pairs.is_empty() {
                return Err(ConfigError::EmptyPairs {
                    set: set.name.clone(),
                    operation: operation.clone(),
                });
            }
            if let Some(&existing) = self.by_operation.get(operation) {
                return Err(ConfigError::DuplicateBinding {
                    operation: operation.clone(),
                    first: self.correlation_sets[existing].name.clone(),
                    second: set.name.clone(),
                });
            }
            self.by_operation.insert(operation.clone(), index);
        }
        self.correlation_sets.push(set);
        Ok(self)
    }

    /// Parse and validate a YAML document.
    ///
    /// ```yaml
    /// execution: concurrent
    /// equality: loose
    /// starters: [openQuote]
    /// correlation_sets:
    ///   - name: quote
    ///     operations:
    ///       getQuote:
    ///         - { session: id, message: reqId }
    /// ```
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let raw: ProcessConfigYaml = serde_yaml::from_str(yaml)?;
        let mut config = ProcessConfig::new(raw.execution).with_equality(raw.equality);
        for operation in raw.starters {
            config = config.with_starter(operation);
        }
        for raw_set in raw.correlation_sets {
            let mut set = CorrelationSet::new(raw_set.name.clone());
            for (operation, raw_pairs) in raw_set.operations {
                let pairs = raw_pairs
                    .into_iter()
                    .map(|p| -> Result<CorrelationPair, ConfigError> {
                        let path_err = |side: &'static str| {
                            let (set, operation) = (raw_set.name.clone(), operation.clone());
                            move |source| ConfigError::Path {
                                set,
                                operation,
                                side,
                                source,
                            }
                        };
                        Ok(CorrelationPair::new(
                            p.session.parse().map_err(path_err("session"))?,
                            p.message.parse().map_err(path_err("message"))?,
                        ))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                set = set.with_operation(operation, pairs);
            }
            config = config.with_correlation_set(set)?;
        }
        Ok(config)
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    pub fn equality(&self) -> EqualityMode {
        self.equality
    }

    pub fn has_correlation_sets(&self) -> bool {
        !self.correlation_sets.is_empty()
    }

    pub fn correlation_sets(&self) -> &[CorrelationSet] {
        &self.correlation_sets
    }

    /// The set that binds `operation`, if any.
    pub fn correlation_set_for(&self, operation: &str) -> Option<&CorrelationSet> {
        self.by_operation
            .get(operation)
            .map(|&index| &self.correlation_sets[index])
    }

    pub fn is_starter(&self, operation: &str) -> bool {
        self.starters.contains(operation)
    }
}
