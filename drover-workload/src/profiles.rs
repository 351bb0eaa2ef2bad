//! Scenario profiles.
//!
//! A profile bundles everything a run needs: workload shape, broker
//! endpoints, consumer group settings, how long to run and how strictly to
//! judge delivery. Profiles are plain TOML, so custom scenarios can be kept
//! next to the cluster they target.
//!
//! # Example
//!
//! ```ignore
//! use drover_workload::profiles::{load_profile, ScenarioProfile};
//!
//! // Load a named profile
//! let profile = load_profile("single-writer").unwrap();
//!
//! // Or load from a TOML file
//! let profile = ScenarioProfile::from_file("soak.toml").unwrap();
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::iteration::HarnessConfig;
use crate::plan::WorkloadSpec;
use crate::run::ExecutionPlan;
use crate::schema::SchemaType;
use crate::validation::DeliveryPolicy;

/// Workload shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Messages consumed across all workers per iteration.
    pub total_messages: u64,
    /// Number of concurrent workers.
    pub workers: u32,
    /// Messages per produce call.
    pub batch_size: u32,
    /// Only worker 1 produces when set.
    pub single_producer: bool,
    /// Fixed production quota per worker (multi-producer only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages_per_producer: Option<u64>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            total_messages: 100,
            workers: 1,
            batch_size: 10,
            single_producer: true,
            messages_per_producer: None,
        }
    }
}

/// Producer-side broker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Bootstrap servers.
    pub brokers: Vec<String>,
    /// Topic every worker writes to and reads from.
    pub topic: String,
    /// Required acks (-1 = all, 0 = none, 1 = leader).
    pub required_acks: i32,
    /// Delivery attempts per message, including the first.
    pub max_attempts: u32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: "drover-topic".to_string(),
            required_acks: -1,
            max_attempts: 3,
        }
    }
}

/// Consumer-side broker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Consumer group shared by all workers.
    pub group_id: String,
    /// Offset auto-commit interval in milliseconds.
    pub commit_interval_ms: u64,
    /// Group heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// How long one consume call waits for its quota, in milliseconds.
    pub consume_timeout_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: "drover-group".to_string(),
            commit_interval_ms: 700,
            heartbeat_interval_ms: 2300,
            consume_timeout_ms: 10_000,
        }
    }
}

/// How long a run lasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Iterations per worker.
    pub iterations: u32,
    /// Keep iterating until this many seconds have elapsed (overrides
    /// `iterations`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            duration_secs: None,
        }
    }
}

/// How results are judged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Severity of a short delivery.
    pub policy: DeliveryPolicy,
    /// Encoding of message values.
    pub schema: SchemaType,
    /// Whether to compare first/last values end to end.
    pub round_trip: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            policy: DeliveryPolicy::Strict,
            schema: SchemaType::String,
            round_trip: true,
        }
    }
}

/// A complete scenario profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioProfile {
    /// Profile name.
    pub name: String,
    /// What the scenario exercises.
    pub description: String,
    /// Workload shape.
    pub workload: WorkloadConfig,
    /// Producer settings.
    pub producer: ProducerConfig,
    /// Consumer settings.
    pub consumer: ConsumerConfig,
    /// Run length.
    pub execution: ExecutionConfig,
    /// Result judging.
    pub validation: ValidationConfig,
}

impl Default for ScenarioProfile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            description: "Default scenario profile".to_string(),
            workload: WorkloadConfig::default(),
            producer: ProducerConfig::default(),
            consumer: ConsumerConfig::default(),
            execution: ExecutionConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl ScenarioProfile {
    /// Load a profile from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProfileError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ProfileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse a profile from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML cannot be parsed.
    pub fn from_toml(toml: &str) -> Result<Self, ProfileError> {
        toml::from_str(toml).map_err(|e| ProfileError::Parse {
            message: e.to_string(),
        })
    }

    /// Serialize the profile to a TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Builds the workload spec.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpec` if the workload section is out of bounds.
    pub fn to_spec(&self) -> drover_core::Result<WorkloadSpec> {
        let w = &self.workload;
        let mut builder = WorkloadSpec::builder()
            .total_messages(w.total_messages)
            .workers(w.workers)
            .batch_size(w.batch_size)
            .single_producer(w.single_producer);
        if let Some(count) = w.messages_per_producer {
            builder = builder.messages_per_producer(count);
        }
        builder.build()
    }

    /// Settings shared by every worker of the run.
    #[must_use]
    pub fn harness_config(&self) -> HarnessConfig {
        HarnessConfig {
            schema: self.validation.schema,
            policy: self.validation.policy,
            consume_timeout: Duration::from_millis(self.consumer.consume_timeout_ms),
            round_trip: self.validation.round_trip,
        }
    }

    /// How long the run lasts.
    #[must_use]
    pub fn execution_plan(&self) -> ExecutionPlan {
        ExecutionPlan {
            iterations: self.execution.iterations,
            duration: self.execution.duration_secs.map(Duration::from_secs),
        }
    }

    /// Client settings for a real cluster.
    #[cfg(feature = "kafka")]
    #[must_use]
    pub fn kafka_settings(&self) -> crate::broker::KafkaSettings {
        crate::broker::KafkaSettings {
            brokers: self.producer.brokers.clone(),
            group_id: self.consumer.group_id.clone(),
            required_acks: self.producer.required_acks,
            max_attempts: self.producer.max_attempts,
            commit_interval: Duration::from_millis(self.consumer.commit_interval_ms),
            heartbeat_interval: Duration::from_millis(self.consumer.heartbeat_interval_ms),
            ..crate::broker::KafkaSettings::default()
        }
    }
}

/// Error type for profile operations.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    /// I/O error reading profile file.
    #[error("failed to read profile from {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Parse error in TOML.
    #[error("failed to parse profile: {message}")]
    Parse {
        /// Error message.
        message: String,
    },
    /// Profile not found.
    #[error("profile not found: {name}")]
    NotFound {
        /// Profile name.
        name: String,
    },
}

impl ProfileError {
    /// Returns the numeric error code.
    #[must_use]
    pub const fn error_code(&self) -> i16 {
        match self {
            Self::Io { .. } => -10,
            Self::Parse { .. } => -11,
            Self::NotFound { .. } => -12,
        }
    }
}

/// Three producers on a live cluster for hours; each writes nine batches and
/// reads back up to ninety messages from the shared group.
fn batched_soak() -> ScenarioProfile {
    ScenarioProfile {
        name: "batched-soak".to_string(),
        description: "Multi-producer batched soak test against a live cluster".to_string(),
        workload: WorkloadConfig {
            total_messages: 270,
            workers: 3,
            batch_size: 10,
            single_producer: false,
            messages_per_producer: Some(90),
        },
        producer: ProducerConfig {
            brokers: vec!["localhost:9091".to_string()],
            topic: "topic1".to_string(),
            required_acks: 1,
            max_attempts: 3,
        },
        consumer: ConsumerConfig {
            group_id: "topic1-group".to_string(),
            ..ConsumerConfig::default()
        },
        execution: ExecutionConfig {
            iterations: 1,
            duration_secs: Some(3 * 60 * 60),
        },
        // Group members read each other's values, so only counts are judged.
        validation: ValidationConfig {
            policy: DeliveryPolicy::Lenient,
            round_trip: false,
            ..ValidationConfig::default()
        },
    }
}

/// Worker 1 writes a thousand single-message batches; all three workers
/// read their share.
fn single_writer() -> ScenarioProfile {
    ScenarioProfile {
        name: "single-writer".to_string(),
        description: "One writer, three readers splitting its output".to_string(),
        workload: WorkloadConfig {
            total_messages: 1000,
            workers: 3,
            batch_size: 1,
            single_producer: true,
            messages_per_producer: None,
        },
        producer: ProducerConfig {
            brokers: vec!["kafka-bootsrap-1:9001".to_string()],
            topic: "my-topic".to_string(),
            ..ProducerConfig::default()
        },
        consumer: ConsumerConfig {
            group_id: "my-topic-group".to_string(),
            ..ConsumerConfig::default()
        },
        execution: ExecutionConfig {
            iterations: 3,
            duration_secs: None,
        },
        validation: ValidationConfig::default(),
    }
}

fn smoke() -> ScenarioProfile {
    ScenarioProfile {
        name: "smoke".to_string(),
        description: "Quick sanity check with a single worker".to_string(),
        consumer: ConsumerConfig {
            consume_timeout_ms: 2_000,
            ..ConsumerConfig::default()
        },
        ..ScenarioProfile::default()
    }
}

/// Built-in scenario profiles.
#[must_use]
pub fn builtin_profiles() -> HashMap<&'static str, ScenarioProfile> {
    HashMap::from([
        ("batched-soak", batched_soak()),
        ("single-writer", single_writer()),
        ("smoke", smoke()),
    ])
}

/// Load a built-in profile by name.
///
/// # Errors
///
/// Returns an error if the profile name is not found.
pub fn load_profile(name: &str) -> Result<ScenarioProfile, ProfileError> {
    builtin_profiles()
        .remove(name)
        .ok_or_else(|| ProfileError::NotFound {
            name: name.to_string(),
        })
}

/// List all available built-in profile names.
#[must_use]
pub fn list_profiles() -> Vec<&'static str> {
    let mut names: Vec<_> = builtin_profiles().keys().copied().collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::WorkerId;

    #[test]
    fn test_default_profile() {
        let profile = ScenarioProfile::default();
        assert_eq!(profile.workload.workers, 1);
        assert_eq!(profile.validation.policy, DeliveryPolicy::Strict);
    }

    #[test]
    fn test_builtin_profiles() {
        assert_eq!(list_profiles(), vec!["batched-soak", "single-writer", "smoke"]);
        for (name, profile) in builtin_profiles() {
            assert_eq!(profile.name, name);
            assert!(profile.to_spec().is_ok(), "{name}");
        }
    }

    #[test]
    fn test_single_writer_quotas() {
        let spec = load_profile("single-writer").unwrap().to_spec().unwrap();
        let quotas = crate::plan::plan(&spec).unwrap();

        assert_eq!(quotas[&WorkerId::FIRST].produce_count, 1000);
        let consume: Vec<u64> = quotas.values().map(|q| q.consume_count).collect();
        assert_eq!(consume, vec![334, 333, 333]);
    }

    #[test]
    fn test_batched_soak_settings() {
        let profile = load_profile("batched-soak").unwrap();
        let spec = profile.to_spec().unwrap();
        let quotas = crate::plan::plan(&spec).unwrap();
        assert!(quotas.values().all(|q| q.produce_count == 90 && q.consume_count == 90));

        let plan = profile.execution_plan();
        assert_eq!(plan.duration, Some(Duration::from_secs(10_800)));

        let config = profile.harness_config();
        assert_eq!(config.policy, DeliveryPolicy::Lenient);
        assert!(!config.round_trip);
        assert_eq!(profile.consumer.commit_interval_ms, 700);
        assert_eq!(profile.consumer.heartbeat_interval_ms, 2300);
    }

    #[test]
    fn test_profile_not_found() {
        let result = load_profile("nonexistent");
        assert!(matches!(result, Err(ProfileError::NotFound { .. })));
        assert_eq!(result.unwrap_err().error_code(), -12);
    }

    #[test]
    fn test_toml_roundtrip() {
        for name in list_profiles() {
            let profile = load_profile(name).unwrap();
            let parsed = ScenarioProfile::from_toml(&profile.to_toml()).unwrap();
            assert_eq!(parsed, profile);
        }
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let profile = ScenarioProfile::from_toml(
            r#"
            name = "custom"

            [workload]
            total_messages = 60
            workers = 2

            [validation]
            policy = "lenient"
            schema = "json"
            "#,
        )
        .unwrap();

        assert_eq!(profile.workload.total_messages, 60);
        assert_eq!(profile.workload.batch_size, 10);
        assert_eq!(profile.validation.policy, DeliveryPolicy::Lenient);
        assert_eq!(profile.validation.schema, SchemaType::Json);
        assert!(profile.validation.round_trip);
        assert_eq!(profile.producer.topic, "drover-topic");
    }

    #[test]
    fn test_invalid_toml() {
        let result = ScenarioProfile::from_toml("workload = 3");
        assert!(matches!(result, Err(ProfileError::Parse { .. })));
    }

    #[test]
    fn test_invalid_workload_rejected() {
        let mut profile = ScenarioProfile::default();
        profile.workload.workers = 0;
        assert!(profile.to_spec().is_err());
    }
}
