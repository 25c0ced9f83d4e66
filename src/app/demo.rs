//! Built-in steps and the pipelines the binary can run

use crate::pipeline::{
    Payload, PipelineDefinition, PipelineRegistry, ProcessingError, RegistryResult, Step,
    StepContext,
};
use crate::queue::api::{content_digest, QueueError};
use serde_json::{Map, Value};

/// Forwards every payload unchanged
#[derive(Debug, Default)]
pub struct EchoStep;

#[async_trait::async_trait]
impl Step for EchoStep {
    fn label(&self) -> Option<&str> {
        Some("echo")
    }

    async fn consume(&self, ctx: &StepContext, payload: Payload) -> Result<(), ProcessingError> {
        ctx.produce(payload.into_value()).await?;
        Ok(())
    }
}

/// Adds `received_at`, the RFC 3339 time the step saw the payload
#[derive(Debug, Default)]
pub struct StampStep;

#[async_trait::async_trait]
impl Step for StampStep {
    fn label(&self) -> Option<&str> {
        Some("stamp")
    }

    async fn consume(&self, ctx: &StepContext, payload: Payload) -> Result<(), ProcessingError> {
        let mut object = into_object(payload.into_value());
        object.insert(
            "received_at".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        ctx.produce(Value::Object(object)).await?;
        Ok(())
    }
}

/// Adds `checksum`, the SHA-256 of the payload as received
#[derive(Debug, Default)]
pub struct ChecksumStep;

#[async_trait::async_trait]
impl Step for ChecksumStep {
    fn label(&self) -> Option<&str> {
        Some("checksum")
    }

    async fn consume(&self, ctx: &StepContext, payload: Payload) -> Result<(), ProcessingError> {
        let checksum = content_digest(payload.value()).map_err(QueueError::from)?;
        let mut object = into_object(payload.into_value());
        object.insert("checksum".to_string(), Value::String(checksum));
        ctx.produce(Value::Object(object)).await?;
        Ok(())
    }
}

/// Objects pass through; anything else becomes `{"payload": value}`
fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other);
            map
        }
    }
}

/// Registry of the pipelines available from the command line
pub fn builtin_registry() -> RegistryResult<PipelineRegistry> {
    let mut registry = PipelineRegistry::new();
    registry.register(
        PipelineDefinition::new("echo")
            .describe("Pass payloads through unchanged")
            .step::<EchoStep>(),
    )?;
    registry.register(
        PipelineDefinition::new("annotate")
            .describe("Stamp the arrival time, then add a content checksum")
            .step::<StampStep>()
            .step::<ChecksumStep>(),
    )?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineOptions;
    use crate::queue::api::{MemoryStore, QueueOptions};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn options() -> PipelineOptions {
        PipelineOptions {
            queue: QueueOptions {
                timeout: Some(Duration::from_secs(5)),
                poll_interval: Duration::from_millis(5),
                ..QueueOptions::default()
            },
            ..PipelineOptions::default()
        }
    }

    #[test]
    fn test_builtin_registry_contents() {
        let registry = builtin_registry().unwrap();
        assert_eq!(registry.names(), vec!["annotate", "echo"]);
        assert_eq!(
            registry.lookup("annotate").unwrap().step_identities(),
            vec!["stamp", "checksum"]
        );
    }

    #[test]
    fn test_into_object_wraps_scalars() {
        assert_eq!(Value::Object(into_object(json!(3))), json!({"payload": 3}));
        assert_eq!(Value::Object(into_object(json!({"a": 1}))), json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_annotate_pipeline_adds_fields() {
        let registry = builtin_registry().unwrap();
        let pipeline = registry
            .lookup("annotate")
            .unwrap()
            .build(Arc::new(MemoryStore::default()), options())
            .await
            .unwrap();

        pipeline.feed(json!({"order": 17})).await.unwrap();
        let result = pipeline.get_result(true).await.unwrap().unwrap();
        pipeline.shutdown().await.unwrap();

        assert_eq!(result["order"], 17);
        let stamped = result["received_at"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamped).is_ok());

        let mut without_checksum = result.clone();
        without_checksum.as_object_mut().unwrap().remove("checksum");
        assert_eq!(
            result["checksum"],
            json!(content_digest(&without_checksum).unwrap())
        );
    }
}
