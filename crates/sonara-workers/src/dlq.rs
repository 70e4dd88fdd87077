//! Dead-letter forwarding shared by the bus consumers.

use chrono::Utc;
use tracing::{error, warn};

use sonara_events::payloads::DeadLetter;
use sonara_events::{Message, Publisher, topics};
use sonara_telemetry::Metrics;

/// Forward an exhausted delivery to the dead-letter topic, preserving the
/// original payload and failure context.
///
/// Forwarding failures are logged and swallowed: the delivery is acked
/// regardless, because redelivering a poison message forever is worse than
/// losing its DLQ copy.
pub async fn forward(
    publisher: &dyn Publisher,
    metrics: &Metrics,
    message: &Message,
    error_type: &str,
    error_message: &str,
    retry_count: u32,
) {
    let letter = DeadLetter {
        original_topic: message.topic.clone(),
        original_key: message.key.clone(),
        original_payload: message.payload.clone(),
        error_type: error_type.to_string(),
        error_message: error_message.to_string(),
        retry_count,
        failed_at: Utc::now(),
    };
    let Ok(payload) = serde_json::to_vec(&letter) else {
        error!(key = %message.key, "failed to serialize dead letter");
        return;
    };

    warn!(
        key = %message.key,
        original_topic = %message.topic,
        error_type,
        retry_count,
        "forwarding message to dead-letter topic"
    );
    if let Err(err) = publisher
        .publish(topics::AUDIO_EVENTS_DLQ, &message.key, "dead_letter", payload)
        .await
    {
        error!(key = %message.key, error = %err, "dead-letter publish failed; message dropped after ack");
    }
    metrics.record_dlq_message(&message.topic);
}
