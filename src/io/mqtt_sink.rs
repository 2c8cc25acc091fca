//! MQTT telemetry sink
//!
//! Publishes under the configured topic root:
//! - `<root>/distance_cm`, `owner`, `pir_motion`, `session_active`,
//!   `gate_open`, `lamp_on` - plain numbers, flags as `0`/`1`
//! - `<root>/event` - the whole snapshot as JSON
//!
//! All topics use QoS 0; a dropped sample is replaced by the next one.

use crate::domain::types::GateEvent;
use crate::infra::config::Config;
use crate::infra::error::SinkError;
use crate::io::telemetry::TelemetrySink;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn flag(value: bool) -> String {
    (value as u8).to_string()
}

/// Per-field topic payloads in publish order, followed by the aggregate event
pub fn topic_payloads(root: &str, event: &GateEvent) -> Result<Vec<(String, Vec<u8>)>, SinkError> {
    let topic = |name: &str| format!("{}/{}", root.trim_end_matches('/'), name);
    let mut out = vec![
        (topic("distance_cm"), event.distance_cm.to_string().into_bytes()),
        (topic("pir_motion"), flag(event.pir_motion).into_bytes()),
        (topic("session_active"), flag(event.session_active).into_bytes()),
        (topic("owner"), flag(event.owner).into_bytes()),
        (topic("gate_open"), flag(event.gate_open).into_bytes()),
        (topic("lamp_on"), flag(event.lamp_on).into_bytes()),
    ];
    out.push((topic("event"), serde_json::to_vec(event)?));
    Ok(out)
}

pub struct MqttSink {
    client: AsyncClient,
    root: String,
    eventloop_task: JoinHandle<()>,
}

impl MqttSink {
    /// Create the client; the connection is made lazily by the event loop task
    pub fn new(config: &Config) -> Self {
        let client_id = format!("gate-fusion-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(60));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

        let eventloop_task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        debug!("mqtt_disconnected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_connection_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        info!(
            host = %config.mqtt_host(),
            port = %config.mqtt_port(),
            root = %config.mqtt_topic_root(),
            "mqtt_sink_created"
        );

        Self { client, root: config.mqtt_topic_root().to_string(), eventloop_task }
    }
}

#[async_trait]
impl TelemetrySink for MqttSink {
    async fn publish(&mut self, event: &GateEvent) -> Result<(), SinkError> {
        for (topic, payload) in topic_payloads(&self.root, event)? {
            self.client.publish(topic, QoS::AtMostOnce, false, payload).await?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "mqtt_disconnect_failed");
        }
        // Give the event loop a moment to flush the DISCONNECT packet
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.eventloop_task.abort();
        info!("mqtt_sink_closed");
    }
}
