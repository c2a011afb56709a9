// src/mqtt.rs
// MQTT transport adapter: feeds inbound alarms and operator responses into the
// engine and publishes display updates to annunciator topics.

use crate::config::MqttConfig;
use crate::engine::{Engine, Publisher};
use crate::error::{AdamError, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Where an inbound publish goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Alarm,
    Operator { annunciator: &'a str },
    Ignored,
}

pub fn route<'a>(config: &MqttConfig, topic: &'a str) -> Route<'a> {
    if topic == config.alarm_topic {
        return Route::Alarm;
    }
    match config.annunciator_from_topic(topic) {
        Some(annunciator) => Route::Operator { annunciator },
        None => Route::Ignored,
    }
}

/// Publishes display updates with QoS 1 to the annunciator's own topic
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl Publisher for MqttPublisher {
    fn publish(&self, annunciator: &str, payload: &str) -> Result<()> {
        self.client
            .try_publish(annunciator, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| AdamError::PublishFailure {
                annunciator: annunciator.to_string(),
                reason: e.to_string(),
            })
    }
}

pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    config: MqttConfig,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, 100);
        Self {
            client,
            eventloop,
            config,
        }
    }

    /// Publish handle for the engine
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }

    /// Drive the connection forever. Subscriptions are renewed on every
    /// (re)connect; connection errors are logged and retried after a second.
    pub async fn run(mut self, engine: Arc<Engine>) {
        info!(
            "Connecting to MQTT broker {}:{}",
            self.config.broker_host, self.config.broker_port
        );
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT connected");
                    self.subscribe();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.dispatch(&engine, &publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT connection error: {}", e);
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    fn subscribe(&self) {
        for topic in [self.config.alarm_topic.clone(), self.config.response_filter()] {
            match self.client.try_subscribe(&topic, QoS::AtLeastOnce) {
                Ok(()) => info!("Subscribed to {}", topic),
                Err(e) => error!("Failed to subscribe to {}: {}", topic, e),
            }
        }
    }

    fn dispatch(&self, engine: &Engine, topic: &str, payload: &[u8]) {
        // failures are already logged by the engine
        let outcome = match route(&self.config, topic) {
            Route::Alarm => engine.on_inbound_alarm(payload),
            Route::Operator { annunciator } => engine.on_operator_message(payload, annunciator),
            Route::Ignored => {
                debug!("Ignoring message on {}", topic);
                return;
            }
        };
        if let Err(e) = outcome {
            debug!("Message on {} not applied: {}", topic, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing() {
        let config = MqttConfig::default();
        assert_eq!(route(&config, "adam/in/alarms"), Route::Alarm);
        assert_eq!(
            route(&config, "adam/acks/KRAKE_LB0001"),
            Route::Operator { annunciator: "KRAKE_LB0001" }
        );
        assert_eq!(route(&config, "KRAKE_LB0001"), Route::Ignored);
    }

    #[tokio::test]
    async fn test_publisher_queues_without_broker() {
        let transport = MqttTransport::new(MqttConfig::default());
        let publisher = transport.publisher();
        assert!(publisher.publish("A1", "a3{AA}pump").is_ok());
    }
}
