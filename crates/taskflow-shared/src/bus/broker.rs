//! External-broker bus backend (AMQP 0.9.1 via `lapin`): events publish
//! to a topic exchange, commands to a direct exchange, both with
//! durable queues and persistent delivery mode. An acknowledgement is
//! only sent after the subscriber callback returns without error; on
//! error the retry controller decides requeue vs. dead-letter (wired by
//! the caller, not this module).

use super::{CommandCallback, EventCallback};
use crate::config::BrokerConfig;
use crate::error::{MessagingError, MessagingResult};
use crate::events::{Command, DomainEvent};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct BrokerBus {
    config: BrokerConfig,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl BrokerBus {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            connection: RwLock::new(None),
            channel: RwLock::new(None),
        }
    }

    async fn channel(&self) -> MessagingResult<Channel> {
        self.channel.read().await.clone().ok_or(MessagingError::NotConnected)
    }

    pub async fn connect(&self) -> MessagingResult<()> {
        if self.channel.read().await.is_some() {
            return Ok(());
        }
        let conn = Connection::connect(&self.config.amqp_uri, ConnectionProperties::default())
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;
        let channel = conn.create_channel().await.map_err(|e| MessagingError::Connection(e.to_string()))?;

        channel
            .exchange_declare(&self.config.event_exchange, ExchangeKind::Topic, ExchangeDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;
        channel
            .exchange_declare(&self.config.command_exchange, ExchangeKind::Direct, ExchangeDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        *self.connection.write().await = Some(conn);
        *self.channel.write().await = Some(channel);
        Ok(())
    }

    pub async fn disconnect(&self) -> MessagingResult<()> {
        if let Some(channel) = self.channel.write().await.take() {
            let _ = channel.close(200, "disconnect").await;
        }
        if let Some(conn) = self.connection.write().await.take() {
            let _ = conn.close(200, "disconnect").await;
        }
        Ok(())
    }

    pub async fn publish_event(&self, event: DomainEvent) -> MessagingResult<()> {
        let channel = self.channel().await?;
        let payload = serde_json::to_vec(&event).map_err(|e| MessagingError::Serialization(e.to_string()))?;
        let routing_key = event.event_type().to_string();
        channel
            .basic_publish(
                &self.config.event_exchange,
                &routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| MessagingError::ServerError(e.to_string()))?
            .await
            .map_err(|e| MessagingError::ServerError(e.to_string()))?;
        Ok(())
    }

    pub async fn subscribe_to_event(&self, event_type: &str, queue_name: Option<String>, callback: Arc<EventCallback>) -> MessagingResult<()> {
        let channel = self.channel().await?;
        let queue = queue_name.clone().unwrap_or_else(|| format!("{event_type}.auto"));
        let durable = queue_name.is_some();

        channel
            .queue_declare(&queue, QueueDeclareOptions { durable, auto_delete: !durable, ..Default::default() }, FieldTable::default())
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;
        channel
            .queue_bind(&queue, &self.config.event_exchange, event_type, QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        let mut consumer = channel
            .basic_consume(&queue, &format!("{queue}-consumer"), BasicConsumeOptions::default(), FieldTable::default())
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(d) => d,
                    Err(err) => {
                        warn!(error = %err, "broker delivery error");
                        continue;
                    }
                };
                let event: DomainEvent = match serde_json::from_slice(&delivery.data) {
                    Ok(e) => e,
                    Err(err) => {
                        warn!(error = %err, "dropping malformed event delivery");
                        let _ = delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await;
                        continue;
                    }
                };
                match callback(event).await {
                    Ok(()) => {
                        let _ = delivery.ack(BasicAckOptions::default()).await;
                    }
                    Err(err) => {
                        debug!(error = %err, "event subscriber failed, nacking for requeue decision upstream");
                        let _ = delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await;
                    }
                }
            }
        });
        Ok(())
    }

    pub async fn publish_command(&self, command: Command) -> MessagingResult<()> {
        let channel = self.channel().await?;
        let payload = serde_json::to_vec(&command).map_err(|e| MessagingError::Serialization(e.to_string()))?;
        let routing_key = command.command_type().to_string();
        channel
            .basic_publish(
                &self.config.command_exchange,
                &routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| MessagingError::ServerError(e.to_string()))?
            .await
            .map_err(|e| MessagingError::ServerError(e.to_string()))?;
        Ok(())
    }

    pub async fn subscribe_to_command(&self, command_type: &str, queue_name: Option<String>, callback: Arc<CommandCallback>) -> MessagingResult<()> {
        let channel = self.channel().await?;
        let queue = queue_name.unwrap_or_else(|| command_type.to_string());

        channel
            .queue_declare(&queue, QueueDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;
        channel
            .queue_bind(&queue, &self.config.command_exchange, command_type, QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        let mut consumer = channel
            .basic_consume(
                &queue,
                &format!("{queue}-consumer"),
                BasicConsumeOptions { no_ack: false, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            // One delivery processed to completion before the next is
            // fetched: `consumer.next()` only yields the following
            // delivery once this iteration's `.await` resolves.
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(d) => d,
                    Err(err) => {
                        warn!(error = %err, "broker delivery error");
                        continue;
                    }
                };
                let command: Command = match serde_json::from_slice(&delivery.data) {
                    Ok(c) => c,
                    Err(err) => {
                        warn!(error = %err, "dropping malformed command delivery");
                        let _ = delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await;
                        continue;
                    }
                };
                match callback(command).await {
                    Ok(()) => {
                        let _ = delivery.ack(BasicAckOptions::default()).await;
                    }
                    Err(err) => {
                        debug!(error = %err, "command consumer failed, nacking for requeue decision upstream");
                        let _ = delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await;
                    }
                }
            }
        });
        Ok(())
    }
}
