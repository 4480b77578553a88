/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

use super::consts::*;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
}

/// Where a consumer reads from: a durable work queue or a transient queue
/// bound to an exchange route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    Queue(String),
    Exchange { exchange: String, route: String },
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Queue(queue) => write!(f, "queue {}", queue),
            Source::Exchange { exchange, route } => write!(f, "exchange {}/{}", exchange, route),
        }
    }
}

#[async_trait]
pub trait Delivery: Send + Sync {
    fn data(&self) -> &[u8];
    async fn ack(&self) -> Result<(), BusError>;
    async fn nack(&self, requeue: bool) -> Result<(), BusError>;
}

pub type Deliveries = BoxStream<'static, Result<Box<dyn Delivery>, BusError>>;

#[async_trait]
pub trait MessageBus: Send + Sync + fmt::Debug {
    async fn enqueue(&self, queue: &str, body: &[u8]) -> Result<(), BusError>;
    async fn publish(&self, exchange: &str, route: &str, body: &[u8]) -> Result<(), BusError>;
    /// Opens a consumer with a prefetch of one.
    async fn consume(&self, source: &Source) -> Result<Deliveries, BusError>;
}

pub struct AmqpBus {
    connection: Connection,
    channel: Channel,
}

impl fmt::Debug for AmqpBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpBus")
            .field("status", &self.connection.status().state())
            .finish()
    }
}

impl AmqpBus {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        for queue in [QUEUE_PUSH, QUEUE_BUILD, QUEUE_DEPLOY] {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        channel
            .exchange_declare(
                EXCHANGE_EDGES,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(Self {
            connection,
            channel,
        })
    }

    async fn send(&self, exchange: &str, route: &str, body: &[u8]) -> Result<(), BusError> {
        self.channel
            .basic_publish(
                exchange,
                route,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await?
            .await?;

        debug!(exchange, route, "Published message");
        Ok(())
    }
}

struct AmqpDelivery {
    inner: lapin::message::Delivery,
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn data(&self) -> &[u8] {
        &self.inner.data
    }

    async fn ack(&self) -> Result<(), BusError> {
        self.inner.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), BusError> {
        self.inner
            .acker
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageBus for AmqpBus {
    async fn enqueue(&self, queue: &str, body: &[u8]) -> Result<(), BusError> {
        self.send("", queue, body).await
    }

    async fn publish(&self, exchange: &str, route: &str, body: &[u8]) -> Result<(), BusError> {
        self.send(exchange, route, body).await
    }

    async fn consume(&self, source: &Source) -> Result<Deliveries, BusError> {
        let channel = self.connection.create_channel().await?;
        channel.basic_qos(1, BasicQosOptions::default()).await?;

        let queue_name = match source {
            Source::Queue(queue) => queue.clone(),
            Source::Exchange { exchange, route } => {
                let queue = channel
                    .queue_declare(
                        "",
                        QueueDeclareOptions {
                            exclusive: true,
                            auto_delete: true,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await?;

                channel
                    .queue_bind(
                        queue.name().as_str(),
                        exchange,
                        route,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;

                queue.name().as_str().to_string()
            }
        };

        let consumer = channel
            .basic_consume(
                &queue_name,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        debug!(queue = %queue_name, %source, "Consuming");

        // the channel has to outlive the consumer stream
        let deliveries = consumer.map(move |delivery| {
            let _ = &channel;
            delivery
                .map(|inner| Box::new(AmqpDelivery { inner }) as Box<dyn Delivery>)
                .map_err(BusError::from)
        });

        Ok(deliveries.boxed())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub exchange: String,
    pub route: String,
    pub body: Vec<u8>,
}

impl SentMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ack,
    Nack { requeue: bool },
}

type OutcomeLog = Arc<Mutex<Vec<(Vec<u8>, Outcome)>>>;

/// In-process bus. Sent messages are recorded; deliveries are queued
/// explicitly with [`MemoryBus::deliver`] and drained by the next `consume`.
#[derive(Debug, Default)]
pub struct MemoryBus {
    sent: Mutex<Vec<SentMessage>>,
    pending: Mutex<HashMap<Source, VecDeque<Vec<u8>>>>,
    outcomes: OutcomeLog,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&self, source: Source, body: impl Into<Vec<u8>>) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(source)
            .or_default()
            .push_back(body.into());
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn enqueued(&self, queue: &str) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter(|m| m.exchange.is_empty() && m.route == queue)
            .map(|m| m.json())
            .collect()
    }

    pub fn published(&self, exchange: &str, route: &str) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter(|m| m.exchange == exchange && m.route == route)
            .map(|m| m.json())
            .collect()
    }

    pub fn outcomes(&self) -> Vec<(Vec<u8>, Outcome)> {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, exchange: &str, route: &str, body: &[u8]) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentMessage {
                exchange: exchange.to_string(),
                route: route.to_string(),
                body: body.to_vec(),
            });
    }
}

struct MemoryDelivery {
    body: Vec<u8>,
    outcomes: OutcomeLog,
}

impl MemoryDelivery {
    fn settle(&self, outcome: Outcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((self.body.clone(), outcome));
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn data(&self) -> &[u8] {
        &self.body
    }

    async fn ack(&self) -> Result<(), BusError> {
        self.settle(Outcome::Ack);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), BusError> {
        self.settle(Outcome::Nack { requeue });
        Ok(())
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn enqueue(&self, queue: &str, body: &[u8]) -> Result<(), BusError> {
        self.record("", queue, body);
        Ok(())
    }

    async fn publish(&self, exchange: &str, route: &str, body: &[u8]) -> Result<(), BusError> {
        self.record(exchange, route, body);
        Ok(())
    }

    async fn consume(&self, source: &Source) -> Result<Deliveries, BusError> {
        let bodies: Vec<Vec<u8>> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(source)
            .map(Vec::from)
            .unwrap_or_default();

        let outcomes = Arc::clone(&self.outcomes);
        let deliveries = bodies.into_iter().map(move |body| {
            Ok(Box::new(MemoryDelivery {
                body,
                outcomes: Arc::clone(&outcomes),
            }) as Box<dyn Delivery>)
        });

        Ok(stream::iter(deliveries.collect::<Vec<_>>()).boxed())
    }
}
