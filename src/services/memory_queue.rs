//! In-process [`JobQueue`] with lease-based redelivery, used by tests and
//! single-node dev runs.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::services::queue::{Delivery, JobQueue, QueueError};

#[derive(Debug, Default)]
struct Inner {
    ready: VecDeque<(u64, Uuid)>,
    in_flight: HashMap<u64, (Uuid, Instant)>,
    next_id: u64,
}

impl Inner {
    /// Move deliveries whose lease ran out back to the front of the line.
    fn requeue_expired(&mut self, now: Instant) {
        let mut expired: Vec<(u64, Uuid)> = self
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(id, (job_id, _))| (*id, *job_id))
            .collect();
        expired.sort_unstable_by_key(|(id, _)| *id);

        for (id, job_id) in expired.into_iter().rev() {
            self.in_flight.remove(&id);
            self.ready.push_front((id, job_id));
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|(_, deadline)| *deadline).min()
    }
}

#[derive(Debug)]
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    lease: Duration,
}

impl MemoryJobQueue {
    pub fn new(lease: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            lease,
        }
    }

    /// Deliveries handed out and not yet acked.
    pub async fn in_flight(&self) -> usize {
        self.inner.lock().await.in_flight.len()
    }

    fn parse_handle(delivery: &Delivery) -> Result<u64, QueueError> {
        delivery
            .handle
            .parse()
            .map_err(|_| QueueError::Malformed(format!("bad handle {:?}", delivery.handle)))
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.ready.push_back((id, job_id));
        drop(inner);

        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        let give_up = Instant::now() + timeout;

        loop {
            let now = Instant::now();
            let wake_at = {
                let mut inner = self.inner.lock().await;
                inner.requeue_expired(now);

                if let Some((id, job_id)) = inner.ready.pop_front() {
                    inner.in_flight.insert(id, (job_id, now + self.lease));
                    return Ok(Some(Delivery {
                        job_id,
                        handle: id.to_string(),
                    }));
                }

                match inner.next_deadline() {
                    Some(deadline) => deadline.min(give_up),
                    None => give_up,
                }
            };

            if now >= give_up {
                return Ok(None);
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let id = Self::parse_handle(delivery)?;
        self.inner.lock().await.in_flight.remove(&id);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let id = Self::parse_handle(delivery)?;
        let mut inner = self.inner.lock().await;
        if let Some((job_id, _)) = inner.in_flight.remove(&id) {
            inner.ready.push_back((id, job_id));
            drop(inner);
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn touch(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let id = Self::parse_handle(delivery)?;
        let mut inner = self.inner.lock().await;
        if let Some((_, deadline)) = inner.in_flight.get_mut(&id) {
            *deadline = Instant::now() + self.lease;
        }
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let inner = self.inner.lock().await;
        Ok((inner.ready.len() + inner.in_flight.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
