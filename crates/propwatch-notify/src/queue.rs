use crate::dispatcher::Dispatcher;
use crate::error::{NotifyError, Result};
use crate::template::Bindings;
use propwatch_common::types::{ChannelType, DeliveryLog, MessageTemplate};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// One notification waiting for a worker.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub template: MessageTemplate,
    pub recipient: String,
    pub channel: ChannelType,
    pub bindings: Bindings,
}

type Envelope = (DeliveryJob, oneshot::Sender<Result<DeliveryLog>>);

/// Handle on a queued delivery.
///
/// Dropping the ticket does not cancel the delivery.
pub struct DeliveryTicket {
    rx: oneshot::Receiver<Result<DeliveryLog>>,
}

impl DeliveryTicket {
    /// Waits for the worker to finish every attempt.
    pub async fn wait(self) -> Result<DeliveryLog> {
        self.rx.await.map_err(|_| NotifyError::QueueClosed)?
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Bounded queue drained by a fixed pool of tokio workers.
///
/// A job the queue cannot take is still written down: it gets a `failed`
/// delivery log carrying the reason, and counts toward statistics.
pub struct DeliveryQueue {
    dispatcher: Arc<Dispatcher>,
    /// `None` once shut down.
    tx: Mutex<Option<mpsc::Sender<Envelope>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DeliveryQueue {
    /// Spawns `workers` tasks on the current runtime.
    pub fn start(dispatcher: Arc<Dispatcher>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Envelope>(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some((job, reply)) = next else {
                            break;
                        };
                        let result = dispatcher
                            .send(&job.template, &job.recipient, job.channel, &job.bindings)
                            .await;
                        if let Err(e) = &result {
                            tracing::error!(
                                worker,
                                channel = %job.channel,
                                template_id = %job.template.id,
                                error = %e,
                                "Delivery job failed"
                            );
                        }
                        // The submitter may have dropped its ticket
                        let _ = reply.send(result);
                    }
                    tracing::debug!(worker, "Delivery worker stopped");
                })
            })
            .collect();

        Self {
            dispatcher,
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    /// Queues a job without waiting for it to run.
    ///
    /// On `QueueFull` or `QueueClosed` the job is recorded as a failed
    /// delivery before the error is returned.
    pub fn enqueue(&self, job: DeliveryJob) -> Result<DeliveryTicket> {
        let (reply, rx) = oneshot::channel();
        let rejected = match lock(&self.tx).as_ref() {
            Some(tx) => match tx.try_send((job, reply)) {
                Ok(()) => return Ok(DeliveryTicket { rx }),
                Err(TrySendError::Full((job, _))) => (job, NotifyError::QueueFull),
                Err(TrySendError::Closed((job, _))) => (job, NotifyError::QueueClosed),
            },
            None => (job, NotifyError::QueueClosed),
        };

        let (job, err) = rejected;
        self.record_rejected(&job, &err);
        Err(err)
    }

    fn record_rejected(&self, job: &DeliveryJob, err: &NotifyError) {
        // Without a transport the job would not have produced a log either.
        if !self.dispatcher.has_channel(job.channel) {
            return;
        }
        let reason = match err {
            NotifyError::QueueFull => "delivery queue is full",
            _ => "delivery queue is closed",
        };
        if let Err(e) =
            self.dispatcher
                .record_undelivered(&job.template, &job.recipient, job.channel, reason)
        {
            tracing::error!(
                channel = %job.channel,
                template_id = %job.template.id,
                error = %e,
                "Failed to record rejected delivery"
            );
        }
    }

    /// Stops accepting jobs and waits for queued ones to drain, including
    /// any retries in progress.
    pub async fn shutdown(&self) {
        lock(&self.tx).take();
        let workers = std::mem::take(&mut *lock(&self.workers));
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Delivery worker panicked");
            }
        }
    }
}
