//! Event dispatcher: per-session per-direction ordered delivery.
//!
//! Every event lands in a FIFO keyed by (session, direction). READ and
//! CONNECT share the read queue, WRITE and DISCONNECT share the write queue.
//! Creating a queue schedules exactly one consumer task; the task drains the
//! queue head-first and removes the queue, under the map lock, when it
//! empties. Per (session, direction) callbacks therefore run in enqueue
//! order by at most one task, while the two directions proceed concurrently.

use crate::crossbar::net::consumer::ConsumerHandle;
use crate::crossbar::net::package::{NetPackage, PackageAction};
use crate::crossbar::net::service::NetService;
use crate::crossbar::net::session::SessionId;
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum EventDirection {
    Read,
    Write,
}

impl EventDirection {
    fn of(action: PackageAction) -> Self {
        match action {
            PackageAction::Read | PackageAction::Connect => EventDirection::Read,
            _ => EventDirection::Write,
        }
    }
}

type ActionQueues = HashMap<(SessionId, EventDirection), VecDeque<(NetPackage, ConsumerHandle)>>;

#[derive(Clone, Default)]
pub(crate) struct EventDispatcher {
    queues: Arc<Mutex<ActionQueues>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event for its session. If the (session, direction) queue
    /// did not exist it is created and a consumer task is scheduled for it.
    pub async fn dispatch(&self, service: NetService, consumer: ConsumerHandle, package: NetPackage) {
        let session_id = match package.session() {
            Some(session) => session.id(),
            None => {
                warn!("Dropping event without session: {:?}", package.action);
                return;
            }
        };
        let key = (session_id, EventDirection::of(package.action));

        let schedule = {
            let mut queues = self.queues.lock().await;
            let schedule = !queues.contains_key(&key);
            queues
                .entry(key)
                .or_default()
                .push_back((package, consumer));
            schedule
        };

        if schedule {
            let queues = self.queues.clone();
            tokio::spawn(async move {
                Self::consume(queues, key, service).await;
            });
        }
    }

    /// Drain one (session, direction) queue in order. The queue removal and
    /// the emptiness check happen under the same lock that producers push
    /// under, so no event is left behind.
    async fn consume(
        queues: Arc<Mutex<ActionQueues>>,
        key: (SessionId, EventDirection),
        service: NetService,
    ) {
        loop {
            let next = {
                let mut queues = queues.lock().await;
                match queues.get_mut(&key) {
                    Some(queue) => match queue.pop_front() {
                        Some(item) => Some(item),
                        None => {
                            queues.remove(&key);
                            debug!("Action consumer {:?} queue destroyed", key.1);
                            None
                        }
                    },
                    None => None,
                }
            };

            let (package, consumer) = match next {
                Some(item) => item,
                None => break,
            };

            match package.action {
                PackageAction::Connect => consumer.on_connect(&service, package).await,
                PackageAction::Disconnect => consumer.on_disconnect(&service, package).await,
                PackageAction::Read => consumer.on_read(&service, package).await,
                PackageAction::Write | PackageAction::Streaming => {
                    consumer.on_write(&service, package).await
                }
            }
        }
    }
}
