// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The operation collector.
//!
//! Workers send finished [Operation] records into a bounded channel. A
//! single consumer task forwards each record to the registered fan-out
//! sinks, in registration order, before appending it to the in-memory log.
//! A blocking sink therefore back-pressures the whole pipeline; that is
//! intentional, and misconfigured subscribers must buffer on their side.

use gale_record::{Operation, Operations};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// The capacity of the ingestion channel.
pub const CHANNEL_CAPACITY: usize = 1000;

/// Collects operation records from any number of workers.
#[derive(Debug)]
pub struct Collector {
    tx: mpsc::Sender<Operation>,
    outputs: Arc<Mutex<Vec<mpsc::Sender<Operation>>>>,
    pub(crate) log: Arc<Mutex<Vec<Operation>>>,
    consumer: tokio::task::JoinHandle<()>,
}

impl Collector {
    /// Creates a collector that stores every accepted record.
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Creates a collector that forwards to sinks but stores nothing.
    pub fn null() -> Self {
        Self::build(false)
    }

    fn build(store: bool) -> Self {
        let (tx, mut rx) = mpsc::channel::<Operation>(CHANNEL_CAPACITY);
        let outputs: Arc<Mutex<Vec<mpsc::Sender<Operation>>>> = Arc::default();
        let log: Arc<Mutex<Vec<Operation>>> = Arc::default();
        let consumer = {
            let outputs = Arc::clone(&outputs);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                // Sinks registered after the first record would race the
                // forwarding below, so the set is frozen here.
                let mut sinks: Option<Vec<mpsc::Sender<Operation>>> = None;
                while let Some(op) = rx.recv().await {
                    let sinks = sinks.get_or_insert_with(|| {
                        outputs.lock().expect("collector outputs lock is poisoned").clone()
                    });
                    for sink in sinks.iter() {
                        if sink.send(op.clone()).await.is_err() {
                            tracing::warn!("fan-out subscriber is gone; its records are dropped");
                        }
                    }
                    if store {
                        log.lock().expect("collector log lock is poisoned").push(op);
                    }
                }
            })
        };
        Self {
            tx,
            outputs,
            log,
            consumer,
        }
    }

    /// Returns a handle workers use to submit records.
    ///
    /// Any number of producers may hold one. [close][Self::close] completes
    /// only after every handle is dropped and the channel is drained.
    pub fn sender(&self) -> mpsc::Sender<Operation> {
        self.tx.clone()
    }

    /// Registers an additional sink receiving every accepted record.
    ///
    /// Must be called before the first record is submitted; there is no
    /// delivery guarantee for sinks registered later.
    pub fn add_output(&self, sink: mpsc::Sender<Operation>) {
        self.outputs
            .lock()
            .expect("collector outputs lock is poisoned")
            .push(sink);
    }

    /// Copies the current log.
    ///
    /// The log mutex is held only for the copy; records are immutable once
    /// stored, so the snapshot stays consistent.
    pub fn snapshot(&self) -> Operations {
        Operations::from(
            self.log
                .lock()
                .expect("collector log lock is poisoned")
                .clone(),
        )
    }

    /// Stops ingestion and returns the accumulated log.
    ///
    /// Waits for in-flight records to be forwarded and stored, then closes
    /// every fan-out sink. The null variant returns an empty log. Consuming
    /// `self` makes a double close impossible.
    pub async fn close(self) -> Operations {
        drop(self.tx);
        let _ = self.consumer.await;
        self.outputs
            .lock()
            .expect("collector outputs lock is poisoned")
            .clear();
        let log = std::mem::take(
            &mut *self.log.lock().expect("collector log lock is poisoned"),
        );
        Operations::from(log)
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}
