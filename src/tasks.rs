//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// Cancel-on-drop timer handles built on top of tokio::time. Dropping a
// handle cancels the underlying task, so a removed instance can never be
// driven by a late-firing callback (see the design notes on timer
// lifetime in instance.rs).

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task;
use tokio::time::Instant;
use tracing::error;

#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
}

impl<T> Task<T> {
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
        }
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        self.join_handle.abort();
    }
}

#[derive(Debug)]
enum Message {
    Reset(Option<Duration>),
}

/// A handle for a one-shot deadline. Dropping it cancels the timeout.
#[derive(Debug)]
pub struct TimeoutTask {
    _task: Task<()>,
    control: UnboundedSender<Message>,
    next: Arc<Mutex<Instant>>,
}

impl TimeoutTask {
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let next = Arc::new(Mutex::new(Instant::now() + timeout));
        let next_child = next.clone();

        let task = Task::spawn(async move {
            let timeout_fut = tokio::time::sleep(timeout);
            tokio::pin!(timeout_fut);

            loop {
                tokio::select! {
                    _ = &mut timeout_fut => {
                        (cb)().await;
                        break;
                    }
                    message = control_rx.recv() => {
                        match message {
                            Some(Message::Reset(duration)) => {
                                let duration = duration.unwrap_or(timeout);
                                let next = Instant::now() + duration;
                                timeout_fut.as_mut().reset(next);
                                *next_child.lock().unwrap() = next;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        TimeoutTask {
            _task: task,
            control: control_tx,
            next,
        }
    }

    /// Reschedules the deadline, reusing the last duration if none is given.
    pub fn reset(&mut self, duration: Option<Duration>) {
        if self.control.send(Message::Reset(duration)).is_err() {
            error!("failed to reset master-down timer");
        }
    }

    pub fn remaining(&self) -> Duration {
        self.next
            .lock()
            .unwrap()
            .saturating_duration_since(Instant::now())
    }
}

/// A handle for a recurring interval. Dropping it cancels the interval.
#[derive(Debug)]
pub struct IntervalTask {
    _task: Task<()>,
    control: UnboundedSender<Message>,
    next: Arc<Mutex<Instant>>,
}

impl IntervalTask {
    pub fn new<F, Fut>(
        interval: Duration,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let next = Arc::new(Mutex::new(Instant::now() + interval));
        let next_child = next.clone();

        let task = Task::spawn(async move {
            let mut interval_fut = if tick_on_start {
                tokio::time::interval(interval)
            } else {
                tokio::time::interval_at(Instant::now() + interval, interval)
            };

            loop {
                tokio::select! {
                    _ = interval_fut.tick() => {
                        (cb)().await;
                        *next_child.lock().unwrap() = Instant::now() + interval;
                    }
                    message = control_rx.recv() => {
                        match message {
                            Some(Message::Reset(duration)) => {
                                let duration = duration.unwrap_or(interval);
                                interval_fut = tokio::time::interval(duration);
                                *next_child.lock().unwrap() = Instant::now() + duration;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        IntervalTask {
            _task: task,
            control: control_tx,
            next,
        }
    }

    /// Reschedules the interval, reusing the last duration if none is given.
    pub fn reset(&mut self, duration: Option<Duration>) {
        if self.control.send(Message::Reset(duration)).is_err() {
            error!("failed to reset advertisement timer");
        }
    }

    pub fn remaining(&self) -> Duration {
        self.next
            .lock()
            .unwrap()
            .saturating_duration_since(Instant::now())
    }
}
