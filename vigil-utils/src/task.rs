//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::ops::RangeInclusive;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use derive_new::new;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio::{task, time};
use tracing::{Instrument, error};

/// A handle which can be used to manipulate the task created by the
/// [`Task::spawn`] function.
///
/// By default, dropping this handle cancels the task (unless [`Task::detach`]
/// is used).
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

/// A handle which can be used to manipulate the timeout task created by the
/// [`TimeoutTask::new`] function.
///
/// Dropping this handle cancels the timeout task.
#[derive(Debug)]
pub struct TimeoutTask {
    #[cfg(not(feature = "testing"))]
    inner: TimerTaskInner,
}

/// A handle which can be used to manipulate the interval task created by the
/// [`IntervalTask::new`] function.
///
/// Dropping this handle cancels the interval task.
#[derive(Debug)]
pub struct IntervalTask {
    #[cfg(not(feature = "testing"))]
    inner: TimerTaskInner,
}

#[derive(Debug, new)]
struct TimerTaskInner {
    _task: Task<()>,
    control: UnboundedSender<Message>,
    next: Arc<Mutex<Instant>>,
}

#[derive(Debug)]
enum Message {
    Reset(Option<Duration>),
}

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task, returning a handle for it.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    /// Detach the task, meaning it will no longer be canceled if its handle is
    /// dropped.
    pub fn detach(&mut self) {
        self.detached = true;
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
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Spawns a new task that will call the provided async closure when the
    /// specified timeout expires.
    ///
    /// Returns a handler that can be used to manipulate the timeout task.
    #[cfg(not(feature = "testing"))]
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let next = Instant::now() + timeout;
        let next = Arc::new(Mutex::new(next));
        let next_child = next.clone();

        let task = Task::spawn(
            async move {
                let timeout_fut = time::sleep(timeout);
                tokio::pin!(timeout_fut);

                loop {
                    tokio::select! {
                        // Timeout has expired.
                        _ = &mut timeout_fut => {
                            (cb)().await;
                            break;
                        }
                        message = control_rx.recv() => {
                            match message {
                                // Timeout has been refreshed/updated.
                                Some(Message::Reset(new_timeout)) => {
                                    let next = Instant::now()
                                        + new_timeout.unwrap_or(timeout);
                                    timeout_fut.as_mut().reset(next);
                                    *next_child.lock().unwrap() = next;
                                }
                                // Timeout has been aborted.
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        TimeoutTask {
            inner: TimerTaskInner::new(task, control_tx, next),
        }
    }

    /// Resets the timeout, regardless if it has already expired or not.
    ///
    /// If a new timeout value isn't specified, the last value will be reused.
    pub fn reset(&mut self, timeout: Option<Duration>) {
        #[cfg(not(feature = "testing"))]
        {
            if self.inner.control.send(Message::Reset(timeout)).is_err() {
                error!("failed to reset timeout");
            }
        }
    }

    /// Returns the remaining time before the timeout expires.
    pub fn remaining(&self) -> Duration {
        #[cfg(not(feature = "testing"))]
        {
            let next = self.inner.next.lock().unwrap();
            next.saturating_duration_since(Instant::now())
        }
        #[cfg(feature = "testing")]
        {
            Duration::ZERO
        }
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Spawns a new task that will call the provided async closure whenever
    /// the specified interval elapses.
    ///
    /// When a jitter range is given, every gap between two consecutive ticks
    /// is drawn independently as `interval` scaled by a uniformly distributed
    /// factor from the range.
    ///
    /// Returns a handler that can be used to manipulate the interval task.
    #[cfg(not(feature = "testing"))]
    pub fn new<F, Fut>(
        interval: Duration,
        jitter: Option<RangeInclusive<f64>>,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let next = Arc::new(Mutex::new(Instant::now()));
        let next_child = next.clone();

        let task = Task::spawn(
            async move {
                let mut interval = interval;
                let mut fire = Instant::now();
                if !tick_on_start {
                    fire += jittered(interval, &jitter);
                }
                *next_child.lock().unwrap() = fire;

                loop {
                    tokio::select! {
                        // Interval has elapsed.
                        _ = time::sleep_until(fire) => {
                            (cb)().await;
                            fire = Instant::now()
                                + jittered(interval, &jitter);
                            *next_child.lock().unwrap() = fire;
                        }
                        message = control_rx.recv() => {
                            match message {
                                // Interval has been updated.
                                Some(Message::Reset(new_interval)) => {
                                    if let Some(new_interval) = new_interval {
                                        interval = new_interval;
                                    }
                                    fire = Instant::now()
                                        + jittered(interval, &jitter);
                                    *next_child.lock().unwrap() = fire;
                                }
                                // Interval has been aborted.
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        IntervalTask {
            inner: TimerTaskInner::new(task, control_tx, next),
        }
    }

    /// Resets the interval.
    ///
    /// If a new interval value isn't specified, the last value will be reused.
    pub fn reset(&mut self, interval: Option<Duration>) {
        #[cfg(not(feature = "testing"))]
        {
            if self.inner.control.send(Message::Reset(interval)).is_err() {
                error!("failed to reset interval");
            }
        }
    }

    /// Returns the remaining time before the next interval tick.
    pub fn remaining(&self) -> Duration {
        #[cfg(not(feature = "testing"))]
        {
            let next = self.inner.next.lock().unwrap();
            next.saturating_duration_since(Instant::now())
        }
        #[cfg(feature = "testing")]
        {
            Duration::ZERO
        }
    }
}

// ===== helper functions =====

fn jittered(interval: Duration, jitter: &Option<RangeInclusive<f64>>) -> Duration {
    match jitter {
        Some(range) => {
            interval.mul_f64(rand::rng().random_range(range.clone()))
        }
        None => interval,
    }
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_within_range() {
        let interval = Duration::from_micros(300000);

        for _ in 0..1000 {
            let gap = jittered(interval, &Some(0.75..=1.00));
            assert!(gap >= interval.mul_f64(0.75));
            assert!(gap <= interval);
        }
        for _ in 0..1000 {
            let gap = jittered(interval, &Some(0.75..=0.90));
            assert!(gap >= interval.mul_f64(0.75));
            assert!(gap <= interval.mul_f64(0.90));
        }
    }

    #[test]
    fn jittered_disabled() {
        let interval = Duration::from_micros(300000);
        assert_eq!(jittered(interval, &None), interval);
    }
}
