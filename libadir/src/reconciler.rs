// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

//! Periodic background tasks.
//!
//! The runner drives each enabled task on its own interval. Ticks of the
//! same task never overlap (a tick that falls due while the previous one
//! still runs is skipped), different tasks run concurrently. Shutdown is
//! cooperative: the in-flight tick is cancelled at its next suspension
//! point, and the runner waits out a bounded drain window.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::FutureExt as _;
use tokio::{
    sync::watch,
    time::{interval, timeout, MissedTickBehavior},
};

/// A periodic background task.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    fn enabled(&self) -> bool {
        true
    }

    /// Upper bound on a single tick. `None` leaves the tick unbounded.
    fn tick_timeout(&self) -> Option<Duration> {
        None
    }

    /// One tick. Failures are the task's to log; a tick must not bring the
    /// loop down, and a panic inside it is captured by the runner.
    async fn run(&self);
}

/// Shared knobs of the reconciler tasks.
#[derive(Clone, Debug)]
pub struct Config {
    pub enabled: bool,
    pub interval: Duration,
    pub timeout: Duration,
    pub worker_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(120),
            worker_count: 4,
        }
    }
}

pub struct Runner {
    tasks: Vec<Arc<dyn Task>>,
    drain: Duration,
}

impl Runner {
    pub fn new(drain: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            drain,
        }
    }

    pub fn register<T: Task>(&mut self, task: T) {
        self.tasks.push(Arc::new(task));
    }

    /// Run all enabled tasks until `shutdown` flips to `true`, then wait at
    /// most the drain window for the loops to wind down.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut handles = Vec::new();
        for task in self.tasks {
            if !task.enabled() {
                tracing::info!(task = task.name(), "reconciler task disabled");
                continue;
            }
            handles.push(tokio::spawn(drive(task, shutdown.clone())));
        }

        if timeout(self.drain, futures::future::join_all(&mut handles))
            .await
            .is_err()
        {
            tracing::warn!("drain window elapsed, aborting outstanding reconciler ticks");
            for handle in &handles {
                handle.abort();
            }
        }
    }
}

async fn drive(task: Arc<dyn Task>, mut shutdown: watch::Receiver<bool>) {
    let mut ticks = interval(task.interval());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(task = task.name(), period = ?task.interval(), "reconciler task started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticks.tick() => tick(task.as_ref(), &mut shutdown).await,
        }
        if *shutdown.borrow() {
            break;
        }
    }
    tracing::info!(task = task.name(), "reconciler task stopped");
}

async fn tick(task: &dyn Task, shutdown: &mut watch::Receiver<bool>) {
    let bounded = async {
        let run = AssertUnwindSafe(task.run()).catch_unwind();
        match task.tick_timeout() {
            Some(bound) => match timeout(bound, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(task = task.name(), "tick timed out");
                    Ok(())
                },
            },
            None => run.await,
        }
    };

    tokio::select! {
        // dropping the tick future cancels it at its next suspension point
        _ = shutdown.changed() => (),
        outcome = bounded => {
            if outcome.is_err() {
                tracing::error!(task = task.name(), "tick panicked");
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        runs: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl Task for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
        }
    }

    struct Panicking;

    #[async_trait]
    impl Task for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn run(&self) {
            panic!("boom")
        }
    }

    #[tokio::test]
    async fn ticks_do_not_overlap() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut runner = Runner::new(Duration::from_secs(1));
        runner.register(Counting {
            runs: Arc::clone(&runs),
            delay: Duration::from_millis(200),
        });

        let (tx, rx) = watch::channel(false);
        let driver = tokio::spawn(runner.run(rx));

        // several intervals pass while the first run still sleeps
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        driver.await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_panicking_tick_does_not_kill_the_loop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut runner = Runner::new(Duration::from_secs(1));
        runner.register(Panicking);
        runner.register(Counting {
            runs: Arc::clone(&runs),
            delay: Duration::from_millis(1),
        });

        let (tx, rx) = watch::channel(false);
        let driver = tokio::spawn(runner.run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        driver.await.unwrap();

        assert!(runs.load(Ordering::SeqCst) >= 2);
    }
}
