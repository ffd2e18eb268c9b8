//! 阶段耗时显示
//!
//! 只用于显示，和失效检查的计时完全独立。

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// 每秒加一的计数器
pub struct ElapsedTicker {
    seconds: watch::Receiver<u64>,
    task: Option<JoinHandle<()>>,
}

impl ElapsedTicker {
    pub fn start() -> Self {
        let (tx, rx) = watch::channel(0u64);
        let task = tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tx.send_modify(|s| *s += 1);
            }
        });
        Self {
            seconds: rx,
            task: Some(task),
        }
    }

    pub fn seconds(&self) -> u64 {
        *self.seconds.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.seconds.clone()
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ElapsedTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// `mm:ss`
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
