//! 后台任务停止信号
//!
//! 电平触发：`trigger()` 之后所有 `triggered()` 立即返回，直到下次 `reset()`。
//! 在 `start()` 之前调用的 `stop()` 不会让下一次运行提前醒来。

use tokio::sync::watch;

pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// 进入运行状态，清除上一次的停止信号
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// 等待停止信号
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}
