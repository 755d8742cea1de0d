//! 层级完成跟踪
//!
//! 每个派生的工作单元持有一个 [`Activity`]，子单元的 Activity 持有父单元
//! Activity 的强引用。父单元主体返回后，只要还有后代在运行，父 Activity
//! 就不会被释放；最后一个引用释放时触发完成通知。

use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct CompletionState {
    done: bool,
    callbacks: Vec<Callback>,
}

/// 层级完成信号
#[derive(Default)]
pub struct Completion {
    state: Mutex<CompletionState>,
    notify: Notify,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// 层级是否已全部完成
    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// 注册完成回调；若已完成则立即调用
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();
        if state.done {
            drop(state);
            callback();
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    /// 等待层级完成
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }

    fn complete(&self) {
        let callbacks = {
            let mut state = self.lock();
            if state.done {
                return;
            }
            state.done = true;
            std::mem::take(&mut state.callbacks)
        };

        for callback in callbacks {
            callback();
        }

        self.notify.notify_waiters();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CompletionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 运行中的工作单元
///
/// 由派生任务独占持有，任务结束时释放。
pub(crate) struct Activity {
    completion: Arc<Completion>,
    _parent: Option<Arc<Activity>>,
}

impl Activity {
    pub(crate) fn new(completion: Arc<Completion>, parent: Option<Arc<Activity>>) -> Self {
        Self {
            completion,
            _parent: parent,
        }
    }
}

impl Drop for Activity {
    fn drop(&mut self) {
        // 先完成自身，再释放父引用 (字段在 drop 之后释放)
        self.completion.complete();
    }
}
