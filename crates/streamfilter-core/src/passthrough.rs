//! PassthroughRestore: 外部 writer も書き込める restore チャンネル
//!
//! 迂回アイテムと外部 writer の書き込みは同じ PushScheduler に
//! 到着順で積まれる。EndSentinel を積むのは FilterStage 側の責任で、
//! 両側（FilterStage の finalize と外部 writer の finish）が揃ってから行う。

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;

use streamfilter_turn::EventLoop;

use crate::capability::{ItemHandler, ReadableListener, Sink, Source};
use crate::continuation::Continuation;
use crate::encoding::Encoding;
use crate::error::StreamFilterError;
use crate::scheduler::{ChannelPhase, PushScheduler, SchedulerStats};

struct WriterState {
    /// 外部 writer が finish したか
    finished: bool,
    /// finish 時に一度だけ呼ぶフック
    on_finish: Option<Box<dyn FnOnce()>>,
}

/// Sink + Source を公開する restore チャンネル
pub struct PassthroughRestore<T> {
    scheduler: PushScheduler<T>,
    writer: Rc<RefCell<WriterState>>,
    high_water_mark: usize,
}

impl<T> Clone for PassthroughRestore<T> {
    fn clone(&self) -> Self {
        PassthroughRestore {
            scheduler: self.scheduler.clone(),
            writer: self.writer.clone(),
            high_water_mark: self.high_water_mark,
        }
    }
}

impl<T: 'static> PassthroughRestore<T> {
    /// 新しいチャンネルを生成する
    ///
    /// # 引数
    /// - `high_water_mark`: `write` が `false` を返し始めるキュー長
    pub fn new(event_loop: EventLoop, high_water_mark: usize) -> Self {
        PassthroughRestore {
            scheduler: PushScheduler::new("restore-passthrough", event_loop),
            writer: Rc::new(RefCell::new(WriterState {
                finished: false,
                on_finish: None,
            })),
            high_water_mark,
        }
    }

    /// FilterStage からの迂回アイテムを積む
    pub fn enqueue(
        &self,
        item: T,
        encoding: Option<Encoding>,
        continuation: Continuation,
    ) -> Result<(), StreamFilterError> {
        self.scheduler.enqueue(item, encoding, continuation)
    }

    /// EndSentinel を積む
    pub fn end(&self) -> Result<(), StreamFilterError> {
        self.scheduler.end(Continuation::noop())
    }

    pub fn fail(&self, error: StreamFilterError) {
        self.scheduler.fail(error);
    }

    pub fn phase(&self) -> ChannelPhase {
        self.scheduler.phase()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// 外部 writer が finish 済みか
    pub fn is_writer_finished(&self) -> bool {
        self.writer.borrow().finished
    }

    /// 外部 writer の finish 時に呼ぶフックを登録する
    ///
    /// 既に finish 済みなら即座に呼ぶ。
    pub fn on_writer_finish<F>(&self, hook: F)
    where
        F: FnOnce() + 'static,
    {
        {
            let mut writer = self.writer.borrow_mut();
            if !writer.finished {
                writer.on_finish = Some(Box::new(hook));
                return;
            }
        }
        hook();
    }
}

impl<T: 'static> Source<T> for PassthroughRestore<T> {
    fn on_item(&self, handler: ItemHandler<T>) {
        self.scheduler.on_item(handler);
    }

    fn on_readable(&self, listener: ReadableListener) {
        self.scheduler.on_readable(listener);
    }

    fn pull(&self) {
        self.scheduler.pull();
    }
}

impl<T: 'static> Sink<T> for PassthroughRestore<T> {
    fn write(
        &self,
        item: T,
        encoding: Option<Encoding>,
        done: Continuation,
    ) -> Result<bool, StreamFilterError> {
        if self.writer.borrow().finished {
            tracing::error!(code = "E_WRITE_AFTER_FINISH", "external write after finish");
            done.reject(StreamFilterError::WriteAfterFinish);
            // 観測したチャネルの終端エラーとして伝える
            self.scheduler.fail(StreamFilterError::WriteAfterFinish);
            return Err(StreamFilterError::WriteAfterFinish);
        }
        self.scheduler.enqueue(item, encoding, done)?;
        Ok(self.scheduler.queued() < self.high_water_mark)
    }

    fn finish(&self) -> Result<(), StreamFilterError> {
        if let Some(error) = self.scheduler.failure() {
            return Err(error);
        }
        let hook = {
            let mut writer = self.writer.borrow_mut();
            if writer.finished {
                return Ok(());
            }
            writer.finished = true;
            writer.on_finish.take()
        };
        tracing::debug!("external writer finished");
        if let Some(hook) = hook {
            hook();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::SourceEvent;
    use alloc::vec;
    use alloc::vec::Vec;

    #[test]
    fn test_write_reports_high_water_mark() {
        let ev = EventLoop::new();
        let channel: PassthroughRestore<u32> = PassthroughRestore::new(ev.clone(), 2);
        assert_eq!(channel.write(1, None, Continuation::noop()), Ok(true));
        assert_eq!(channel.write(2, None, Continuation::noop()), Ok(false));

        channel.on_item(Box::new(|_| true));
        ev.run_until_idle();
        assert_eq!(channel.write(3, None, Continuation::noop()), Ok(true));
    }

    #[test]
    fn test_writes_and_diversions_share_arrival_order() {
        let ev = EventLoop::new();
        let channel = PassthroughRestore::new(ev.clone(), 16);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        channel.on_item(Box::new(move |event| {
            if let SourceEvent::Item { item, .. } = event {
                sink.borrow_mut().push(item);
            }
            true
        }));

        channel.write("x1", None, Continuation::noop()).unwrap();
        channel.enqueue("b", None, Continuation::noop()).unwrap();
        channel.write("x2", None, Continuation::noop()).unwrap();
        ev.run_until_idle();
        assert_eq!(*seen.borrow(), vec!["x1", "b", "x2"]);
    }

    #[test]
    fn test_finish_fires_hook_once_and_rejects_later_writes() {
        let ev = EventLoop::new();
        let channel: PassthroughRestore<u32> = PassthroughRestore::new(ev, 16);
        let fired = Rc::new(RefCell::new(0u32));
        let counter = fired.clone();
        channel.on_writer_finish(move || *counter.borrow_mut() += 1);

        channel.finish().unwrap();
        channel.finish().unwrap();
        assert_eq!(*fired.borrow(), 1);
        assert!(channel.is_writer_finished());

        assert_eq!(
            channel.write(1, None, Continuation::noop()),
            Err(StreamFilterError::WriteAfterFinish)
        );
        assert_eq!(channel.phase(), ChannelPhase::Failed);
        assert_eq!(channel.finish(), Err(StreamFilterError::WriteAfterFinish));

        // finish 後に登録したフックは即座に呼ばれる
        let late = Rc::new(RefCell::new(false));
        let flag = late.clone();
        channel.on_writer_finish(move || *flag.borrow_mut() = true);
        assert!(*late.borrow());
    }
}
