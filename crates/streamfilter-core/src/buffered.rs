//! BufferedRestore: 読み出し専用の restore チャンネル

use streamfilter_turn::EventLoop;

use crate::capability::{ItemHandler, ReadableListener, Source};
use crate::continuation::Continuation;
use crate::encoding::Encoding;
use crate::error::StreamFilterError;
use crate::scheduler::{ChannelPhase, PushScheduler, SchedulerStats};

/// Source のみを公開する restore チャンネル
///
/// enqueue するのは FilterStage だけ。EndSentinel の後は enqueue できない。
pub struct BufferedRestore<T> {
    scheduler: PushScheduler<T>,
}

impl<T> Clone for BufferedRestore<T> {
    fn clone(&self) -> Self {
        BufferedRestore {
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T: 'static> BufferedRestore<T> {
    /// 新しいチャンネルを生成する
    pub fn new(event_loop: EventLoop) -> Self {
        BufferedRestore {
            scheduler: PushScheduler::new("restore", event_loop),
        }
    }

    /// 迂回アイテムを積む（`continuation` は配送後に発火）
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
}

impl<T: 'static> Source<T> for BufferedRestore<T> {
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
