//! RestoreChannel: 2 種類の restore チャンネルのタグ付き共用体

use crate::buffered::BufferedRestore;
use crate::capability::{Sink, Source};
use crate::continuation::Continuation;
use crate::encoding::Encoding;
use crate::error::StreamFilterError;
use crate::passthrough::PassthroughRestore;
use crate::scheduler::{ChannelPhase, SchedulerStats};

/// FilterStage が所有する restore チャンネル
///
/// FilterStage は `enqueue` / `end` / `fail` だけを呼び、内部状態には触れない。
pub enum RestoreChannel<T> {
    /// 読み出し専用
    Buffered(BufferedRestore<T>),
    /// 外部 writer も書き込める
    Passthrough(PassthroughRestore<T>),
}

impl<T> Clone for RestoreChannel<T> {
    fn clone(&self) -> Self {
        match self {
            RestoreChannel::Buffered(channel) => RestoreChannel::Buffered(channel.clone()),
            RestoreChannel::Passthrough(channel) => RestoreChannel::Passthrough(channel.clone()),
        }
    }
}

impl<T: 'static> RestoreChannel<T> {
    pub fn enqueue(
        &self,
        item: T,
        encoding: Option<Encoding>,
        continuation: Continuation,
    ) -> Result<(), StreamFilterError> {
        match self {
            RestoreChannel::Buffered(channel) => channel.enqueue(item, encoding, continuation),
            RestoreChannel::Passthrough(channel) => channel.enqueue(item, encoding, continuation),
        }
    }

    pub fn end(&self) -> Result<(), StreamFilterError> {
        match self {
            RestoreChannel::Buffered(channel) => channel.end(),
            RestoreChannel::Passthrough(channel) => channel.end(),
        }
    }

    pub fn fail(&self, error: StreamFilterError) {
        match self {
            RestoreChannel::Buffered(channel) => channel.fail(error),
            RestoreChannel::Passthrough(channel) => channel.fail(error),
        }
    }

    pub fn phase(&self) -> ChannelPhase {
        match self {
            RestoreChannel::Buffered(channel) => channel.phase(),
            RestoreChannel::Passthrough(channel) => channel.phase(),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        match self {
            RestoreChannel::Buffered(channel) => channel.stats(),
            RestoreChannel::Passthrough(channel) => channel.stats(),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, RestoreChannel::Passthrough(_))
    }

    /// 読み出し側
    pub fn as_source(&self) -> &dyn Source<T> {
        match self {
            RestoreChannel::Buffered(channel) => channel,
            RestoreChannel::Passthrough(channel) => channel,
        }
    }

    /// 書き込み側（passthrough のみ）
    pub fn as_sink(&self) -> Option<&dyn Sink<T>> {
        match self {
            RestoreChannel::Buffered(_) => None,
            RestoreChannel::Passthrough(channel) => Some(channel),
        }
    }

    pub fn as_passthrough(&self) -> Option<&PassthroughRestore<T>> {
        match self {
            RestoreChannel::Buffered(_) => None,
            RestoreChannel::Passthrough(channel) => Some(channel),
        }
    }
}
