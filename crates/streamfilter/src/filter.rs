//! FilterStage: 述語の評価と、プライマリ出力 / restore チャンネルへの振り分け
//!
//! ## 状態遷移
//!
//! ```text
//! Idle ──process──→ InFlight ──done──→ Idle
//!   │                  │
//!   │                  └─finalize→ (done の後のターンで) Ended
//!   └─finalize──────────────────────────────────────→ Ended
//!
//! 任意の状態 ──fail──→ Failed（プライマリ出力と restore の両方を停止）
//! ```
//!
//! 上流は前の `process` の continuation が呼ばれるまで次を送らない。
//! 迂回アイテムの continuation は restore 消費者への配送後にしか
//! 呼ばれないので、restore 側の背圧はそのまま上流に伝わる。

use alloc::rc::{Rc, Weak};
use core::cell::RefCell;

use serde::Serialize;
use streamfilter_core::{
    BufferedRestore, Continuation, Encoding, PassthroughRestore, RestoreChannel,
    StreamFilterError,
};
use streamfilter_turn::EventLoop;

use crate::options::StreamFilterOptions;
use crate::output::PrimaryOutput;
use crate::predicate::{Decide, Predicate};

/// フィルタ統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    /// 受け付けたアイテム数
    pub processed: u64,
    /// プライマリ出力に流した数
    pub forwarded: u64,
    /// restore チャンネルへ迂回した数
    pub diverted: u64,
    /// restore 無効で破棄した数
    pub dropped: u64,
}

#[derive(Default)]
struct FilterState {
    /// 述語の判定または restore 配送を待っているアイテムがある
    in_flight: bool,
    /// finalize が呼ばれた（以後の process は拒否）
    finalize_requested: bool,
    /// 述語の判定を待っているアイテムの上流 continuation
    awaiting_decision: Option<Continuation>,
    /// in-flight のアイテムが片付くのを待っている finalize
    pending_finalize: Option<Continuation>,
    /// プライマリ出力を閉じた
    stream_ended: bool,
    /// restore に EndSentinel を積んだ
    end_enqueued: bool,
    failure: Option<StreamFilterError>,
    stats: FilterStats,
}

impl Drop for FilterState {
    fn drop(&mut self) {
        // ステージごと破棄された: 待っている上流を解放する
        if let Some(done) = self.awaiting_decision.take() {
            done.reject(StreamFilterError::Aborted);
        }
        if let Some(done) = self.pending_finalize.take() {
            done.reject(StreamFilterError::Aborted);
        }
    }
}

struct FilterInner<T> {
    predicate: RefCell<Predicate<T>>,
    options: StreamFilterOptions,
    output: PrimaryOutput<T>,
    restore: Option<RestoreChannel<T>>,
    state: RefCell<FilterState>,
    event_loop: EventLoop,
}

/// フィルタステージ
///
/// クローンは同じステージを共有するハンドル。
pub struct StreamFilter<T> {
    inner: Rc<FilterInner<T>>,
}

impl<T> Clone for StreamFilter<T> {
    fn clone(&self) -> Self {
        StreamFilter {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> StreamFilter<T> {
    /// 専用のイベントループでフィルタを生成する
    ///
    /// # エラー
    /// - `InvalidOptions`: オプションが不正
    pub fn new(
        predicate: Predicate<T>,
        options: StreamFilterOptions,
    ) -> Result<Self, StreamFilterError> {
        Self::with_event_loop(predicate, options, EventLoop::new())
    }

    /// 既存のイベントループを共有してフィルタを生成する
    ///
    /// 同じパイプライン内のステージはループを共有する必要がある。
    pub fn with_event_loop(
        predicate: Predicate<T>,
        options: StreamFilterOptions,
        event_loop: EventLoop,
    ) -> Result<Self, StreamFilterError> {
        options.validate()?;

        let restore = if !options.restore {
            None
        } else if options.is_passthrough() {
            Some(RestoreChannel::Passthrough(PassthroughRestore::new(
                event_loop.clone(),
                options.effective_high_water_mark(),
            )))
        } else {
            Some(RestoreChannel::Buffered(BufferedRestore::new(
                event_loop.clone(),
            )))
        };

        tracing::debug!(
            restore = options.restore,
            passthrough = options.is_passthrough(),
            "stream filter created"
        );

        let inner = Rc::new(FilterInner {
            predicate: RefCell::new(predicate),
            options,
            output: PrimaryOutput::new(),
            restore,
            state: RefCell::new(FilterState::default()),
            event_loop,
        });

        if let Some(RestoreChannel::Passthrough(channel)) = &inner.restore {
            let handle = Rc::downgrade(&inner);
            channel.on_writer_finish(move || {
                if let Some(filter) = upgrade(&handle) {
                    filter.on_writer_finished();
                }
            });
        }

        Ok(StreamFilter { inner })
    }

    /// 1 件のアイテムを処理する
    ///
    /// `done` は一致しなければプライマリ出力に積んだ直後、一致して
    /// restore が無効なら破棄した直後、restore が有効なら restore
    /// 消費者に配送された後に呼ばれる。
    ///
    /// # エラー
    /// - 失敗済みならその終端エラー
    /// - `StreamEnded`: finalize の後
    /// - `OverlappingProcess`: 前のアイテムの `done` がまだ呼ばれていない
    ///
    /// どのエラーでも `done` は同じエラーで拒否される。
    pub fn process(
        &self,
        item: T,
        encoding: Option<Encoding>,
        done: Continuation,
    ) -> Result<(), StreamFilterError> {
        let refusal = {
            let state = self.inner.state.borrow();
            if let Some(error) = state.failure.clone() {
                Some(error)
            } else if state.finalize_requested {
                Some(StreamFilterError::StreamEnded)
            } else if state.in_flight {
                Some(StreamFilterError::OverlappingProcess)
            } else {
                None
            }
        };
        if let Some(error) = refusal {
            tracing::error!(code = error.code(), "process refused");
            done.reject(error.clone());
            return Err(error);
        }

        {
            let mut state = self.inner.state.borrow_mut();
            state.in_flight = true;
            state.stats.processed += 1;
        }

        let handle = Rc::downgrade(&self.inner);
        let done = done.preceded_by({
            let handle = handle.clone();
            move |_| {
                if let Some(filter) = upgrade(&handle) {
                    filter.release_in_flight();
                }
            }
        });
        // 判定前に fail されても拒否できるよう、ステージ側で保持する
        self.inner.state.borrow_mut().awaiting_decision = Some(done);

        let decide = Decide::new(Some(Rc::new({
            let handle = handle.clone();
            move |error: StreamFilterError| {
                if let Some(filter) = upgrade(&handle) {
                    filter.fail(error);
                }
            }
        })));

        let pending = {
            let mut predicate = self.inner.predicate.borrow_mut();
            match &mut *predicate {
                Predicate::Callback(f) => {
                    f(&item, encoding.as_ref(), decide.clone());
                    None
                }
                Predicate::Future(f) => Some(f(&item, encoding.as_ref())),
            }
        };

        if let Some(future) = pending {
            if decide.expect_promise() {
                let resolver = decide.clone();
                self.inner.event_loop.spawn_local(async move {
                    let outcome = future.await;
                    let _ = resolver.resolve(outcome);
                });
            }
        }

        decide.on_decision(move |outcome| {
            if let Some(filter) = upgrade(&handle) {
                filter.apply(item, encoding, outcome);
            }
        });
        Ok(())
    }

    /// 上流の終了を通知する
    ///
    /// プライマリ出力を閉じ、restore チャンネルに EndSentinel を積む。
    /// passthrough では外部 writer の finish も揃うまで EndSentinel を保留する。
    /// アイテムが in-flight なら、その `done` の後のターンまで遅らせる。
    ///
    /// # エラー
    /// - 失敗済みならその終端エラー
    /// - `StreamEnded`: 二重の finalize
    pub fn finalize(&self, done: Continuation) -> Result<(), StreamFilterError> {
        let step = {
            let state = self.inner.state.borrow();
            if let Some(error) = state.failure.clone() {
                Err(error)
            } else if state.finalize_requested {
                Err(StreamFilterError::StreamEnded)
            } else {
                Ok(state.in_flight)
            }
        };
        match step {
            Err(error) => {
                tracing::error!(code = error.code(), "finalize refused");
                done.reject(error.clone());
                Err(error)
            }
            Ok(in_flight) => {
                self.inner.state.borrow_mut().finalize_requested = true;
                if in_flight {
                    tracing::debug!("finalize deferred until in-flight item settles");
                    self.inner.state.borrow_mut().pending_finalize = Some(done);
                } else {
                    self.finalize_now(done);
                }
                Ok(())
            }
        }
    }

    /// 終端エラーで停止する
    ///
    /// 最初の呼び出しだけが有効。プライマリ出力と restore チャンネルの
    /// 両方に同じエラーを伝え、判定待ちのアイテムと保留中の finalize の
    /// continuation も拒否する。
    pub fn fail(&self, error: StreamFilterError) {
        let (awaiting, pending) = {
            let mut state = self.inner.state.borrow_mut();
            if state.failure.is_some() {
                return;
            }
            state.failure = Some(error.clone());
            (state.awaiting_decision.take(), state.pending_finalize.take())
        };
        tracing::error!(code = error.code(), %error, "stream filter failed");

        self.inner.output.fail(error.clone());
        if let Some(channel) = &self.inner.restore {
            channel.fail(error.clone());
        }
        if let Some(done) = awaiting {
            done.reject(error.clone());
        }
        if let Some(done) = pending {
            done.reject(error);
        }
    }

    /// 中断する（`fail(Aborted)`）
    pub fn abort(&self) {
        self.fail(StreamFilterError::Aborted);
    }

    pub fn output(&self) -> &PrimaryOutput<T> {
        &self.inner.output
    }

    /// restore チャンネル（`restore: false` なら None）
    pub fn restore(&self) -> Option<&RestoreChannel<T>> {
        self.inner.restore.as_ref()
    }

    pub fn options(&self) -> &StreamFilterOptions {
        &self.inner.options
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    pub fn stats(&self) -> FilterStats {
        self.inner.state.borrow().stats
    }

    /// プライマリ出力を閉じたか
    pub fn is_ended(&self) -> bool {
        self.inner.state.borrow().stream_ended
    }

    /// 判定または配送を待っているアイテムがあるか
    pub fn is_busy(&self) -> bool {
        self.inner.state.borrow().in_flight
    }

    pub fn failure(&self) -> Option<StreamFilterError> {
        self.inner.state.borrow().failure.clone()
    }

    // ===== Private メソッド =====

    /// 判定結果に従って振り分ける
    fn apply(
        &self,
        item: T,
        encoding: Option<Encoding>,
        outcome: Result<bool, StreamFilterError>,
    ) {
        let awaiting = self.inner.state.borrow_mut().awaiting_decision.take();
        // fail 済みなら continuation は既に拒否されている
        let Some(done) = awaiting else {
            tracing::trace!("decision arrived after failure; item discarded");
            return;
        };
        if let Some(error) = self.failure() {
            done.reject(error);
            return;
        }
        let matched = match outcome {
            Ok(matched) => matched,
            Err(error) => {
                self.fail(error.clone());
                done.reject(error);
                return;
            }
        };

        if !matched {
            self.inner.state.borrow_mut().stats.forwarded += 1;
            self.inner.output.push(item, encoding);
            done.resume();
            return;
        }

        match &self.inner.restore {
            None => {
                self.inner.state.borrow_mut().stats.dropped += 1;
                tracing::trace!("matched item dropped");
                done.resume();
            }
            Some(channel) => {
                self.inner.state.borrow_mut().stats.diverted += 1;
                // done は restore 消費者への配送後に呼ばれる
                if let Err(error) = channel.enqueue(item, encoding, done) {
                    self.fail(error);
                }
            }
        }
    }

    fn release_in_flight(&self) {
        let pending = {
            let mut state = self.inner.state.borrow_mut();
            state.in_flight = false;
            state.pending_finalize.take()
        };
        if let Some(done) = pending {
            // 上流の continuation が終わってから閉じる
            let handle = Rc::downgrade(&self.inner);
            self.inner.event_loop.defer(move || match upgrade(&handle) {
                Some(filter) => filter.finalize_now(done),
                None => done.reject(StreamFilterError::Aborted),
            });
        }
    }

    fn finalize_now(&self, done: Continuation) {
        if let Some(error) = self.failure() {
            done.reject(error);
            return;
        }
        self.inner.state.borrow_mut().stream_ended = true;
        self.inner.output.finish();
        tracing::debug!("primary output finished");

        let ready = match &self.inner.restore {
            None => false,
            Some(RestoreChannel::Buffered(_)) => true,
            Some(RestoreChannel::Passthrough(channel)) => {
                let finished = channel.is_writer_finished();
                if !finished {
                    tracing::debug!("restore end waits for external writer");
                }
                finished
            }
        };
        if ready {
            if let Err(error) = self.end_restore() {
                self.fail(error.clone());
                done.reject(error);
                return;
            }
        }
        done.resume();
    }

    /// passthrough の外部 writer が finish した
    fn on_writer_finished(&self) {
        let ready = {
            let state = self.inner.state.borrow();
            state.stream_ended && state.failure.is_none()
        };
        if ready {
            if let Err(error) = self.end_restore() {
                self.fail(error);
            }
        }
    }

    /// EndSentinel を一度だけ積む
    fn end_restore(&self) -> Result<(), StreamFilterError> {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.end_enqueued {
                return Ok(());
            }
            state.end_enqueued = true;
        }
        match &self.inner.restore {
            Some(channel) => channel.end(),
            None => Ok(()),
        }
    }
}

fn upgrade<T>(handle: &Weak<FilterInner<T>>) -> Option<StreamFilter<T>> {
    handle.upgrade().map(|inner| StreamFilter { inner })
}

impl<T> core::fmt::Debug for StreamFilter<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("StreamFilter")
            .field("restore", &self.inner.options.restore)
            .field("passthrough", &self.inner.options.is_passthrough())
            .field("in_flight", &state.in_flight)
            .field("stream_ended", &state.stream_ended)
            .field("failure", &state.failure)
            .field("stats", &state.stats)
            .finish()
    }
}
