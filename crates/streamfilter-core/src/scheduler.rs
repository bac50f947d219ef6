//! PushScheduler: 非同期 enqueue と同期的な消費者 pull の仲介
//!
//! 配送待ちキュー（FIFO）と需要フラグ（クレジット）だけを持つ
//! 単一生産者・単一消費者のメールボックス。
//!
//! ## 配送の流れ
//!
//! ```text
//! enqueue(item, done)
//!   1. キュー末尾に積む
//!   2. attempt_delivery を後のターンに予約（インラインでは決して配送しない）
//!   3. 「データあり」を通知
//!
//! attempt_delivery (後のターン)
//!   需要なし → 後のターンで「データあり」を再通知して終わり
//!   需要あり → 先頭を取り出して deliver → 需要 = deliver の戻り値 → done()
//!
//! pull()
//!   需要 = true → attempt_delivery を後のターンに予約
//! ```

use alloc::collections::VecDeque;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;

use serde::Serialize;
use streamfilter_turn::EventLoop;

use crate::capability::{ItemHandler, ReadableListener, SourceEvent};
use crate::continuation::Continuation;
use crate::encoding::Encoding;
use crate::error::StreamFilterError;

/// チャンネルのライフサイクル
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    /// enqueue を受け付ける
    Open,
    /// EndSentinel が積まれた。残りを配送中
    Draining,
    /// EndSentinel を配送済み（終端・不可逆）
    Closed,
    /// 終端エラーで停止（終端・不可逆）
    Failed,
}

impl ChannelPhase {
    /// これ以上状態が変わらないか
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelPhase::Closed | ChannelPhase::Failed)
    }
}

/// 配送待ちエントリ
enum PendingDelivery<T> {
    Item {
        item: T,
        encoding: Option<Encoding>,
        continuation: Continuation,
    },
    End {
        continuation: Continuation,
    },
}

impl<T> PendingDelivery<T> {
    fn into_continuation(self) -> Continuation {
        match self {
            PendingDelivery::Item { continuation, .. } => continuation,
            PendingDelivery::End { continuation } => continuation,
        }
    }
}

/// スケジューラ統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// 受け付けたエントリ数（EndSentinel を含む）
    pub enqueued: u64,
    /// 消費者に配送したエントリ数（EndSentinel を含む）
    pub delivered: u64,
    /// 拒否した continuation 数
    pub rejected: u64,
    /// 現在のキュー長
    pub queued: usize,
}

struct SchedulerState<T> {
    /// 配送待ちキュー（挿入順 == 配送順）
    queue: VecDeque<PendingDelivery<T>>,
    /// 消費者が次の 1 件を受け取れるか。配送中は false
    demand: bool,
    phase: ChannelPhase,
    /// 配送中は取り出されて None になる
    consumer: Option<ItemHandler<T>>,
    readable: Option<ReadableListener>,
    failure: Option<StreamFilterError>,
    failure_reported: bool,
    enqueued: u64,
    delivered: u64,
    rejected: u64,
}

impl<T> Drop for SchedulerState<T> {
    fn drop(&mut self) {
        // 生産者を永久にブロックさせないよう、残りはすべて拒否する
        for pending in self.queue.drain(..) {
            pending.into_continuation().reject(StreamFilterError::Aborted);
        }
    }
}

/// 需要フラグ付き FIFO 配送スケジューラ
///
/// クローンは同じ状態を共有するハンドル。状態の寿命はチャンネルと同じで、
/// 後のターンに予約されたタスクは弱参照しか持たない（チャンネル破棄後は何もしない）。
pub struct PushScheduler<T> {
    state: Rc<RefCell<SchedulerState<T>>>,
    event_loop: EventLoop,
    name: &'static str,
}

impl<T> Clone for PushScheduler<T> {
    fn clone(&self) -> Self {
        PushScheduler {
            state: self.state.clone(),
            event_loop: self.event_loop.clone(),
            name: self.name,
        }
    }
}

/// 遅延タスク用の弱いハンドル
struct WeakScheduler<T> {
    state: Weak<RefCell<SchedulerState<T>>>,
    event_loop: EventLoop,
    name: &'static str,
}

impl<T: 'static> WeakScheduler<T> {
    fn upgrade(&self) -> Option<PushScheduler<T>> {
        self.state.upgrade().map(|state| PushScheduler {
            state,
            event_loop: self.event_loop.clone(),
            name: self.name,
        })
    }
}

impl<T: 'static> PushScheduler<T> {
    /// 新しいスケジューラを生成する（需要フラグの初期値は true）
    ///
    /// # 引数
    /// - `name`: ログ用のチャンネル名
    /// - `event_loop`: 遅延タスクを積むループ
    pub fn new(name: &'static str, event_loop: EventLoop) -> Self {
        PushScheduler {
            state: Rc::new(RefCell::new(SchedulerState {
                queue: VecDeque::new(),
                demand: true,
                phase: ChannelPhase::Open,
                consumer: None,
                readable: None,
                failure: None,
                failure_reported: false,
                enqueued: 0,
                delivered: 0,
                rejected: 0,
            })),
            event_loop,
            name,
        }
    }

    /// アイテムを配送キューに積む
    ///
    /// `continuation` はアイテムが消費者に渡された後に一度だけ呼ばれる。
    ///
    /// # エラー
    /// - `EnqueueAfterEnd`: EndSentinel の後の enqueue（continuation も同じエラーで拒否し、排出中のチャンネルは Failed になる）
    /// - チャンネルが失敗済みならその終端エラー
    pub fn enqueue(
        &self,
        item: T,
        encoding: Option<Encoding>,
        continuation: Continuation,
    ) -> Result<(), StreamFilterError> {
        self.push_pending(PendingDelivery::Item {
            item,
            encoding,
            continuation,
        })
    }

    /// EndSentinel を積む。以降の enqueue はすべて拒否される
    pub fn end(&self, continuation: Continuation) -> Result<(), StreamFilterError> {
        self.push_pending(PendingDelivery::End { continuation })
    }

    /// 消費者が次の 1 件を受け取れることを通知する
    pub fn pull(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.phase.is_terminal() {
                return;
            }
            state.demand = true;
        }
        self.schedule_attempt();
    }

    /// 配送ハンドラを登録する
    ///
    /// 既に積まれているアイテムは後のターンで配送が試みられる。
    pub fn on_item(&self, handler: ItemHandler<T>) {
        self.state.borrow_mut().consumer = Some(handler);
        self.schedule_attempt();
        self.schedule_failure_report();
    }

    /// 「データあり」通知リスナを登録する
    pub fn on_readable(&self, listener: ReadableListener) {
        self.state.borrow_mut().readable = Some(listener);
    }

    /// 終端エラーで停止する
    ///
    /// 配送待ちの continuation はすべて `error` で拒否され、消費者には
    /// 後のターンで `SourceEvent::Error` が届く。終端状態では何もしない。
    pub fn fail(&self, error: StreamFilterError) {
        let drained: Vec<PendingDelivery<T>> = {
            let mut state = self.state.borrow_mut();
            if state.phase.is_terminal() {
                return;
            }
            state.phase = ChannelPhase::Failed;
            state.demand = false;
            state.failure = Some(error.clone());
            state.rejected += state.queue.len() as u64;
            state.queue.drain(..).collect()
        };
        tracing::warn!(
            channel = self.name,
            code = error.code(),
            rejected = drained.len(),
            "channel failed"
        );
        for pending in drained {
            pending.into_continuation().reject(error.clone());
        }
        self.schedule_failure_report();
    }

    /// 中断する（`fail(Aborted)`）
    pub fn abort(&self) {
        self.fail(StreamFilterError::Aborted);
    }

    /// 現在のフェーズ
    pub fn phase(&self) -> ChannelPhase {
        self.state.borrow().phase
    }

    /// 需要フラグ
    pub fn has_demand(&self) -> bool {
        self.state.borrow().demand
    }

    /// 配送待ちエントリ数
    pub fn queued(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// 終端エラー
    pub fn failure(&self) -> Option<StreamFilterError> {
        self.state.borrow().failure.clone()
    }

    /// 統計
    pub fn stats(&self) -> SchedulerStats {
        let state = self.state.borrow();
        SchedulerStats {
            enqueued: state.enqueued,
            delivered: state.delivered,
            rejected: state.rejected,
            queued: state.queue.len(),
        }
    }

    // ===== Private メソッド =====

    fn downgrade(&self) -> WeakScheduler<T> {
        WeakScheduler {
            state: Rc::downgrade(&self.state),
            event_loop: self.event_loop.clone(),
            name: self.name,
        }
    }

    fn push_pending(&self, pending: PendingDelivery<T>) -> Result<(), StreamFilterError> {
        let refusal = {
            let state = self.state.borrow();
            match state.phase {
                ChannelPhase::Open => None,
                ChannelPhase::Draining | ChannelPhase::Closed => {
                    Some(StreamFilterError::EnqueueAfterEnd)
                }
                ChannelPhase::Failed => Some(
                    state
                        .failure
                        .clone()
                        .unwrap_or(StreamFilterError::Aborted),
                ),
            }
        };
        if let Some(error) = refusal {
            tracing::error!(channel = self.name, code = error.code(), "enqueue refused");
            self.state.borrow_mut().rejected += 1;
            pending.into_continuation().reject(error.clone());
            // 終了後の enqueue はプロトコル違反: 排出中のチャネルも終端エラーにする
            self.fail(error.clone());
            return Err(error);
        }

        let is_end = matches!(pending, PendingDelivery::End { .. });
        {
            let mut state = self.state.borrow_mut();
            state.queue.push_back(pending);
            state.enqueued += 1;
            if is_end {
                state.phase = ChannelPhase::Draining;
            }
        }
        if is_end {
            tracing::debug!(channel = self.name, "end sentinel enqueued");
        }

        // 再入を避けるため配送は必ず後のターン
        self.schedule_attempt();
        self.notify_readable();
        Ok(())
    }

    fn schedule_attempt(&self) {
        let handle = self.downgrade();
        self.event_loop.defer(move || {
            if let Some(scheduler) = handle.upgrade() {
                scheduler.attempt_delivery();
            }
        });
    }

    fn schedule_failure_report(&self) {
        let handle = self.downgrade();
        self.event_loop.defer(move || {
            if let Some(scheduler) = handle.upgrade() {
                scheduler.report_failure();
            }
        });
    }

    fn attempt_delivery(&self) {
        let (phase, demand, has_pending, has_consumer) = {
            let state = self.state.borrow();
            (
                state.phase,
                state.demand,
                !state.queue.is_empty(),
                state.consumer.is_some(),
            )
        };
        if phase.is_terminal() || !has_pending {
            return;
        }
        if !demand {
            // pull なしで準備できた消費者にも届くよう、後のターンで再通知する
            let handle = self.downgrade();
            self.event_loop.defer(move || {
                if let Some(scheduler) = handle.upgrade() {
                    scheduler.notify_readable();
                }
            });
            return;
        }
        if !has_consumer {
            // on_item で登録されたときに再試行される
            return;
        }
        if let Err(error) = self.deliver_next() {
            self.fail(error);
        }
    }

    /// 先頭エントリを 1 件だけ消費者に渡す
    fn deliver_next(&self) -> Result<(), StreamFilterError> {
        let (pending, mut consumer) = {
            let mut state = self.state.borrow_mut();
            if !state.demand {
                return Err(StreamFilterError::DeliveryWithoutDemand);
            }
            let Some(consumer) = state.consumer.take() else {
                return Ok(());
            };
            let Some(pending) = state.queue.pop_front() else {
                state.consumer = Some(consumer);
                return Ok(());
            };
            // 配送中は需要なし: 同時に 2 件以上 in-flight にならない
            state.demand = false;
            (pending, consumer)
        };

        let (event, continuation, is_end) = match pending {
            PendingDelivery::Item {
                item,
                encoding,
                continuation,
            } => (SourceEvent::Item { item, encoding }, continuation, false),
            PendingDelivery::End { continuation } => (SourceEvent::End, continuation, true),
        };

        let wants_more = consumer(event);

        {
            let mut state = self.state.borrow_mut();
            if state.consumer.is_none() {
                state.consumer = Some(consumer);
            }
            state.delivered += 1;
            if is_end {
                state.phase = ChannelPhase::Closed;
                state.demand = false;
            } else if state.phase != ChannelPhase::Failed {
                // 配送中に pull されていればその需要も残す
                state.demand = state.demand || wants_more;
            }
        }
        tracing::trace!(channel = self.name, end = is_end, wants_more, "delivered");

        // 生産者の解放はアイテムがキューを離れた後
        continuation.resume();

        // 消費者が先に登録されずに溜まった分は、需要が続く限り 1 件ずつ流す
        let more = {
            let state = self.state.borrow();
            state.demand && !state.queue.is_empty() && !state.phase.is_terminal()
        };
        if more {
            self.schedule_attempt();
        }
        Ok(())
    }

    fn notify_readable(&self) {
        let listener = self.state.borrow_mut().readable.take();
        if let Some(mut listener) = listener {
            listener();
            let mut state = self.state.borrow_mut();
            if state.readable.is_none() {
                state.readable = Some(listener);
            }
        }
    }

    fn report_failure(&self) {
        let (error, mut consumer) = {
            let mut state = self.state.borrow_mut();
            if state.failure_reported {
                return;
            }
            let Some(error) = state.failure.clone() else {
                return;
            };
            let Some(consumer) = state.consumer.take() else {
                return;
            };
            state.failure_reported = true;
            (error, consumer)
        };
        let _ = consumer(SourceEvent::Error(error));
        let mut state = self.state.borrow_mut();
        if state.consumer.is_none() {
            state.consumer = Some(consumer);
        }
    }
}

impl<T> core::fmt::Debug for PushScheduler<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("PushScheduler")
            .field("name", &self.name)
            .field("phase", &state.phase)
            .field("demand", &state.demand)
            .field("queued", &state.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::vec;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    /// 配送イベントを記録し、常に需要ありを返す消費者
    fn recording_consumer(log: Log, names: Rc<RefCell<Vec<u32>>>) -> ItemHandler<u32> {
        Box::new(move |event| {
            match event {
                SourceEvent::Item { item, .. } => {
                    log.borrow_mut().push("deliver");
                    names.borrow_mut().push(item);
                }
                SourceEvent::End => log.borrow_mut().push("end"),
                SourceEvent::Error(_) => log.borrow_mut().push("error"),
            }
            true
        })
    }

    fn resume_logger(log: &Log) -> Continuation {
        let log = log.clone();
        Continuation::new(move |r| log.borrow_mut().push(if r.is_ok() { "resume" } else { "reject" }))
    }

    #[test]
    fn test_enqueue_never_delivers_inline() {
        let ev = EventLoop::new();
        let sched = PushScheduler::new("test", ev.clone());
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let items = Rc::new(RefCell::new(Vec::new()));
        sched.on_item(recording_consumer(log.clone(), items.clone()));

        sched.enqueue(1, None, resume_logger(&log)).unwrap();
        assert!(log.borrow().is_empty(), "enqueue の中で配送してはならない");

        ev.run_until_idle();
        assert_eq!(*log.borrow(), vec!["deliver", "resume"]);
        assert_eq!(*items.borrow(), vec![1]);
    }

    #[test]
    fn test_fifo_order_and_single_flight() {
        let ev = EventLoop::new();
        let sched = PushScheduler::new("test", ev.clone());
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let items = Rc::new(RefCell::new(Vec::new()));
        sched.on_item(recording_consumer(log.clone(), items.clone()));

        for i in 0..10u32 {
            sched.enqueue(i, None, resume_logger(&log)).unwrap();
        }
        ev.run_until_idle();

        assert_eq!(*items.borrow(), (0..10).collect::<Vec<_>>());
        // deliver と resume が必ず交互に並ぶ（前の continuation 前に次を配送しない）
        for pair in log.borrow().chunks(2) {
            assert_eq!(pair, ["deliver", "resume"]);
        }
    }

    #[test]
    fn test_no_demand_holds_items_until_pull() {
        let ev = EventLoop::new();
        let sched = PushScheduler::new("test", ev.clone());
        let items = Rc::new(RefCell::new(Vec::new()));
        let sink = items.clone();
        // 1 件受け取るたびに需要を取り下げる消費者
        sched.on_item(Box::new(move |event| {
            if let SourceEvent::Item { item, .. } = event {
                sink.borrow_mut().push(item);
            }
            false
        }));

        for i in 0..3u32 {
            sched.enqueue(i, None, Continuation::noop()).unwrap();
        }
        ev.run_until_idle();
        assert_eq!(*items.borrow(), vec![0]);
        assert!(!sched.has_demand());
        assert_eq!(sched.queued(), 2);

        sched.pull();
        ev.run_until_idle();
        assert_eq!(*items.borrow(), vec![0, 1]);

        sched.pull();
        ev.run_until_idle();
        assert_eq!(*items.borrow(), vec![0, 1, 2]);
        assert_eq!(sched.queued(), 0);
    }

    #[test]
    fn test_readable_is_renotified_while_demand_is_withdrawn() {
        let ev = EventLoop::new();
        let sched = PushScheduler::new("test", ev.clone());
        let notified = Rc::new(RefCell::new(0u32));
        let counter = notified.clone();
        sched.on_readable(Box::new(move || *counter.borrow_mut() += 1));
        sched.on_item(Box::new(|_| false));

        sched.enqueue(1, None, Continuation::noop()).unwrap();
        sched.enqueue(2, None, Continuation::noop()).unwrap();
        assert_eq!(*notified.borrow(), 2, "enqueue ごとに通知");

        ev.run_until_idle();
        // 1 件目の配送で需要が取り下げられ、残り 2 回の配送試行はどちらも
        // 後のターンでの再通知になる
        assert_eq!(*notified.borrow(), 4);
        assert_eq!(sched.queued(), 1);
    }

    #[test]
    fn test_continuation_waits_for_consumer() {
        let ev = EventLoop::new();
        let sched = PushScheduler::new("test", ev.clone());
        let log: Log = Rc::new(RefCell::new(Vec::new()));

        sched.enqueue(1, None, resume_logger(&log)).unwrap();
        ev.run_until_idle();
        // 消費者がいない間は生産者を解放しない
        assert!(log.borrow().is_empty());
        assert!(sched.has_demand());

        let items = Rc::new(RefCell::new(Vec::new()));
        sched.on_item(recording_consumer(log.clone(), items));
        ev.run_until_idle();
        assert_eq!(*log.borrow(), vec!["deliver", "resume"]);
    }

    #[test]
    fn test_backlog_drains_after_late_consumer() {
        let ev = EventLoop::new();
        let sched = PushScheduler::new("test", ev.clone());
        for i in 0..4u32 {
            sched.enqueue(i, None, Continuation::noop()).unwrap();
        }
        ev.run_until_idle();
        assert_eq!(sched.queued(), 4);

        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let items = Rc::new(RefCell::new(Vec::new()));
        sched.on_item(recording_consumer(log, items.clone()));
        ev.run_until_idle();
        assert_eq!(*items.borrow(), vec![0, 1, 2, 3]);
        assert_eq!(sched.queued(), 0);
    }

    #[test]
    fn test_end_sentinel_is_last_and_terminal() {
        let ev = EventLoop::new();
        let sched = PushScheduler::new("test", ev.clone());
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let items = Rc::new(RefCell::new(Vec::new()));
        sched.on_item(recording_consumer(log.clone(), items.clone()));

        sched.enqueue(1, None, Continuation::noop()).unwrap();
        sched.enqueue(2, None, Continuation::noop()).unwrap();
        sched.end(Continuation::noop()).unwrap();
        assert_eq!(sched.phase(), ChannelPhase::Draining);

        ev.run_until_idle();
        assert_eq!(*items.borrow(), vec![1, 2]);
        assert_eq!(log.borrow().last(), Some(&"end"));
        assert_eq!(sched.phase(), ChannelPhase::Closed);

        assert_eq!(
            sched.enqueue(4, None, Continuation::noop()),
            Err(StreamFilterError::EnqueueAfterEnd)
        );
        sched.pull();
        ev.run_until_idle();
        assert_eq!(*items.borrow(), vec![1, 2], "Closed の後は配送しない");
    }

    #[test]
    fn test_enqueue_after_end_fails_channel() {
        let ev = EventLoop::new();
        let sched = PushScheduler::new("test", ev.clone());
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let items = Rc::new(RefCell::new(Vec::new()));

        sched.enqueue(1, None, resume_logger(&log)).unwrap();
        sched.end(resume_logger(&log)).unwrap();
        assert_eq!(sched.phase(), ChannelPhase::Draining);

        let err = sched.enqueue(2, None, resume_logger(&log)).unwrap_err();
        assert_eq!(err, StreamFilterError::EnqueueAfterEnd);
        assert_eq!(sched.phase(), ChannelPhase::Failed);
        assert_eq!(sched.failure(), Some(StreamFilterError::EnqueueAfterEnd));
        // 拒否された 1 件に続いて、排出待ちの 2 件も拒否される
        assert_eq!(*log.borrow(), vec!["reject", "reject", "reject"]);
        assert_eq!(sched.queued(), 0);

        sched.on_item(recording_consumer(log.clone(), items.clone()));
        ev.run_until_idle();
        assert!(items.borrow().is_empty());
        assert_eq!(log.borrow().last(), Some(&"error"));
    }

    #[test]
    fn test_delivery_without_demand_is_refused() {
        let ev = EventLoop::new();
        let sched = PushScheduler::new("test", ev.clone());
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let items = Rc::new(RefCell::new(Vec::new()));
        sched.on_item(recording_consumer(log.clone(), items.clone()));
        sched.enqueue(1, None, resume_logger(&log)).unwrap();

        sched.state.borrow_mut().demand = false;
        assert_eq!(sched.deliver_next(), Err(StreamFilterError::DeliveryWithoutDemand));
        assert!(items.borrow().is_empty());
        assert!(log.borrow().is_empty());
        assert_eq!(sched.queued(), 1, "エントリは取り出されない");
    }

    #[test]
    fn test_fail_rejects_pending_and_reports_error() {
        let ev = EventLoop::new();
        let sched = PushScheduler::new("test", ev.clone());
        let log: Log = Rc::new(RefCell::new(Vec::new()));

        sched.enqueue(1, None, resume_logger(&log)).unwrap();
        sched.enqueue(2, None, resume_logger(&log)).unwrap();
        sched.fail(StreamFilterError::DecidedTwice);
        assert_eq!(*log.borrow(), vec!["reject", "reject"]);
        assert_eq!(sched.phase(), ChannelPhase::Failed);
        assert_eq!(sched.stats().rejected, 2);

        let items = Rc::new(RefCell::new(Vec::new()));
        sched.on_item(recording_consumer(log.clone(), items.clone()));
        ev.run_until_idle();
        assert_eq!(log.borrow().last(), Some(&"error"));
        assert!(items.borrow().is_empty());

        assert_eq!(
            sched.enqueue(3, None, Continuation::noop()),
            Err(StreamFilterError::DecidedTwice)
        );
    }

    #[test]
    fn test_drop_rejects_outstanding_continuations() {
        let ev = EventLoop::new();
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        {
            let sched = PushScheduler::new("test", ev.clone());
            sched.enqueue(1, None, resume_logger(&log)).unwrap();
        }
        assert_eq!(*log.borrow(), vec!["reject"]);
        // 予約済みタスクは弱参照なので何も起きない
        ev.run_until_idle();
        assert_eq!(*log.borrow(), vec!["reject"]);
    }

    #[test]
    fn test_reentrant_enqueue_from_consumer_is_deferred() {
        let ev = EventLoop::new();
        let sched = PushScheduler::new("test", ev.clone());
        let items = Rc::new(RefCell::new(Vec::new()));
        let sink = items.clone();
        let inner = sched.clone();
        sched.on_item(Box::new(move |event| {
            if let SourceEvent::Item { item, .. } = event {
                sink.borrow_mut().push(item);
                if item < 3 {
                    // 消費者の中からの enqueue も後のターンで配送される
                    inner.enqueue(item + 10, None, Continuation::noop()).unwrap();
                }
            }
            true
        }));

        sched.enqueue(1, None, Continuation::noop()).unwrap();
        sched.enqueue(2, None, Continuation::noop()).unwrap();
        ev.run_until_idle();
        assert_eq!(*items.borrow(), vec![1, 2, 11, 12]);
    }

    #[test]
    fn test_stats_track_delivery() {
        let ev = EventLoop::new();
        let sched = PushScheduler::new("test", ev.clone());
        sched.on_item(Box::new(|_| true));
        sched.enqueue(1, None, Continuation::noop()).unwrap();
        sched.end(Continuation::noop()).unwrap();
        ev.run_until_idle();

        let stats = sched.stats();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.queued, 0);
    }
}
