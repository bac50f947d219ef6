//! 述語の 2 つの呼び出し規約と、それを 1 つの continuation に正規化する Decide
//!
//! - **コールバック形式**: 述語は渡された `Decide` をちょうど 1 回呼ぶ
//! - **Future 形式**: 述語は判定結果を返す Future を返す
//!
//! どちらも `Decide` の内部スロットに結果を確定させ、FilterStage は
//! スロットに登録した waiter で結果を受け取る。規約違反（二重判定、
//! Future 返却後の判定、判定せずに破棄）はすべてプロトコルエラー。

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;
use core::future::Future;
use core::pin::Pin;

use streamfilter_core::{Encoding, StreamFilterError};

/// Future 形式の述語が返す Future
pub type DecisionFuture = Pin<Box<dyn Future<Output = Result<bool, StreamFilterError>>>>;

type CallbackFn<T> = dyn FnMut(&T, Option<&Encoding>, Decide);
type FutureFn<T> = dyn FnMut(&T, Option<&Encoding>) -> DecisionFuture;

/// フィルタ述語（呼び出し規約ごとのタグ付き共用体）
pub enum Predicate<T> {
    /// `decide(matched)` をちょうど 1 回呼ぶ
    Callback(Box<CallbackFn<T>>),
    /// 判定結果を非同期に返す
    Future(Box<FutureFn<T>>),
}

impl<T> Predicate<T> {
    /// コールバック形式の述語
    pub fn callback<F>(f: F) -> Self
    where
        F: FnMut(&T, Option<&Encoding>, Decide) + 'static,
    {
        Predicate::Callback(Box::new(f))
    }

    /// 同期的に判定できる述語（コールバック形式で即座に decide する）
    pub fn from_fn<F>(mut f: F) -> Self
    where
        F: FnMut(&T, Option<&Encoding>) -> bool + 'static,
    {
        Predicate::callback(move |item: &T, encoding: Option<&Encoding>, decide: Decide| {
            let _ = decide.decide(f(item, encoding));
        })
    }

    /// Future 形式の述語
    pub fn future<F, Fut>(mut f: F) -> Self
    where
        F: FnMut(&T, Option<&Encoding>) -> Fut + 'static,
        Fut: Future<Output = bool> + 'static,
    {
        Predicate::Future(Box::new(
            move |item: &T, encoding: Option<&Encoding>| -> DecisionFuture {
                let pending = f(item, encoding);
                Box::pin(async move { Ok::<bool, StreamFilterError>(pending.await) })
            },
        ))
    }

    /// 失敗しうる Future 形式の述語（`Err` は `PredicateRejected` などとして扱われる）
    pub fn try_future<F, Fut>(mut f: F) -> Self
    where
        F: FnMut(&T, Option<&Encoding>) -> Fut + 'static,
        Fut: Future<Output = Result<bool, StreamFilterError>> + 'static,
    {
        Predicate::Future(Box::new(
            move |item: &T, encoding: Option<&Encoding>| -> DecisionFuture {
                Box::pin(f(item, encoding))
            },
        ))
    }
}

impl<T> core::fmt::Debug for Predicate<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Predicate::Callback(_) => f.write_str("Predicate::Callback"),
            Predicate::Future(_) => f.write_str("Predicate::Future"),
        }
    }
}

type Waiter = Box<dyn FnOnce(Result<bool, StreamFilterError>)>;
type ViolationHook = Rc<dyn Fn(StreamFilterError)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// まだ判定されていない
    Waiting,
    /// 述語が Future（Promise）を返した
    AwaitingPromise,
    Decided,
}

struct DecisionSlot {
    state: SlotState,
    /// waiter 登録前に確定した結果
    outcome: Option<Result<bool, StreamFilterError>>,
    waiter: Option<Waiter>,
    on_violation: Option<ViolationHook>,
}

impl Drop for DecisionSlot {
    fn drop(&mut self) {
        // 判定されないまま破棄された: 上流の continuation を宙に浮かせない
        if let Some(waiter) = self.waiter.take() {
            tracing::error!(code = "E_DECISION_DROPPED", "predicate dropped its decision");
            waiter(Err(StreamFilterError::DecisionDropped));
        }
    }
}

/// 1 回の述語呼び出しに対する判定ハンドル
///
/// クローンは同じスロットを共有する。JS のコールバックのように
/// 複数回呼ばれうる経路でも違反を検出できるよう、`&self` で呼べる。
#[derive(Clone)]
pub struct Decide {
    slot: Rc<RefCell<DecisionSlot>>,
}

impl Decide {
    /// 新しい判定ハンドルを生成する
    ///
    /// # 引数
    /// - `on_violation`: 規約違反時に呼ばれる（FilterStage はここで両チャンネルを停止する）
    pub fn new(on_violation: Option<Rc<dyn Fn(StreamFilterError)>>) -> Self {
        Decide {
            slot: Rc::new(RefCell::new(DecisionSlot {
                state: SlotState::Waiting,
                outcome: None,
                waiter: None,
                on_violation,
            })),
        }
    }

    /// コールバック形式の判定
    ///
    /// # エラー
    /// - `DecidedTwice`: 既に判定済み
    /// - `DecidedAfterPromise`: 述語が Promise を返した後
    pub fn decide(&self, matched: bool) -> Result<(), StreamFilterError> {
        let violation = match self.slot.borrow().state {
            SlotState::Waiting => None,
            SlotState::AwaitingPromise => Some(StreamFilterError::DecidedAfterPromise),
            SlotState::Decided => Some(StreamFilterError::DecidedTwice),
        };
        if let Some(error) = violation {
            self.violate(error.clone());
            return Err(error);
        }
        self.settle(Ok(matched));
        Ok(())
    }

    /// 述語が Promise を返したことを記録する
    ///
    /// # 戻り値
    /// - `true`: Promise の結果を `resolve` で待つ
    /// - `false`: Promise を返す前に `decide` 済み（async 関数の中で同期的に
    ///   判定した場合）。その判定が有効で、Promise の値は無視する
    pub fn expect_promise(&self) -> bool {
        let mut slot = self.slot.borrow_mut();
        match slot.state {
            SlotState::Waiting => {
                slot.state = SlotState::AwaitingPromise;
                true
            }
            SlotState::AwaitingPromise => true,
            SlotState::Decided => false,
        }
    }

    /// Promise 形式の結果を確定する
    ///
    /// # エラー
    /// - `DecidedTwice`: 既に判定済み
    pub fn resolve(&self, outcome: Result<bool, StreamFilterError>) -> Result<(), StreamFilterError> {
        if self.slot.borrow().state == SlotState::Decided {
            self.violate(StreamFilterError::DecidedTwice);
            return Err(StreamFilterError::DecidedTwice);
        }
        self.settle(outcome);
        Ok(())
    }

    /// 判定済みか
    pub fn is_decided(&self) -> bool {
        self.slot.borrow().state == SlotState::Decided
    }

    /// 結果を受け取る waiter を登録する
    ///
    /// 既に確定していれば即座に呼ぶ。
    pub fn on_decision<F>(&self, waiter: F)
    where
        F: FnOnce(Result<bool, StreamFilterError>) + 'static,
    {
        let outcome = self.slot.borrow_mut().outcome.take();
        match outcome {
            Some(outcome) => waiter(outcome),
            None => self.slot.borrow_mut().waiter = Some(Box::new(waiter)),
        }
    }

    fn settle(&self, outcome: Result<bool, StreamFilterError>) {
        let waiter = {
            let mut slot = self.slot.borrow_mut();
            slot.state = SlotState::Decided;
            slot.waiter.take()
        };
        match waiter {
            Some(waiter) => waiter(outcome),
            None => self.slot.borrow_mut().outcome = Some(outcome),
        }
    }

    fn violate(&self, error: StreamFilterError) {
        tracing::error!(code = error.code(), "predicate protocol violation");
        let hook = self.slot.borrow().on_violation.clone();
        if let Some(hook) = hook {
            hook(error);
        }
    }
}

impl core::fmt::Debug for Decide {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Decide")
            .field("state", &self.slot.borrow().state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn recorder() -> (Rc<RefCell<Vec<Result<bool, StreamFilterError>>>>, impl FnOnce(Result<bool, StreamFilterError>)) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let slot = seen.clone();
        (seen, move |outcome: Result<bool, StreamFilterError>| {
            slot.borrow_mut().push(outcome)
        })
    }

    #[test]
    fn test_decision_before_waiter_is_kept() {
        let decide = Decide::new(None);
        decide.decide(true).unwrap();
        let (seen, waiter) = recorder();
        decide.on_decision(waiter);
        assert_eq!(*seen.borrow(), vec![Ok(true)]);
    }

    #[test]
    fn test_decision_after_waiter_is_delivered() {
        let decide = Decide::new(None);
        let (seen, waiter) = recorder();
        decide.on_decision(waiter);
        assert!(seen.borrow().is_empty());
        decide.decide(false).unwrap();
        assert_eq!(*seen.borrow(), vec![Ok(false)]);
    }

    #[test]
    fn test_second_decision_is_a_violation() {
        let violations = Rc::new(RefCell::new(Vec::new()));
        let sink = violations.clone();
        let decide = Decide::new(Some(Rc::new(move |e| sink.borrow_mut().push(e))));
        let (seen, waiter) = recorder();
        decide.on_decision(waiter);

        decide.decide(true).unwrap();
        assert_eq!(decide.decide(false), Err(StreamFilterError::DecidedTwice));
        assert_eq!(*violations.borrow(), vec![StreamFilterError::DecidedTwice]);
        assert_eq!(*seen.borrow(), vec![Ok(true)], "最初の判定だけが有効");
    }

    #[test]
    fn test_decide_after_promise_is_a_violation() {
        let decide = Decide::new(None);
        assert!(decide.expect_promise());
        assert_eq!(decide.decide(true), Err(StreamFilterError::DecidedAfterPromise));
        assert!(!decide.is_decided());
        decide.resolve(Ok(true)).unwrap();
        assert!(decide.is_decided());
    }

    #[test]
    fn test_decision_before_promise_is_kept() {
        let violations = Rc::new(RefCell::new(Vec::new()));
        let sink = violations.clone();
        let decide = Decide::new(Some(Rc::new(move |e| sink.borrow_mut().push(e))));
        let (seen, waiter) = recorder();
        decide.on_decision(waiter);

        // async 関数が await より前に decide を呼んだ
        decide.decide(true).unwrap();
        assert!(!decide.expect_promise(), "Promise の値は待たない");
        assert!(violations.borrow().is_empty());
        assert_eq!(*seen.borrow(), vec![Ok(true)]);
    }

    #[test]
    fn test_dropped_decision_rejects_waiter() {
        let (seen, waiter) = recorder();
        {
            let decide = Decide::new(None);
            decide.on_decision(waiter);
        }
        assert_eq!(*seen.borrow(), vec![Err(StreamFilterError::DecisionDropped)]);
    }
}
