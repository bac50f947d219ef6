//! 一度だけ呼ばれる continuation
//!
//! 「この操作を待っている生産者を再開する」コールバック。
//! `self` を消費する API なので、二重呼び出しは型で防がれる。

use alloc::boxed::Box;

use crate::error::StreamFilterError;

type Callback = Box<dyn FnOnce(Result<(), StreamFilterError>)>;

/// 生産者を再開する one-shot コールバック
pub struct Continuation {
    callback: Callback,
}

impl Continuation {
    /// コールバックから生成する
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Result<(), StreamFilterError>) + 'static,
    {
        Continuation {
            callback: Box::new(callback),
        }
    }

    /// 何もしない continuation（EndSentinel 用など）
    pub fn noop() -> Self {
        Continuation::new(|_| {})
    }

    /// 成功として再開する
    pub fn resume(self) {
        (self.callback)(Ok(()))
    }

    /// エラーで拒否する
    pub fn reject(self, error: StreamFilterError) {
        (self.callback)(Err(error))
    }

    /// 結果をそのまま渡す
    pub fn complete(self, result: Result<(), StreamFilterError>) {
        (self.callback)(result)
    }

    /// 元のコールバックより先に `prelude` を実行する continuation を返す
    ///
    /// 上流を解放する前に内部状態（処理中フラグなど）を戻したいときに使う。
    pub fn preceded_by<F>(self, prelude: F) -> Self
    where
        F: FnOnce(&Result<(), StreamFilterError>) + 'static,
    {
        let callback = self.callback;
        Continuation::new(move |result| {
            prelude(&result);
            callback(result)
        })
    }
}

impl core::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Continuation { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    #[test]
    fn test_prelude_runs_before_callback() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let outer = log.clone();
        let inner = log.clone();
        let cont = Continuation::new(move |r| outer.borrow_mut().push(if r.is_ok() { "resume" } else { "reject" }))
            .preceded_by(move |_| inner.borrow_mut().push("prelude"));
        cont.resume();
        assert_eq!(*log.borrow(), vec!["prelude", "resume"]);
    }

    #[test]
    fn test_reject_passes_error() {
        let seen = Rc::new(RefCell::new(None));
        let slot = seen.clone();
        Continuation::new(move |r| *slot.borrow_mut() = Some(r)).reject(StreamFilterError::Aborted);
        assert_eq!(*seen.borrow(), Some(Err(StreamFilterError::Aborted)));
    }
}
