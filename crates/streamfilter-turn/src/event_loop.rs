//! 遅延ターンキューと最小のローカル Future 実行器

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::sync::Arc;
use alloc::task::Wake;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::future::Future;
use core::pin::Pin;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::{Context, Poll, Waker};

type Task = Box<dyn FnOnce()>;
type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Future の起床フラグ
///
/// Waker は `Send + Sync` を要求するため、フラグだけを Arc で共有する。
/// Future 本体は `!Send` のままループ内に留まる。
struct WakeFlag {
    woken: AtomicBool,
}

impl Wake for WakeFlag {
    fn wake(self: Arc<Self>) {
        self.woken.store(true, Ordering::Release);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.woken.store(true, Ordering::Release);
    }
}

/// spawn_local で登録された Future
struct SpawnedFuture {
    future: LocalFuture,
    flag: Arc<WakeFlag>,
}

impl SpawnedFuture {
    fn is_woken(&self) -> bool {
        self.flag.woken.load(Ordering::Acquire)
    }
}

struct LoopState {
    /// 次のターン以降に実行するタスク（FIFO）
    tasks: VecDeque<Task>,
    /// 完了していないローカル Future
    futures: Vec<SpawnedFuture>,
    /// 実行済みターン数（統計用）
    turns: u64,
}

/// 協調スケジューリングのイベントループ
///
/// クローンは同じキューを共有するハンドルになる。
/// タスクの実行中は内部状態を借用しないため、タスクの中から
/// `defer` / `spawn_local` を呼んでもよい（それらは次以降のターンで実行される）。
///
/// ## スレッド安全性
///
/// `Rc` ベースのため `!Send + !Sync`。単一スレッドからのみ駆動する前提。
#[derive(Clone)]
pub struct EventLoop {
    state: Rc<RefCell<LoopState>>,
}

impl EventLoop {
    /// 空のイベントループを生成する
    pub fn new() -> Self {
        EventLoop {
            state: Rc::new(RefCell::new(LoopState {
                tasks: VecDeque::new(),
                futures: Vec::new(),
                turns: 0,
            })),
        }
    }

    /// タスクを後のターンに遅延する
    ///
    /// 呼び出し元のスタック上では決して実行されない。
    pub fn defer<F>(&self, task: F)
    where
        F: FnOnce() + 'static,
    {
        self.state.borrow_mut().tasks.push_back(Box::new(task));
    }

    /// ローカル Future を登録する
    ///
    /// 登録直後は起床済みとして扱い、次にタスクキューが空になったターンで poll される。
    pub fn spawn_local<F>(&self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        self.state.borrow_mut().futures.push(SpawnedFuture {
            future: Box::pin(future),
            flag: Arc::new(WakeFlag {
                woken: AtomicBool::new(true),
            }),
        });
    }

    /// 1 ターン進める
    ///
    /// # 戻り値
    /// - `true`: タスクを 1 件実行した、または起床済み Future を poll した
    /// - `false`: 何もすることがなかった（idle）
    pub fn turn(&self) -> bool {
        let task = self.state.borrow_mut().tasks.pop_front();
        if let Some(task) = task {
            self.state.borrow_mut().turns += 1;
            task();
            return true;
        }
        self.poll_woken()
    }

    /// idle になるまでターンを進め、実行したターン数を返す
    pub fn run_until_idle(&self) -> u64 {
        let mut executed = 0;
        while self.turn() {
            executed += 1;
        }
        tracing::trace!(executed, "event loop idle");
        executed
    }

    /// 上限付きで idle になるまでターンを進める
    ///
    /// # エラー
    /// - `limit` ターン実行しても idle にならなかった（自己再スケジュールの疑い）
    pub fn run_with_limit(&self, limit: u64) -> Result<u64, TurnLimitExceeded> {
        let mut executed = 0;
        while executed < limit {
            if !self.turn() {
                return Ok(executed);
            }
            executed += 1;
        }
        if self.is_idle() {
            Ok(executed)
        } else {
            tracing::warn!(limit, "event loop did not settle");
            Err(TurnLimitExceeded { limit })
        }
    }

    /// 実行待ちのタスク数
    pub fn pending_tasks(&self) -> usize {
        self.state.borrow().tasks.len()
    }

    /// 完了していない（起床待ちを含む）Future 数
    pub fn parked_futures(&self) -> usize {
        self.state.borrow().futures.len()
    }

    /// 次のターンで実行できるものが何もないか
    pub fn is_idle(&self) -> bool {
        let state = self.state.borrow();
        state.tasks.is_empty() && !state.futures.iter().any(SpawnedFuture::is_woken)
    }

    /// これまでに実行したターン数
    pub fn turns(&self) -> u64 {
        self.state.borrow().turns
    }

    /// 起床済み Future をまとめて poll する
    fn poll_woken(&self) -> bool {
        let woken: Vec<SpawnedFuture> = {
            let mut state = self.state.borrow_mut();
            let (woken, parked): (Vec<_>, Vec<_>) = core::mem::take(&mut state.futures)
                .into_iter()
                .partition(SpawnedFuture::is_woken);
            state.futures = parked;
            woken
        };
        if woken.is_empty() {
            return false;
        }

        self.state.borrow_mut().turns += 1;
        for mut spawned in woken {
            // poll 中に wake された場合に備え、poll の前にフラグを下ろす
            spawned.flag.woken.store(false, Ordering::Release);
            let waker = Waker::from(spawned.flag.clone());
            let mut cx = Context::from_waker(&waker);
            match spawned.future.as_mut().poll(&mut cx) {
                Poll::Ready(()) => {}
                Poll::Pending => self.state.borrow_mut().futures.push(spawned),
            }
        }
        true
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("EventLoop")
            .field("pending_tasks", &state.tasks.len())
            .field("futures", &state.futures.len())
            .field("turns", &state.turns)
            .finish()
    }
}

/// ターン上限に達しても idle にならなかった
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnLimitExceeded {
    /// 指定された上限
    pub limit: u64,
}

impl core::fmt::Display for TurnLimitExceeded {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Event loop did not become idle within {} turns", self.limit)
    }
}

impl core::error::Error for TurnLimitExceeded {}
