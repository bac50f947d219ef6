//! # streamfilter-turn
//!
//! 単一スレッド協調スケジューリングのためのターンキュー。
//!
//! フィルタと restore チャンネルの状態遷移はすべて「後のターン」に遅延される。
//! 呼び出し元のスタック上で配送を行わないことで、push 側と pull 側の
//! 2 つの状態機械を接続したときに起きる再入ループを防ぐ。
//!
//! ## ターンの流れ
//!
//! ```text
//! defer(task)        → タスクキュー末尾に積む（即時実行しない）
//! spawn_local(fut)   → ローカル Future を登録（起床フラグ付き）
//!
//! turn():
//!   1. タスクキュー先頭があれば 1 件実行
//!   2. なければ起床済み Future をすべて poll
//!   3. どちらもなければ idle
//! ```
//!
//! Node.js の `setImmediate` 相当を明示的な値として持ち運ぶ。
//! グローバルなループは存在せず、同じフィルタに属する部品が同じ
//! `EventLoop` ハンドルを共有する。

#![no_std]
extern crate alloc;

pub mod event_loop;

pub use event_loop::{EventLoop, TurnLimitExceeded};

/// `run_until_idle` 系 API のテストで使う既定のターン上限
pub const DEFAULT_TURN_LIMIT: u64 = 1_000_000;
