//! # streamfilter-core
//!
//! restore チャンネルの中核: PushScheduler と 2 種類の RestoreChannel。
//!
//! ## 役割分担
//!
//! ```text
//! FilterStage ──enqueue──▶ PushScheduler ──deliver──▶ 消費者 (Source)
//!                 ▲              │
//! 外部 writer ────┘ (Sink)       └─ continuation（配送後に生産者を解放）
//! ```
//!
//! - **PushScheduler**: 配送待ち FIFO キューと需要フラグ（クレジット）を持ち、
//!   非同期な enqueue と消費者の pull を後のターンで仲介する
//! - **BufferedRestore**: Source のみ。enqueue するのは FilterStage だけ
//! - **PassthroughRestore**: Sink + Source。外部 writer の書き込みと
//!   FilterStage からの迂回アイテムを同じキューに到着順で積む
//!
//! ## チャンネルの状態遷移
//!
//! ```text
//! Open → (EndSentinel enqueue) → Draining → (Sentinel 配送) → Closed
//!   └──────────── fail / abort ──────────────▶ Failed
//! ```

#![no_std]
extern crate alloc;

pub mod buffered;
pub mod capability;
pub mod channel;
pub mod continuation;
pub mod encoding;
pub mod error;
pub mod passthrough;
pub mod scheduler;

pub use buffered::BufferedRestore;
pub use capability::{ItemHandler, ReadableListener, Sink, Source, SourceEvent};
pub use channel::RestoreChannel;
pub use continuation::Continuation;
pub use encoding::Encoding;
pub use error::{ErrorKind, StreamFilterError};
pub use passthrough::PassthroughRestore;
pub use scheduler::{ChannelPhase, PushScheduler, SchedulerStats};

/// 既定の high water mark（Node.js の objectMode ストリームと同じ 16）
pub const DEFAULT_HIGH_WATER_MARK: usize = 16;
