//! # streamfilter
//!
//! 述語でアイテムを振り分けるフィルタステージ。
//!
//! 一致しないアイテムはプライマリ出力へ、一致したアイテムは破棄するか
//! restore チャンネルへ迂回する。restore チャンネルは外部 writer からの
//! 書き込みも受け付けられる（passthrough）ので、迂回したアイテムを
//! 同じ・別のパイプラインの任意の位置に戻せる。
//!
//! ## データフロー
//!
//! ```text
//! process(item, done)
//!   └─ predicate(item, encoding, decide)    （同期 or 非同期）
//!        ├─ false → PrimaryOutput.push(item); done()
//!        └─ true  ├─ restore 無効 → 破棄; done()
//!                 └─ restore 有効 → RestoreChannel.enqueue(item, done)
//!                                    （done は restore 消費者への配送後に発火）
//!
//! finalize(done)
//!   ├─ PrimaryOutput.finish(); done()
//!   ├─ buffered    → EndSentinel
//!   └─ passthrough → 外部 writer の finish と揃ったら EndSentinel
//! ```
//!
//! ## 使用例
//!
//! ```
//! use streamfilter::{pipe_iter, Predicate, StreamFilter, StreamFilterOptions};
//! use streamfilter_core::{Source, SourceEvent};
//!
//! let filter = StreamFilter::new(
//!     Predicate::from_fn(|n: &u32, _| n % 2 == 0),
//!     StreamFilterOptions::new().with_restore(true),
//! )
//! .unwrap();
//!
//! if let Some(restore) = filter.restore() {
//!     restore.as_source().on_item(Box::new(|event: SourceEvent<u32>| {
//!         if let SourceEvent::Item { item, .. } = event {
//!             assert_eq!(item % 2, 0);
//!         }
//!         true
//!     }));
//! }
//!
//! pipe_iter(&filter, 0..10u32, |result| assert!(result.is_ok()));
//! filter.event_loop().run_until_idle();
//! assert_eq!(filter.output().drain(), vec![1, 3, 5, 7, 9]);
//! ```

#![no_std]
extern crate alloc;

pub mod filter;
pub mod options;
pub mod output;
pub mod pipe;
pub mod predicate;

pub use filter::{FilterStats, StreamFilter};
pub use options::{ItemMode, StreamFilterOptions};
pub use output::{Chunk, PrimaryOutput};
pub use pipe::{pipe_iter, pipe_output};
pub use predicate::{Decide, DecisionFuture, Predicate};

pub use streamfilter_core::{
    Continuation, Encoding, ErrorKind, RestoreChannel, StreamFilterError, DEFAULT_HIGH_WATER_MARK,
};
pub use streamfilter_turn::EventLoop;
