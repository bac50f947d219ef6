//! Sink / Source ケイパビリティ
//!
//! ストリーム基底クラスの継承の代わりに、2 つの狭いインターフェースを合成する。
//! BufferedRestore は Source のみ、PassthroughRestore は両方を実装する。

use alloc::boxed::Box;

use crate::continuation::Continuation;
use crate::encoding::Encoding;
use crate::error::StreamFilterError;

/// 消費者に届くイベント
#[derive(Debug)]
pub enum SourceEvent<T> {
    /// アイテム 1 件
    Item {
        item: T,
        encoding: Option<Encoding>,
    },
    /// EndSentinel（これ以降イベントは届かない）
    End,
    /// 終端エラー
    Error(StreamFilterError),
}

/// 配送ハンドラ。戻り値は「次のアイテムも受け取れるか」（新しい需要フラグ）
pub type ItemHandler<T> = Box<dyn FnMut(SourceEvent<T>) -> bool>;

/// 「データあり」通知リスナ
pub type ReadableListener = Box<dyn FnMut()>;

/// 読み出し側のケイパビリティ
pub trait Source<T> {
    /// 配送ハンドラ（onItem）を登録する。既存のハンドラは置き換えられる
    fn on_item(&self, handler: ItemHandler<T>);

    /// 「データあり」通知を受け取るリスナを登録する
    fn on_readable(&self, listener: ReadableListener);

    /// 次のアイテムを受け取れることを通知する
    fn pull(&self);
}

/// 書き込み側のケイパビリティ
pub trait Sink<T> {
    /// アイテムを書き込む
    ///
    /// `done` はアイテムが消費者に配送された後に呼ばれる。
    ///
    /// # 戻り値
    /// - `Ok(true)`: 続けて書き込んでよい
    /// - `Ok(false)`: キューが high water mark に達した（`done` を待つべき）
    fn write(
        &self,
        item: T,
        encoding: Option<Encoding>,
        done: Continuation,
    ) -> Result<bool, StreamFilterError>;

    /// 書き込み側の終了を通知する
    fn finish(&self) -> Result<(), StreamFilterError>;
}
