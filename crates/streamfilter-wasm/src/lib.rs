//! # streamfilter-wasm
//!
//! wasm-bindgen エクスポート：Node.js のストリームパイプラインから呼び出す公開 API。
//!
//! ## 使用方法（TypeScript）
//!
//! ```typescript
//! import { StreamFilter, init_panic_hook } from '../streamfilter-pkg/streamfilter_wasm';
//!
//! // パニック時のスタックトレースを有効化（開発時）
//! init_panic_hook();
//!
//! // "B" を restore チャンネルへ迂回する
//! const filter = new StreamFilter(
//!     (item: string, _enc: string, decide: (matched: boolean) => void) => decide(item === 'B'),
//!     { restore: true, itemMode: 'object' },
//! );
//!
//! filter.onData((item) => primary.push(item), () => primary.end());
//! filter.restoreSubscribe((item) => { restored.push(item); return true; });
//!
//! for (const item of ['A', 'B', 'C']) {
//!     await new Promise((resolve, reject) => filter.write(item, undefined, (err) => err ? reject(err) : resolve()));
//! }
//! filter.end();
//! ```

use wasm_bindgen::prelude::*;

pub mod filter;

pub use filter::JsStreamFilter;

/// パニック時にコンソールにスタックトレースを出力する
///
/// 開発時に必ず呼び出すこと。本番ビルドでは feature flag で無効化可能。
#[wasm_bindgen]
pub fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// `new StreamFilter(predicate, options)` の関数版
///
/// # エラー
/// - `E_BAD_FILTER_CALLBACK`: `predicate` が関数でない
/// - `E_BAD_OPTIONS`: オプションが不正
#[wasm_bindgen(js_name = "filterStream")]
pub fn filter_stream(predicate: JsValue, options: JsValue) -> Result<JsStreamFilter, JsError> {
    JsStreamFilter::new(predicate, options)
}

extern crate alloc;
