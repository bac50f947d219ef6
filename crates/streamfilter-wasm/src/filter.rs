//! StreamFilter wasm-bindgen エクスポート
//!
//! JS の述語・コールバックを `streamfilter` のステージに橋渡しする。
//! アイテムは `JsValue` のまま運ばれ、中身は解釈しない。
//!
//! ## イベントループの駆動
//!
//! 配送や遅延タスクは `EventLoop` に積まれるだけで、JS からの呼び出しの
//! 中では実行しない。各メソッドの最後に `Driver::kick` でマイクロタスクを
//! 1 つ予約し（連続した kick はまとめる）、そこで idle になるまで回す。

extern crate alloc;

use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use js_sys::{Function, Promise, Uint8Array};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::console;

use streamfilter::{
    Continuation, Decide, Encoding, FilterStats, ItemMode, Predicate, StreamFilter,
    StreamFilterError, StreamFilterOptions,
};
use streamfilter_core::{SchedulerStats, SourceEvent};
use streamfilter_turn::EventLoop;

type DecideCallback = Closure<dyn FnMut(JsValue)>;

/// イベントループを JS のマイクロタスクで回す
#[derive(Clone)]
struct Driver {
    event_loop: EventLoop,
    /// マイクロタスクを予約済みか
    scheduled: Rc<Cell<bool>>,
    /// JS に渡した decide コールバック（JS 側から呼ばれうる間は保持する）
    callbacks: Rc<RefCell<Vec<(Decide, DecideCallback)>>>,
}

impl Driver {
    fn new(event_loop: EventLoop) -> Self {
        Driver {
            event_loop,
            scheduled: Rc::new(Cell::new(false)),
            callbacks: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn kick(&self) {
        if self.scheduled.replace(true) {
            return;
        }
        let driver = self.clone();
        wasm_bindgen_futures::spawn_local(async move {
            driver.scheduled.set(false);
            // マイクロタスクの中ではどのコールバックも実行中ではない
            driver
                .callbacks
                .borrow_mut()
                .retain(|(decide, _)| !decide.is_decided());
            let turns = driver.event_loop.run_until_idle();
            tracing::trace!(turns, "event loop drained");
        });
    }
}

/// `getStats()` の JSON
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsReport {
    filter: FilterStats,
    restore: Option<SchedulerStats>,
}

/// フィルタステージ（JS からは `StreamFilter`）
///
/// ## スレッド安全性
///
/// WASM はシングルスレッドのため `!Send + !Sync`。すべてのメソッドは
/// `&self` を取るので、JS コールバックの中から再入しても借用は衝突しない。
#[wasm_bindgen(js_name = "StreamFilter")]
pub struct JsStreamFilter {
    filter: StreamFilter<JsValue>,
    driver: Driver,
    item_mode: ItemMode,
}

#[wasm_bindgen(js_class = "StreamFilter")]
impl JsStreamFilter {
    /// フィルタを生成する
    ///
    /// # 引数
    /// - `predicate`: `(item, encoding, decide) => void` または `(item, encoding) => Promise<boolean>`
    /// - `options`: `{ restore?, passthrough?, itemMode?, highWaterMark? }`（省略可）
    ///
    /// # エラー
    /// - `E_BAD_FILTER_CALLBACK`: `predicate` が関数でない
    /// - `E_BAD_OPTIONS`: オプションが不正
    #[wasm_bindgen(constructor)]
    pub fn new(predicate: JsValue, options: JsValue) -> Result<JsStreamFilter, JsError> {
        let predicate: Function = predicate.dyn_into().map_err(|value: JsValue| {
            js_error(&StreamFilterError::BadPredicate(type_name(&value)))
        })?;
        let options = parse_options(&options).map_err(|e| js_error(&e))?;
        let item_mode = options.item_mode;

        let driver = Driver::new(EventLoop::new());
        let filter = StreamFilter::with_event_loop(
            js_predicate(predicate, driver.clone()),
            options,
            driver.event_loop.clone(),
        )
        .map_err(|e| js_error(&e))?;

        Ok(JsStreamFilter {
            filter,
            driver,
            item_mode,
        })
    }

    /// 1 件書き込む
    ///
    /// `done(err)` は上流が次のアイテムを送ってよくなったときに一度だけ呼ばれる。
    /// ストリームの状態によるエラー（終了後の書き込みなど）は `done` に渡し、
    /// 例外にはしない。
    ///
    /// # エラー
    /// - `bytes` モードで `Uint8Array` / 文字列以外を渡した
    #[wasm_bindgen]
    pub fn write(
        &self,
        item: JsValue,
        encoding: Option<String>,
        done: Option<Function>,
    ) -> Result<(), JsError> {
        self.check_item(&item)?;
        let _ = self
            .filter
            .process(item, encoding.map(Encoding::from), js_continuation(done));
        self.driver.kick();
        Ok(())
    }

    /// 上流の終了を通知する
    #[wasm_bindgen]
    pub fn end(&self, done: Option<Function>) {
        let _ = self.filter.finalize(js_continuation(done));
        self.driver.kick();
    }

    /// 両方の出力を `E_ABORTED` で停止する
    #[wasm_bindgen]
    pub fn abort(&self) {
        self.filter.abort();
        self.driver.kick();
    }

    /// プライマリ出力を flowing モードで購読する
    #[wasm_bindgen(js_name = "onData")]
    pub fn on_data(&self, on_item: Function, on_end: Option<Function>, on_error: Option<Function>) {
        self.filter.output().on_item(move |event| match event {
            SourceEvent::Item { item, encoding } => {
                call_reporting("onData", &on_item, &[item, encoding_value(encoding.as_ref())]);
            }
            SourceEvent::End => {
                if let Some(on_end) = &on_end {
                    call_reporting("onEnd", on_end, &[]);
                }
            }
            SourceEvent::Error(error) => {
                if let Some(on_error) = &on_error {
                    call_reporting("onError", on_error, &[error_value(&error)]);
                }
            }
        });
    }

    /// プライマリ出力から 1 件読む（なければ `undefined`）
    #[wasm_bindgen]
    pub fn read(&self) -> Option<JsValue> {
        self.filter.output().read().map(|chunk| chunk.item)
    }

    /// プライマリ出力に溜まっている分をすべて読む
    #[wasm_bindgen(js_name = "readAll")]
    pub fn read_all(&self) -> js_sys::Array {
        let result = js_sys::Array::new();
        for item in self.filter.output().drain() {
            result.push(&item);
        }
        result
    }

    /// プライマリ出力が終了したか
    #[wasm_bindgen(js_name = "isEnded")]
    pub fn is_ended(&self) -> bool {
        self.filter.output().is_ended()
    }

    #[wasm_bindgen(js_name = "hasRestore")]
    pub fn has_restore(&self) -> bool {
        self.filter.restore().is_some()
    }

    #[wasm_bindgen(js_name = "isPassthrough")]
    pub fn is_passthrough(&self) -> bool {
        self.filter
            .restore()
            .map(|channel| channel.is_passthrough())
            .unwrap_or(false)
    }

    /// restore チャンネルを購読する
    ///
    /// `onItem` が `false` を返すと需要を取り下げ、`restorePull()` まで次は届かない。
    ///
    /// # エラー
    /// - restore が無効
    #[wasm_bindgen(js_name = "restoreSubscribe")]
    pub fn restore_subscribe(
        &self,
        on_item: Function,
        on_end: Option<Function>,
        on_error: Option<Function>,
    ) -> Result<(), JsError> {
        let channel = self.filter.restore().ok_or_else(restore_disabled)?;
        channel.as_source().on_item(Box::new(move |event| match event {
            SourceEvent::Item { item, encoding } => {
                let returned = call_reporting(
                    "restoreSubscribe",
                    &on_item,
                    &[item, encoding_value(encoding.as_ref())],
                );
                // undefined は「需要あり」
                returned.and_then(|value| value.as_bool()) != Some(false)
            }
            SourceEvent::End => {
                if let Some(on_end) = &on_end {
                    call_reporting("restoreSubscribe:end", on_end, &[]);
                }
                false
            }
            SourceEvent::Error(error) => {
                if let Some(on_error) = &on_error {
                    call_reporting("restoreSubscribe:error", on_error, &[error_value(&error)]);
                }
                false
            }
        }));
        self.driver.kick();
        Ok(())
    }

    /// restore チャンネルに「データあり」通知を登録する
    #[wasm_bindgen(js_name = "restoreOnReadable")]
    pub fn restore_on_readable(&self, listener: Function) -> Result<(), JsError> {
        let channel = self.filter.restore().ok_or_else(restore_disabled)?;
        channel.as_source().on_readable(Box::new(move || {
            call_reporting("restoreOnReadable", &listener, &[]);
        }));
        Ok(())
    }

    /// restore 消費者の需要を通知する
    #[wasm_bindgen(js_name = "restorePull")]
    pub fn restore_pull(&self) -> Result<(), JsError> {
        let channel = self.filter.restore().ok_or_else(restore_disabled)?;
        channel.as_source().pull();
        self.driver.kick();
        Ok(())
    }

    /// passthrough の restore チャンネルに外部から書き込む
    ///
    /// # 戻り値
    /// キューが highWaterMark 未満なら `true`（`false` なら `done` を待つべき）
    ///
    /// # エラー
    /// - passthrough でない
    /// - `bytes` モードで `Uint8Array` / 文字列以外を渡した
    #[wasm_bindgen(js_name = "restoreWrite")]
    pub fn restore_write(
        &self,
        item: JsValue,
        encoding: Option<String>,
        done: Option<Function>,
    ) -> Result<bool, JsError> {
        let sink = self
            .filter
            .restore()
            .and_then(|channel| channel.as_sink())
            .ok_or_else(not_passthrough)?;
        self.check_item(&item)?;
        let accepted = sink
            .write(item, encoding.map(Encoding::from), js_continuation(done))
            .unwrap_or(false);
        self.driver.kick();
        Ok(accepted)
    }

    /// passthrough の外部 writer の終了を通知する
    #[wasm_bindgen(js_name = "restoreFinish")]
    pub fn restore_finish(&self) -> Result<(), JsError> {
        let sink = self
            .filter
            .restore()
            .and_then(|channel| channel.as_sink())
            .ok_or_else(not_passthrough)?;
        let result = sink.finish();
        self.driver.kick();
        result.map_err(|e| js_error(&e))
    }

    /// 統計を JSON 文字列で返す
    ///
    /// ```json
    /// { "filter": { "processed": 3, ... }, "restore": { "enqueued": 1, ... } }
    /// ```
    #[wasm_bindgen(js_name = "getStats")]
    pub fn get_stats(&self) -> Result<String, JsError> {
        let report = StatsReport {
            filter: self.filter.stats(),
            restore: self.filter.restore().map(|channel| channel.stats()),
        };
        serde_json::to_string(&report)
            .map_err(|e| JsError::new(&format!("Stats serialization failed: {}", e)))
    }

    // ===== Private メソッド =====

    fn check_item(&self, item: &JsValue) -> Result<(), JsError> {
        if self.item_mode == ItemMode::Bytes
            && !(item.is_string() || item.is_instance_of::<Uint8Array>())
        {
            return Err(JsError::new(&format!(
                "Invalid chunk: bytes mode accepts Uint8Array or string (got {})",
                type_name(item)
            )));
        }
        Ok(())
    }
}

/// JS 関数をフィルタ述語に変換する
///
/// 戻り値が Promise なら Promise 形式、それ以外は渡した `decide` を待つ。
/// 例外は `PredicateRejected` として扱う。
fn js_predicate(func: Function, driver: Driver) -> Predicate<JsValue> {
    Predicate::callback(move |item: &JsValue, encoding: Option<&Encoding>, decide: Decide| {
        let responder = decide.clone();
        let callback_driver = driver.clone();
        let callback: DecideCallback = Closure::wrap(Box::new(move |matched: JsValue| {
            if let Err(error) = responder.decide(matched.is_truthy()) {
                console::error_1(&error_value(&error));
            }
            callback_driver.kick();
        }) as Box<dyn FnMut(JsValue)>);

        let returned = func.call3(
            &JsValue::NULL,
            item,
            &encoding_value(encoding),
            callback.as_ref(),
        );
        driver
            .callbacks
            .borrow_mut()
            .push((decide.clone(), callback));

        match returned {
            Ok(value) => {
                if let Some(promise) = value.dyn_ref::<Promise>() {
                    if decide.expect_promise() {
                        let future = JsFuture::from(promise.clone());
                        let driver = driver.clone();
                        wasm_bindgen_futures::spawn_local(async move {
                            let outcome = future
                                .await
                                .map(|value| value.is_truthy())
                                .map_err(|e| StreamFilterError::PredicateRejected(describe(&e)));
                            let _ = decide.resolve(outcome);
                            driver.kick();
                        });
                    }
                }
            }
            Err(thrown) => {
                let _ = decide.resolve(Err(StreamFilterError::PredicateRejected(describe(
                    &thrown,
                ))));
            }
        }
    })
}

fn parse_options(options: &JsValue) -> Result<StreamFilterOptions, StreamFilterError> {
    if options.is_undefined() || options.is_null() {
        return Ok(StreamFilterOptions::default());
    }
    let json = js_sys::JSON::stringify(options)
        .map_err(|_| StreamFilterError::InvalidOptions("options are not serializable".into()))?;
    let json = String::from(json);
    serde_json::from_str(&json).map_err(|e| StreamFilterError::InvalidOptions(format!("{}", e)))
}

/// `done(err)` を呼ぶ continuation
///
/// `done` がなければエラーだけをコンソールに出す。
fn js_continuation(done: Option<Function>) -> Continuation {
    Continuation::new(move |result| match (done, result) {
        (Some(done), result) => {
            let arg = match result {
                Ok(()) => JsValue::NULL,
                Err(error) => error_value(&error),
            };
            call_reporting("done", &done, &[arg]);
        }
        (None, Err(error)) => console::error_1(&error_value(&error)),
        (None, Ok(())) => {}
    })
}

/// JS コールバックを呼ぶ。例外はコンソールに出して握りつぶす
fn call_reporting(label: &str, func: &Function, args: &[JsValue]) -> Option<JsValue> {
    let result = match args {
        [] => func.call0(&JsValue::NULL),
        [a] => func.call1(&JsValue::NULL, a),
        [a, b] => func.call2(&JsValue::NULL, a, b),
        _ => func.apply(&JsValue::NULL, &args.iter().collect::<js_sys::Array>()),
    };
    match result {
        Ok(value) => Some(value),
        Err(thrown) => {
            tracing::warn!(callback = label, "JS callback threw");
            console::error_2(&JsValue::from_str(&format!("streamfilter: {} threw", label)), &thrown);
            None
        }
    }
}

fn encoding_value(encoding: Option<&Encoding>) -> JsValue {
    encoding
        .map(|e| JsValue::from_str(e.as_str()))
        .unwrap_or(JsValue::UNDEFINED)
}

/// `Error` に `code` プロパティを付けて返す
fn error_value(error: &StreamFilterError) -> JsValue {
    let js = js_sys::Error::new(&format!("{}: {}", error.code(), error));
    let _ = js_sys::Reflect::set(&js, &JsValue::from_str("code"), &JsValue::from_str(error.code()));
    js.into()
}

fn js_error(error: &StreamFilterError) -> JsError {
    JsError::new(&format!("{}: {}", error.code(), error))
}

fn restore_disabled() -> JsError {
    JsError::new("restore channel is disabled (pass { restore: true })")
}

fn not_passthrough() -> JsError {
    JsError::new("restore channel is not writable (pass { restore: true, passthrough: true })")
}

fn describe(value: &JsValue) -> String {
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        String::from(error.message())
    } else if let Some(text) = value.as_string() {
        text
    } else {
        format!("{:?}", value)
    }
}

fn type_name(value: &JsValue) -> String {
    value
        .js_typeof()
        .as_string()
        .unwrap_or_else(|| String::from("unknown"))
}
