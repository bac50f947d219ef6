//! パイプ接続のヘルパー
//!
//! - `pipe_iter`: イテレータを 1 件ずつフィルタに流す上流。前のアイテムの
//!   continuation を待ってから次を送るので、restore 側の背圧がそのまま効く
//! - `pipe_output`: プライマリ出力を任意の `Sink`（passthrough の restore など）に繋ぐ

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;

use streamfilter_core::{Continuation, Sink, SourceEvent, StreamFilterError};

use crate::filter::StreamFilter;
use crate::output::PrimaryOutput;

type Completion = Box<dyn FnOnce(Result<(), StreamFilterError>)>;

struct Feeder<T, I> {
    filter: StreamFilter<T>,
    items: RefCell<I>,
    on_complete: RefCell<Option<Completion>>,
}

impl<T: 'static, I: Iterator<Item = T> + 'static> Feeder<T, I> {
    fn feed(self: Rc<Self>) {
        let next = self.items.borrow_mut().next();
        match next {
            Some(item) => {
                let feeder = self.clone();
                // 拒否された場合も continuation にエラーが届く
                let _ = self.filter.process(
                    item,
                    None,
                    Continuation::new(move |result| match result {
                        Ok(()) => {
                            let event_loop = feeder.filter.event_loop().clone();
                            event_loop.defer(move || feeder.feed());
                        }
                        Err(error) => feeder.complete(Err(error)),
                    }),
                );
            }
            None => {
                let feeder = self.clone();
                let _ = self
                    .filter
                    .finalize(Continuation::new(move |result| feeder.complete(result)));
            }
        }
    }

    fn complete(&self, result: Result<(), StreamFilterError>) {
        let on_complete = self.on_complete.borrow_mut().take();
        if let Some(on_complete) = on_complete {
            on_complete(result);
        }
    }
}

/// `items` を順にフィルタへ流し、尽きたら finalize する
///
/// `on_complete` は finalize の完了か、最初のエラーで一度だけ呼ばれる。
/// 最初のアイテムはこの呼び出しの中で送られ、以降はイベントループの
/// 後のターンで送られる。
pub fn pipe_iter<T, I, F>(filter: &StreamFilter<T>, items: I, on_complete: F)
where
    T: 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: 'static,
    F: FnOnce(Result<(), StreamFilterError>) + 'static,
{
    let feeder = Rc::new(Feeder {
        filter: filter.clone(),
        items: RefCell::new(items.into_iter()),
        on_complete: RefCell::new(Some(Box::new(on_complete))),
    });
    feeder.feed();
}

/// プライマリ出力を `sink` に繋ぐ
///
/// 出力を flowing モードにし、アイテムは `Sink::write`、終了は
/// `Sink::finish` として転送する。プライマリ出力のエラーは転送しない
/// （フィルタの失敗は restore チャンネル側にも届いている）。
pub fn pipe_output<T, S>(output: &PrimaryOutput<T>, sink: S)
where
    T: 'static,
    S: Sink<T> + 'static,
{
    output.on_item(move |event| match event {
        SourceEvent::Item { item, encoding } => {
            if let Err(error) = sink.write(item, encoding, Continuation::noop()) {
                tracing::warn!(code = error.code(), "piped write refused");
            }
        }
        SourceEvent::End => {
            if let Err(error) = sink.finish() {
                tracing::warn!(code = error.code(), "piped finish refused");
            }
        }
        SourceEvent::Error(error) => {
            tracing::debug!(code = error.code(), "primary output failed; pipe stopped");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::StreamFilterOptions;
    use crate::predicate::Predicate;
    use alloc::vec;
    use alloc::vec::Vec;
    use streamfilter_core::Encoding;

    #[test]
    fn test_pipe_iter_feeds_one_at_a_time() {
        let filter = StreamFilter::new(
            Predicate::from_fn(|n: &u32, _| n % 3 == 0),
            StreamFilterOptions::new().with_restore(true),
        )
        .unwrap();

        // 1 件ずつしか受け取らず、pull されるまで需要を取り下げる消費者
        let restore = filter.restore().unwrap().clone();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        restore.as_source().on_item(Box::new(move |event| {
            if let SourceEvent::Item { item, .. } = event {
                sink.borrow_mut().push(item);
            }
            false
        }));

        let result = Rc::new(RefCell::new(None));
        let slot = result.clone();
        pipe_iter(&filter, 0..7u32, move |r| *slot.borrow_mut() = Some(r));

        filter.event_loop().run_until_idle();
        // 0 が迂回され、その配送後に 1, 2, 3 と進み 3 で止まる
        assert_eq!(*seen.borrow(), vec![0]);
        assert_eq!(filter.output().drain(), vec![1, 2]);
        assert!(result.borrow().is_none());

        for _ in 0..4 {
            restore.as_source().pull();
            filter.event_loop().run_until_idle();
        }
        assert_eq!(*seen.borrow(), vec![0, 3, 6]);
        assert_eq!(filter.output().drain(), vec![4, 5]);
        assert_eq!(*result.borrow(), Some(Ok(())));
    }

    #[test]
    fn test_pipe_iter_reports_first_error() {
        let filter = StreamFilter::new(
            Predicate::callback(|_: &u32, _, _decide| {}),
            StreamFilterOptions::new(),
        )
        .unwrap();
        let result = Rc::new(RefCell::new(None));
        let slot = result.clone();
        pipe_iter(&filter, 0..3u32, move |r| *slot.borrow_mut() = Some(r));
        filter.event_loop().run_until_idle();
        assert_eq!(
            *result.borrow(),
            Some(Err(StreamFilterError::DecisionDropped))
        );
    }

    #[test]
    fn test_pipe_output_forwards_items_and_finish() {
        let filter = StreamFilter::new(
            Predicate::from_fn(|s: &&str, _| s.starts_with('x')),
            StreamFilterOptions::new()
                .with_restore(true)
                .with_passthrough(true),
        )
        .unwrap();
        let restore = filter.restore().unwrap().clone();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        restore.as_source().on_item(Box::new(move |event| {
            match event {
                SourceEvent::Item { item, .. } => sink.borrow_mut().push(item),
                SourceEvent::End => sink.borrow_mut().push("<end>"),
                SourceEvent::Error(_) => sink.borrow_mut().push("<error>"),
            }
            true
        }));

        let passthrough = restore.as_passthrough().unwrap().clone();
        pipe_output(filter.output(), passthrough);

        filter
            .process("a", Some(Encoding::from("utf8")), Continuation::noop())
            .unwrap();
        filter.event_loop().run_until_idle();
        filter.process("x1", None, Continuation::noop()).unwrap();
        filter.event_loop().run_until_idle();
        filter.finalize(Continuation::noop()).unwrap();
        filter.event_loop().run_until_idle();

        assert_eq!(*seen.borrow(), vec!["a", "x1", "<end>"]);
    }
}
