//! PrimaryOutput: 述語に一致しなかったアイテムの出力
//!
//! 2 つの読み方がある:
//! - **paused**: `read` / `drain` で取り出す
//! - **flowing**: `on_item` でハンドラを登録すると、溜まっていた分を
//!   先に流し、以後は push のたびに同期的に渡す

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use streamfilter_core::{Encoding, SourceEvent, StreamFilterError};

/// 出力アイテムとそのエンコーディング
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<T> {
    pub item: T,
    pub encoding: Option<Encoding>,
}

type Listener<T> = Box<dyn FnMut(SourceEvent<T>)>;

struct OutputState<T> {
    buffer: VecDeque<Chunk<T>>,
    ended: bool,
    failure: Option<StreamFilterError>,
    listener: Option<Listener<T>>,
    /// 終端イベントを listener に渡したか
    terminal_delivered: bool,
}

/// プライマリ出力
pub struct PrimaryOutput<T> {
    state: Rc<RefCell<OutputState<T>>>,
}

impl<T> Clone for PrimaryOutput<T> {
    fn clone(&self) -> Self {
        PrimaryOutput {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for PrimaryOutput<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PrimaryOutput<T> {
    pub fn new() -> Self {
        PrimaryOutput {
            state: Rc::new(RefCell::new(OutputState {
                buffer: VecDeque::new(),
                ended: false,
                failure: None,
                listener: None,
                terminal_delivered: false,
            })),
        }
    }

    pub(crate) fn push(&self, item: T, encoding: Option<Encoding>) {
        self.state
            .borrow_mut()
            .buffer
            .push_back(Chunk { item, encoding });
        self.flush();
    }

    pub(crate) fn finish(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.ended || state.failure.is_some() {
                return;
            }
            state.ended = true;
        }
        self.flush();
    }

    pub(crate) fn fail(&self, error: StreamFilterError) {
        {
            let mut state = self.state.borrow_mut();
            if state.ended || state.failure.is_some() {
                return;
            }
            state.failure = Some(error);
        }
        self.flush();
    }

    /// 先頭のアイテムを 1 つ取り出す
    pub fn read(&self) -> Option<Chunk<T>> {
        self.state.borrow_mut().buffer.pop_front()
    }

    /// 溜まっているアイテムをすべて取り出す
    pub fn drain(&self) -> Vec<T> {
        self.state
            .borrow_mut()
            .buffer
            .drain(..)
            .map(|chunk| chunk.item)
            .collect()
    }

    /// 未読のアイテム数
    pub fn len(&self) -> usize {
        self.state.borrow().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().buffer.is_empty()
    }

    /// finalize 済みか（失敗は含まない）
    pub fn is_ended(&self) -> bool {
        self.state.borrow().ended
    }

    pub fn failure(&self) -> Option<StreamFilterError> {
        self.state.borrow().failure.clone()
    }

    /// flowing モードに切り替える
    ///
    /// 既存のハンドラは置き換えられる。溜まっているアイテムと、
    /// 既に終了していれば終端イベント（End / Error）も直ちに渡す。
    pub fn on_item<F>(&self, handler: F)
    where
        F: FnMut(SourceEvent<T>) + 'static,
    {
        {
            let mut state = self.state.borrow_mut();
            state.listener = Some(Box::new(handler));
            state.terminal_delivered = false;
        }
        self.flush();
    }

    /// listener があれば、バッファと終端イベントを流す
    ///
    /// listener は呼び出し中だけ取り出しておき、再入した push は
    /// バッファに積まれてこのループで拾われる。
    fn flush(&self) {
        let mut listener = match self.state.borrow_mut().listener.take() {
            Some(listener) => listener,
            None => return,
        };
        loop {
            let next = self.state.borrow_mut().buffer.pop_front();
            match next {
                Some(chunk) => listener(SourceEvent::Item {
                    item: chunk.item,
                    encoding: chunk.encoding,
                }),
                None => break,
            }
        }
        let terminal = {
            let mut state = self.state.borrow_mut();
            if state.terminal_delivered {
                None
            } else if let Some(error) = state.failure.clone() {
                state.terminal_delivered = true;
                Some(SourceEvent::Error(error))
            } else if state.ended {
                state.terminal_delivered = true;
                Some(SourceEvent::End)
            } else {
                None
            }
        };
        if let Some(event) = terminal {
            listener(event);
        }
        let mut state = self.state.borrow_mut();
        // ハンドラ内で on_item が呼ばれていたらそちらを優先する
        if state.listener.is_none() {
            state.listener = Some(listener);
        }
    }
}

impl<T> core::fmt::Debug for PrimaryOutput<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("PrimaryOutput")
            .field("buffered", &state.buffer.len())
            .field("ended", &state.ended)
            .field("failure", &state.failure)
            .finish()
    }
}
