//! Single-shot, type-erased continuations.
//!
//! A [`Callback`] is "what to do when this event completes". It owns whatever
//! state it captured until it is invoked or dropped, and invoking it consumes
//! it, so a continuation can never run twice.

use std::fmt;

pub struct Callback<T = ()> {
    inner: Box<dyn FnOnce(T)>,
}

impl<T> Callback<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(T) + 'static,
    {
        Self { inner: Box::new(f) }
    }

    pub fn call(self, value: T) {
        (self.inner)(value)
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}
