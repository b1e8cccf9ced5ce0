//! Semantic value frames.
//!
//! Every successful rule invocation fills one `Values` frame: the child
//! values produced beneath it, the matched substring, the matched tokens,
//! the start position, and — for choices — the index of the alternative
//! that won. Frames are transient; they live on the context's frame stack
//! only while the owning rule's action may still run.

use std::any::Any;
use std::rc::Rc;

use crate::ope::Ope;

/// An untyped semantic value. Actions downcast child values to whatever
/// they stored.
pub type Value = Rc<dyn Any>;

/// Wrap a concrete value for storage in a frame slot.
pub fn value<T: 'static>(v: T) -> Value {
    Rc::new(v)
}

/// One rule invocation's worth of semantic state.
///
/// A slot is `None` when the corresponding child rule produced no value;
/// the slot still occupies its position, so sibling indices stay stable.
#[derive(Default)]
pub struct Values<'s> {
    /// Child value slots, in match order.
    pub vs: Vec<Option<Value>>,
    /// The matched substring.
    pub s: &'s [u8],
    /// Substrings captured by token boundaries beneath this rule.
    pub ts: Vec<&'s [u8]>,
    /// Start position of the match.
    pub pos: usize,
    /// Index of the winning alternative of the most recent choice.
    pub choice: usize,
}

impl<'s> Values<'s> {
    /// Number of child value slots.
    pub fn len(&self) -> usize {
        self.vs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vs.is_empty()
    }

    /// The matched substring as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.s).into_owned()
    }

    /// The first captured token, or the whole matched substring when the
    /// rule recorded no token boundary.
    pub fn token(&self) -> String {
        match self.ts.first() {
            Some(t) => String::from_utf8_lossy(t).into_owned(),
            None => self.text(),
        }
    }

    /// The `i`-th captured token as text.
    ///
    /// # Panics
    ///
    /// Panics when fewer than `i + 1` tokens were captured.
    pub fn token_at(&self, i: usize) -> String {
        String::from_utf8_lossy(self.ts[i]).into_owned()
    }

    /// Downcast the value in slot `i`.
    ///
    /// # Panics
    ///
    /// Panics when the slot is empty or holds a different type.
    pub fn to<T: Clone + 'static>(&self, i: usize) -> T {
        self.vs[i]
            .as_ref()
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
            .expect("value slot holds a different type")
    }

    /// The value in slot `i` as a string. See [`Values::to`] for panics.
    pub fn to_str(&self, i: usize) -> String {
        self.to::<String>(i)
    }

    /// The value in slot `i` as an operator. See [`Values::to`] for panics.
    pub fn to_ope(&self, i: usize) -> Rc<Ope> {
        self.to::<Rc<Ope>>(i)
    }

    /// The value in slot `i` as a bool. See [`Values::to`] for panics.
    pub fn to_bool(&self, i: usize) -> bool {
        self.to::<bool>(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_falls_back_to_match() {
        let v = Values {
            s: b"abc",
            ..Values::default()
        };
        assert_eq!(v.token(), "abc");
    }

    #[test]
    fn test_token_prefers_captured() {
        let v = Values {
            s: b"abc",
            ts: vec![b"ab"],
            ..Values::default()
        };
        assert_eq!(v.token(), "ab");
        assert_eq!(v.token_at(0), "ab");
    }

    #[test]
    fn test_downcast_accessors() {
        let v = Values {
            vs: vec![
                Some(value("hi".to_string())),
                Some(value(true)),
                None,
            ],
            ..Values::default()
        };
        assert_eq!(v.to_str(0), "hi");
        assert!(v.to_bool(1));
        assert_eq!(v.len(), 3);
    }
}
