//! Guest arrays

use crate::handle::Handle;
use crate::value::Value;
use std::ops::Deref;

/// A guest `Array`. Obtained with [`Array::new`] or by converting a value
/// with [`Value::to_host`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Array<'h> {
    value: Value<'h>,
}

impl<'h> Array<'h> {
    /// A new empty array.
    pub fn new(handle: &'h Handle) -> Self {
        Self::wrap(Value::new(handle, handle.mrb().ary_new()))
    }

    pub(crate) fn wrap(value: Value<'h>) -> Self {
        Self { value }
    }

    pub fn push(&self, item: Value<'h>) {
        self.value.handle().mrb().ary_push(self.value.raw(), item.raw());
    }

    pub fn len(&self) -> usize {
        self.value.handle().mrb().ary_len(self.value.raw())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `index`. Out of range and `nil` entries both read as `None`.
    pub fn get(&self, index: usize) -> Option<Value<'h>> {
        let raw = self.value.handle().mrb().ary_entry(self.value.raw(), index);
        if raw.is_nil() {
            None
        } else {
            Some(Value::new(self.value.handle(), raw))
        }
    }

    /// Elements in order, `nil` included.
    pub fn to_vec(&self) -> Vec<Value<'h>> {
        let handle = self.value.handle();
        (0..self.len())
            .map(|i| Value::new(handle, handle.mrb().ary_entry(self.value.raw(), i)))
            .collect()
    }
}

impl<'h> Deref for Array<'h> {
    type Target = Value<'h>;

    fn deref(&self) -> &Value<'h> {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use crate::{Array, Garnet};

    #[test]
    fn test_push_and_get() {
        let grb = Garnet::open().expect("open");
        let ary = Array::new(&grb);
        assert!(ary.is_empty());
        ary.push(grb.to_guest("foo"));
        ary.push(grb.nil_value());
        ary.push(grb.to_guest(3_i64));
        assert_eq!(ary.len(), 3);
        assert_eq!(ary.get(0).map(|v| v.to_string()), Some("foo".to_string()));
        assert!(ary.get(1).is_none());
        assert!(ary.get(9).is_none());
        assert_eq!(ary.to_vec().len(), 3);
        assert_eq!(ary.inspect().expect("inspect"), "[\"foo\", nil, 3]");
    }
}
