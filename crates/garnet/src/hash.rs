//! Guest hashes

use crate::array::Array;
use crate::handle::Handle;
use crate::value::Value;
use std::ops::Deref;

/// A guest `Hash`. Keys keep the guest's insertion order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hash<'h> {
    value: Value<'h>,
}

impl<'h> Hash<'h> {
    /// A new empty hash.
    pub fn new(handle: &'h Handle) -> Self {
        Self::wrap(Value::new(handle, handle.mrb().hash_new()))
    }

    pub(crate) fn wrap(value: Value<'h>) -> Self {
        Self { value }
    }

    /// Value stored under `key`, `None` when absent.
    pub fn get(&self, key: Value<'h>) -> Option<Value<'h>> {
        let handle = self.value.handle();
        handle
            .mrb()
            .hash_fetch(self.value.raw(), key.raw())
            .map(|raw| Value::new(handle, raw))
    }

    pub fn set(&self, key: Value<'h>, value: Value<'h>) {
        self.value
            .handle()
            .mrb()
            .hash_set(self.value.raw(), key.raw(), value.raw());
    }

    /// Remove `key`, returning what was stored. `None` when the key was
    /// absent or held `nil`.
    pub fn delete(&self, key: Value<'h>) -> Option<Value<'h>> {
        let handle = self.value.handle();
        handle
            .mrb()
            .hash_delete_key(self.value.raw(), key.raw())
            .filter(|raw| !raw.is_nil())
            .map(|raw| Value::new(handle, raw))
    }

    pub fn contains_key(&self, key: Value<'h>) -> bool {
        self.value.handle().mrb().hash_contains(self.value.raw(), key.raw())
    }

    /// Keys in iteration order.
    pub fn keys(&self) -> Vec<Value<'h>> {
        let handle = self.value.handle();
        let keys = handle.mrb().hash_keys(self.value.raw());
        Array::wrap(Value::new(handle, keys)).to_vec()
    }

    pub fn len(&self) -> usize {
        self.value.handle().mrb().hash_len(self.value.raw())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'h> Deref for Hash<'h> {
    type Target = Value<'h>;

    fn deref(&self) -> &Value<'h> {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use crate::{Garnet, Hash};

    #[test]
    fn test_get_set_delete() {
        let grb = Garnet::open().expect("open");
        let hash = Hash::new(&grb);
        hash.set(grb.to_guest("foo"), grb.to_guest("bar"));
        hash.set(grb.to_guest("nothing"), grb.nil_value());
        assert_eq!(hash.len(), 2);
        assert_eq!(hash.get(grb.to_guest("foo")).map(|v| v.to_string()), Some("bar".to_string()));
        assert!(hash.get(grb.to_guest("missing")).is_none());

        assert!(hash.delete(grb.to_guest("nothing")).is_none());
        assert!(hash.delete(grb.to_guest("missing")).is_none());
        assert_eq!(hash.delete(grb.to_guest("foo")).map(|v| v.to_string()), Some("bar".to_string()));
        assert!(hash.is_empty());
    }

    #[test]
    fn test_keys_keep_insertion_order() {
        let grb = Garnet::open().expect("open");
        let v = grb.load_string("{ 'b' => 1, 'a' => 2, 'c' => 3 }").expect("load");
        let hash: Hash<'_> = v.to_host().expect("hash");
        let keys: Vec<String> = hash.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert!(hash.contains_key(grb.to_guest("a")));
    }
}
