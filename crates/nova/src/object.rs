use std::{
    fmt::Write,
    hash::{Hash, Hasher},
    sync::Arc,
};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::{
    class::ClassDef,
    error::{ErrorKind, RunError, RunResult},
    host::HostObject,
    value::Value,
};

/// A class instance.
///
/// Holds a fixed-size slot array sized by the class's field layout, defaulted
/// to `Null`. Field names outside the layout land in a lazily-allocated
/// overflow map. A foreign delegate may be attached during construction; its
/// presence routes reflective foreign calls through the delegate.
#[derive(Debug)]
pub struct Instance {
    class: Arc<ClassDef>,
    slots: RwLock<Vec<Value>>,
    overflow: RwLock<Option<AHashMap<Arc<str>, Value>>>,
    delegate: RwLock<Option<Arc<dyn HostObject>>>,
}

impl Instance {
    /// Allocates an instance with all slots `Null`.
    #[must_use]
    pub fn new(class: Arc<ClassDef>) -> Arc<Self> {
        let slots = vec![Value::Null; class.field_layout().len()];
        Arc::new(Self {
            class,
            slots: RwLock::new(slots),
            overflow: RwLock::new(None),
            delegate: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn class(&self) -> &Arc<ClassDef> {
        &self.class
    }

    /// Reads a field by name: layout slot, then overflow map.
    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<Value> {
        if let Some(slot) = self.class.field_slot(name) {
            return Some(self.slots.read()[slot].clone());
        }
        self.overflow.read().as_ref().and_then(|map| map.get(name).cloned())
    }

    /// Writes a field by name.
    ///
    /// Names in the layout write their slot in O(1); any other name goes to
    /// the overflow map, allocating it on first use.
    pub fn set_field(&self, name: &str, value: Value) {
        if let Some(slot) = self.class.field_slot(name) {
            self.slots.write()[slot] = value;
            return;
        }
        self.overflow
            .write()
            .get_or_insert_with(AHashMap::new)
            .insert(Arc::from(name), value);
    }

    /// Reads a slot by index. Used by cached getter handles and tests.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<Value> {
        self.slots.read().get(index).cloned()
    }

    /// Writes a slot by index. Used by cached setter handles.
    pub fn set_slot(&self, index: usize, value: Value) {
        if let Some(slot) = self.slots.write().get_mut(index) {
            *slot = value;
        }
    }

    /// Field resolution: slot, overflow, then class static;
    /// otherwise `UndefinedProperty`.
    pub fn lookup_field(&self, name: &str) -> RunResult<Value> {
        if let Some(found) = self.get_field(name) {
            return Ok(found);
        }
        if let Some(found) = self.class.static_field(name) {
            return Ok(found);
        }
        Err(RunError::raise(
            ErrorKind::UndefinedProperty,
            format!("'{}' has no property '{name}'", self.class.name()),
        ))
    }

    /// Attaches the foreign delegate synthesized for foreign super types.
    pub fn attach_delegate(&self, delegate: Arc<dyn HostObject>) {
        *self.delegate.write() = Some(delegate);
    }

    /// The attached foreign delegate, if any.
    #[must_use]
    pub fn delegate(&self) -> Option<Arc<dyn HostObject>> {
        self.delegate.read().clone()
    }

    /// Values of the declared data fields, in declaration order.
    fn data_values(&self) -> Vec<Value> {
        self.class
            .data_order()
            .iter()
            .map(|name| self.get_field(name).unwrap_or(Value::Null))
            .collect()
    }

    /// Instance equality: structural over the data-field order for `data`
    /// classes of the same class, identity otherwise.
    pub(crate) fn nova_eq(a: &Arc<Self>, b: &Arc<Self>, depth: u16) -> bool {
        if Arc::ptr_eq(a, b) {
            return true;
        }
        if !a.class.modifiers().is_data || !Arc::ptr_eq(&a.class, &b.class) {
            return false;
        }
        let left = a.data_values();
        let right = b.data_values();
        left.len() == right.len()
            && left
                .iter()
                .zip(right.iter())
                .all(|(l, r)| l.eq_depth(r, depth + 1))
    }

    /// Hash agreeing with `nova_eq`: structural for data classes, pointer
    /// identity otherwise.
    pub(crate) fn nova_hash<H: Hasher>(this: &Arc<Self>, state: &mut H, depth: u16) {
        if this.class.modifiers().is_data {
            (Arc::as_ptr(&this.class) as usize).hash(state);
            for value in this.data_values() {
                value.hash_depth(state, depth + 1);
            }
        } else {
            (Arc::as_ptr(this) as usize).hash(state);
        }
    }

    pub(crate) fn display_into(&self, out: &mut String, depth: u16) {
        if self.class.modifiers().is_data {
            let _ = write!(out, "{}(", self.class.name());
            for (i, name) in self.class.data_order().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{name}=");
                let value = self.get_field(name).unwrap_or(Value::Null);
                value.display_into(out, depth + 1);
            }
            out.push(')');
        } else {
            let _ = write!(out, "{}@{:x}", self.class.name(), std::ptr::from_ref(self) as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassBuilder, ClassModifiers};

    fn point_class(data: bool) -> Arc<ClassDef> {
        let builder = ClassBuilder::new("Point", "geom").field("x").field("y");
        if data {
            builder.data_fields(["x", "y"]).build()
        } else {
            builder.build()
        }
    }

    #[test]
    fn slots_default_to_null_and_write_in_place() {
        let instance = Instance::new(point_class(false));
        assert_eq!(instance.get_field("x"), Some(Value::Null));
        instance.set_field("x", Value::Int(3));
        assert_eq!(instance.get_field("x"), Some(Value::Int(3)));
        assert_eq!(instance.slot(0), Some(Value::Int(3)));
    }

    #[test]
    fn unknown_field_goes_to_overflow() {
        let instance = Instance::new(point_class(false));
        assert_eq!(instance.get_field("extra"), None);
        instance.set_field("extra", Value::str("v"));
        assert_eq!(instance.get_field("extra"), Some(Value::str("v")));
        // layout stays frozen
        assert_eq!(instance.class().field_slot("extra"), None);
    }

    #[test]
    fn lookup_field_falls_back_to_statics() {
        let class = ClassBuilder::new("C", "m")
            .static_field("SHARED", Value::Int(9))
            .build();
        let instance = Instance::new(class);
        assert_eq!(instance.lookup_field("SHARED").unwrap(), Value::Int(9));
        assert!(instance.lookup_field("nope").is_err());
    }

    #[test]
    fn data_class_equality_is_structural() {
        let class = point_class(true);
        let a = Instance::new(class.clone());
        a.set_field("x", Value::Int(1));
        a.set_field("y", Value::Int(2));
        let b = Instance::new(class);
        b.set_field("x", Value::Int(1));
        b.set_field("y", Value::Int(2));
        assert_eq!(Value::Object(a.clone()), Value::Object(b.clone()));
        b.set_field("y", Value::Int(3));
        assert_ne!(Value::Object(a), Value::Object(b));
    }

    #[test]
    fn plain_class_equality_is_identity() {
        let class = point_class(false);
        let a = Instance::new(class.clone());
        let b = Instance::new(class);
        assert_ne!(Value::Object(a.clone()), Value::Object(b));
        assert_eq!(Value::Object(a.clone()), Value::Object(a));
    }

    #[test]
    fn data_class_display() {
        let class = point_class(true);
        let a = Instance::new(class);
        a.set_field("x", Value::Int(1));
        a.set_field("y", Value::Int(2));
        assert_eq!(Value::Object(a).display(), "Point(x=1, y=2)");
    }

    #[test]
    fn modifiers_default_is_concrete() {
        let m = ClassModifiers::default();
        assert!(!m.is_abstract && !m.is_sealed && !m.is_data);
    }
}
