//! Targets that templates are expanded against

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;

/// A target object whose readable members can be looked up by name.
///
/// Only the first segment of a property path goes through this trait; the
/// remaining segments navigate inside the returned value.
pub trait PropertySource {
    /// Look up a top-level member. `None` means the member does not exist.
    fn property(&self, name: &str) -> Option<Value>;
}

impl PropertySource for Value {
    fn property(&self, name: &str) -> Option<Value> {
        member(self, name).cloned()
    }
}

impl PropertySource for Map<String, Value> {
    fn property(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl<S: std::hash::BuildHasher> PropertySource for HashMap<String, Value, S> {
    fn property(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl PropertySource for BTreeMap<String, Value> {
    fn property(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl<T: PropertySource + ?Sized> PropertySource for &T {
    fn property(&self, name: &str) -> Option<Value> {
        (**self).property(name)
    }
}

impl<T: PropertySource + ?Sized> PropertySource for Box<T> {
    fn property(&self, name: &str) -> Option<Value> {
        (**self).property(name)
    }
}

impl<T: PropertySource + ?Sized> PropertySource for Arc<T> {
    fn property(&self, name: &str) -> Option<Value> {
        (**self).property(name)
    }
}

impl<T: PropertySource + ?Sized> PropertySource for Rc<T> {
    fn property(&self, name: &str) -> Option<Value> {
        (**self).property(name)
    }
}

/// Exposes any `Serialize` value as a property source.
///
/// The target is serialized on every lookup, so expansion always sees the
/// current field values.
///
/// ```rust
/// use property::{expand, Serialized};
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Request { user_id: u64 }
///
/// let request = Request { user_id: 42 };
/// let text = expand(Some(&Serialized(&request)), "Loading {user_id}").unwrap();
/// assert_eq!(text, "Loading 42");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Serialized<'a, T: ?Sized>(pub &'a T);

impl<T: Serialize + ?Sized> PropertySource for Serialized<'_, T> {
    fn property(&self, name: &str) -> Option<Value> {
        let value = serde_json::to_value(self.0).ok()?;
        member(&value, name).cloned()
    }
}

/// Look up one path segment on a value.
///
/// Objects are indexed by key, arrays by numeric index. Scalars and null have
/// no members.
pub(crate) fn member<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Object(obj) => obj.get(segment),
        Value::Array(arr) => segment.parse::<usize>().ok().and_then(|i| arr.get(i)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct User {
        name: String,
        roles: Vec<String>,
    }

    #[test]
    fn test_json_value_source() {
        let target = json!({"Name": "X", "Items": [1, 2]});
        assert_eq!(target.property("Name"), Some(json!("X")));
        assert_eq!(target.property("Missing"), None);
    }

    #[test]
    fn test_map_sources() {
        let mut map = HashMap::new();
        map.insert("id".to_string(), json!(7));
        assert_eq!(map.property("id"), Some(json!(7)));

        let mut tree = BTreeMap::new();
        tree.insert("id".to_string(), json!("a"));
        assert_eq!(tree.property("id"), Some(json!("a")));
    }

    #[test]
    fn test_serialized_reflects_mutation() {
        let mut user = User {
            name: "alice".to_string(),
            roles: vec!["admin".to_string()],
        };
        assert_eq!(Serialized(&user).property("name"), Some(json!("alice")));

        user.name = "bob".to_string();
        assert_eq!(Serialized(&user).property("name"), Some(json!("bob")));
        assert_eq!(Serialized(&user).property("roles"), Some(json!(["admin"])));
    }

    #[test]
    fn test_member_navigation() {
        let value = json!({"a": [10, {"b": true}]});
        assert_eq!(member(&value, "a").and_then(|a| member(a, "1")), Some(&json!({"b": true})));
        assert_eq!(member(&json!(5), "x"), None);
        assert_eq!(member(&json!([1]), "one"), None);
    }
}
