//! Variable bindings for one run.
//!
//! Lookups go local bindings → persistent backing (when attached) → program
//! defaults. Writes always land locally and, when a backing is attached, are
//! written through so they outlive the run.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A variable's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    /// Interpret text typed by a user: numbers become `Number`, anything else `Text`.
    ///
    /// A number is only inferred when it displays exactly as written, so
    /// `"007"` or `"1e3"` keep their spelling when substituted back.
    pub fn infer(raw: &str) -> Value {
        let trimmed = raw.trim();
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() && Value::Number(n).to_string() == trimmed => Value::Number(n),
            _ => Value::Text(raw.to_string()),
        }
    }

    /// Numeric view, parsing text when it holds a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Storage that outlives a single run.
pub trait VariableBacking {
    fn get(&self, name: &str) -> Result<Option<Value>>;
    fn set(&mut self, name: &str, value: &Value) -> Result<()>;
}

/// Bindings owned by one execution context.
#[derive(Default)]
pub struct VariableStore {
    local: HashMap<String, Value>,
    defaults: BTreeMap<String, Value>,
    backing: Option<Box<dyn VariableBacking>>,
}

impl fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableStore")
            .field("local", &self.local)
            .field("defaults", &self.defaults)
            .field("persistent", &self.backing.is_some())
            .finish()
    }
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a persistent backing layer.
    pub fn with_backing(mut self, backing: Box<dyn VariableBacking>) -> Self {
        self.backing = Some(backing);
        self
    }

    pub fn is_persistent(&self) -> bool {
        self.backing.is_some()
    }

    /// Replace the lowest-priority layer (declared script defaults).
    pub fn set_defaults(&mut self, defaults: BTreeMap<String, Value>) {
        self.defaults = defaults;
    }

    /// Bind locally without writing through. Used for command-line overrides.
    pub fn preset(&mut self, name: impl Into<String>, value: Value) {
        self.local.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        if let Some(value) = self.local.get(name) {
            return Ok(value.clone());
        }
        if let Some(backing) = &self.backing {
            if let Some(value) = backing.get(name)? {
                return Ok(value);
            }
        }
        self.defaults
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UndefinedVariable(name.to_string()))
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        if let Some(backing) = &mut self.backing {
            backing.set(name, &value)?;
        }
        self.local.insert(name.to_string(), value);
        Ok(())
    }
}

/// In-memory [`VariableBacking`] for embedders that manage persistence themselves.
#[derive(Debug, Default, Clone)]
pub struct MemoryBacking {
    values: BTreeMap<String, Value>,
}

impl MemoryBacking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }
}

impl VariableBacking for MemoryBacking {
    fn get(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.values.get(name).cloned())
    }

    fn set(&mut self, name: &str, value: &Value) -> Result<()> {
        self.values.insert(name.to_string(), value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(-2.5).to_string(), "-2.5");
        assert_eq!(Value::Text("hi".into()).to_string(), "hi");
    }

    #[test]
    fn test_value_infer() {
        assert_eq!(Value::infer("42"), Value::Number(42.0));
        assert_eq!(Value::infer("0.5"), Value::Number(0.5));
        assert_eq!(Value::infer("alice"), Value::Text("alice".into()));
        assert_eq!(Value::infer("inf"), Value::Text("inf".into()));
        assert_eq!(Value::infer("-3"), Value::Number(-3.0));
        assert_eq!(Value::infer(" 1.5 "), Value::Number(1.5));
    }

    #[test]
    fn test_value_infer_keeps_non_canonical_spellings() {
        for raw in ["007", "1e3", "1.50", "+4", ".5"] {
            assert_eq!(Value::infer(raw), Value::Text(raw.into()), "{raw}");
            assert_eq!(Value::infer(raw).to_string(), raw);
        }
    }

    #[test]
    fn test_value_json_is_untagged() {
        assert_eq!(serde_json::to_string(&Value::Number(2.0)).unwrap(), "2.0");
        let v: Value = serde_json::from_str("\"x\"").unwrap();
        assert_eq!(v, Value::Text("x".into()));
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("user"));
        assert!(is_valid_name("_tmp2"));
        assert!(!is_valid_name("2fast"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("with-dash"));
    }

    #[test]
    fn test_lookup_order() {
        let mut backing = MemoryBacking::new();
        backing.set("b", &Value::from("persisted")).unwrap();
        backing.set("c", &Value::from("persisted")).unwrap();

        let mut store = VariableStore::new().with_backing(Box::new(backing));
        store.set_defaults(BTreeMap::from([
            ("a".to_string(), Value::from("default")),
            ("b".to_string(), Value::from("default")),
            ("c".to_string(), Value::from("default")),
        ]));
        store.preset("c", Value::from("local"));

        assert_eq!(store.get("a").unwrap(), Value::from("default"));
        assert_eq!(store.get("b").unwrap(), Value::from("persisted"));
        assert_eq!(store.get("c").unwrap(), Value::from("local"));
        assert_eq!(
            store.get("missing").unwrap_err(),
            Error::UndefinedVariable("missing".into())
        );
    }

    struct SharedBacking(Rc<RefCell<BTreeMap<String, Value>>>);

    impl VariableBacking for SharedBacking {
        fn get(&self, name: &str) -> Result<Option<Value>> {
            Ok(self.0.borrow().get(name).cloned())
        }

        fn set(&mut self, name: &str, value: &Value) -> Result<()> {
            self.0.borrow_mut().insert(name.into(), value.clone());
            Ok(())
        }
    }

    #[test]
    fn test_set_writes_through_but_preset_does_not() {
        let shared = Rc::new(RefCell::new(BTreeMap::new()));
        let mut store = VariableStore::new().with_backing(Box::new(SharedBacking(shared.clone())));
        store.set("count", Value::Number(3.0)).unwrap();
        store.preset("flag", Value::from("cli"));

        assert_eq!(shared.borrow().get("count"), Some(&Value::Number(3.0)));
        assert!(shared.borrow().get("flag").is_none());

        // A later run sees the persisted value.
        let next = VariableStore::new().with_backing(Box::new(SharedBacking(shared)));
        assert_eq!(next.get("count").unwrap(), Value::Number(3.0));
    }

    #[test]
    fn test_backing_errors_surface() {
        struct Broken;
        impl VariableBacking for Broken {
            fn get(&self, _: &str) -> Result<Option<Value>> {
                Err(Error::Persistence("disk gone".into()))
            }
            fn set(&mut self, _: &str, _: &Value) -> Result<()> {
                Err(Error::Persistence("disk gone".into()))
            }
        }
        let mut store = VariableStore::new().with_backing(Box::new(Broken));
        assert!(matches!(store.get("x"), Err(Error::Persistence(_))));
        assert!(matches!(store.set("x", Value::Number(1.0)), Err(Error::Persistence(_))));
        assert!(store.get("x").is_err());
    }
}
