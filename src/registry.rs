//! Function registry seam
//!
//! The hosting platform owns the set of deployed functions. The log pipeline
//! only asks whether an id still exists: at flush time (to store entries of a
//! deleted function as orphaned) and in the HTTP adapter (to answer 404).

use std::collections::HashSet;
use std::sync::RwLock;

pub trait FunctionRegistry: Send + Sync {
    fn contains(&self, function_id: &str) -> bool;
}

/// Registry backed by an in-process set
#[derive(Debug, Default)]
pub struct InMemoryFunctionRegistry {
    functions: RwLock<HashSet<String>>,
}

impl InMemoryFunctionRegistry {
    pub fn new<I, S>(functions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            functions: RwLock::new(functions.into_iter().map(Into::into).collect()),
        }
    }

    pub fn register(&self, function_id: impl Into<String>) {
        if let Ok(mut functions) = self.functions.write() {
            functions.insert(function_id.into());
        }
    }

    pub fn unregister(&self, function_id: &str) -> bool {
        self.functions
            .write()
            .map(|mut functions| functions.remove(function_id))
            .unwrap_or(false)
    }

    /// Swap the whole set, e.g. after a configuration reload
    pub fn replace_all<I, S>(&self, functions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let next: HashSet<String> = functions.into_iter().map(Into::into).collect();
        if let Ok(mut current) = self.functions.write() {
            *current = next;
        }
    }

    pub fn len(&self) -> usize {
        self.functions.read().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FunctionRegistry for InMemoryFunctionRegistry {
    fn contains(&self, function_id: &str) -> bool {
        self.functions
            .read()
            .map(|functions| functions.contains(function_id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let registry = InMemoryFunctionRegistry::new(["hello"]);
        assert!(registry.contains("hello"));
        assert!(!registry.contains("world"));

        registry.register("world");
        assert!(registry.contains("world"));
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister("hello"));
        assert!(!registry.unregister("hello"));
        assert!(!registry.contains("hello"));

        registry.replace_all(["a", "b", "c"]);
        assert!(!registry.contains("world"));
        assert_eq!(registry.len(), 3);
    }
}
