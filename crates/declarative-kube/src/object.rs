//! The caller-owned object a reconciliation pass runs for
//!
//! The engine only reads identity and labels and rewrites the status; it
//! never persists the object itself.

use std::collections::BTreeMap;

use declarative_core::Status;

/// Capability set the engine needs from a reconciled object
pub trait Object: Send + Sync {
    fn name(&self) -> &str;

    fn namespace(&self) -> &str;

    /// Component identity used by the component-label transform
    fn component_name(&self) -> &str;

    /// `metadata.generation`, recorded on conditions
    fn generation(&self) -> i64 {
        0
    }

    fn labels(&self) -> &BTreeMap<String, String>;

    /// Image references (`<host>[/<path>]/<name>:<tag>`) to substitute for
    /// matching `<name>:<tag>` images in rendered pod templates
    fn localized_images(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether the object carries a deletion timestamp
    fn is_deleting(&self) -> bool;

    /// A copy of the current status
    fn status(&self) -> Status;

    fn set_status(&mut self, status: Status);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Minimal in-memory object for unit tests
    #[derive(Debug, Clone, Default)]
    pub struct TestObject {
        pub name: String,
        pub namespace: String,
        pub component: String,
        pub generation: i64,
        pub labels: BTreeMap<String, String>,
        pub localized_images: Vec<String>,
        pub deleting: bool,
        pub status: Status,
    }

    impl TestObject {
        pub fn new(name: &str, namespace: &str) -> Self {
            Self {
                name: name.to_string(),
                namespace: namespace.to_string(),
                component: name.to_string(),
                generation: 1,
                ..Default::default()
            }
        }
    }

    impl Object for TestObject {
        fn name(&self) -> &str {
            &self.name
        }

        fn namespace(&self) -> &str {
            &self.namespace
        }

        fn component_name(&self) -> &str {
            &self.component
        }

        fn generation(&self) -> i64 {
            self.generation
        }

        fn labels(&self) -> &BTreeMap<String, String> {
            &self.labels
        }

        fn localized_images(&self) -> Vec<String> {
            self.localized_images.clone()
        }

        fn is_deleting(&self) -> bool {
            self.deleting
        }

        fn status(&self) -> Status {
            self.status.clone()
        }

        fn set_status(&mut self, status: Status) {
            self.status = status;
        }
    }
}
