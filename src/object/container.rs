use std::sync::Arc;

use parking_lot::Mutex;

use super::DistributedObject;
use crate::error::{AdapterError, Result};
use crate::registry::DoRegistry;

/// Sparse, array-like container of distributed objects or nested containers.
/// Elements are created on first access under the path `parent[index]`.
pub struct InstContainer {
    path: String,
    registry: Arc<DoRegistry>,
    elements: Mutex<Vec<Option<Arc<InstContainerElement>>>>,
}

impl InstContainer {
    pub(crate) fn new(path: String, registry: Arc<DoRegistry>) -> Self {
        Self {
            path,
            registry,
            elements: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of element slots, i.e. one past the highest index accessed so
    /// far.
    pub fn len(&self) -> usize {
        self.elements.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The element at `index`, created on first access.
    pub fn element(&self, index: usize) -> Arc<InstContainerElement> {
        let mut elements = self.elements.lock();
        if index >= elements.len() {
            elements.resize(index + 1, None);
        }
        let element = elements[index].get_or_insert_with(|| {
            Arc::new(InstContainerElement::new(
                format!("{}[{index}]", self.path),
                Arc::clone(&self.registry),
            ))
        });
        Arc::clone(element)
    }
}

enum ElementRole {
    Unset,
    Object,
    Container(Arc<InstContainer>),
}

/// A single container slot. Whether it holds a distributed object or a nested
/// container is fixed by the first access and cannot change afterwards.
pub struct InstContainerElement {
    path: String,
    registry: Arc<DoRegistry>,
    role: Mutex<ElementRole>,
}

impl InstContainerElement {
    fn new(path: String, registry: Arc<DoRegistry>) -> Self {
        Self {
            path,
            registry,
            role: Mutex::new(ElementRole::Unset),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The element as a distributed object. Fails if the element was already
    /// accessed as a container.
    pub fn get_do(&self) -> Result<Arc<DistributedObject>> {
        let mut role = self.role.lock();
        if matches!(*role, ElementRole::Container(_)) {
            return Err(AdapterError::InvalidUsage(format!(
                "container element '{}' already holds a nested container",
                self.path
            )));
        }
        let object = self.registry.get_do(&self.path)?;
        *role = ElementRole::Object;
        Ok(object)
    }

    /// The element as a nested container. Fails if the element was already
    /// accessed as a distributed object.
    pub fn get_container(&self) -> Result<Arc<InstContainer>> {
        let mut role = self.role.lock();
        match &*role {
            ElementRole::Object => Err(AdapterError::InvalidUsage(format!(
                "container element '{}' already holds a distributed object",
                self.path
            ))),
            ElementRole::Container(container) => Ok(Arc::clone(container)),
            ElementRole::Unset => {
                let container = Arc::new(InstContainer::new(
                    self.path.clone(),
                    Arc::clone(&self.registry),
                ));
                *role = ElementRole::Container(Arc::clone(&container));
                Ok(container)
            }
        }
    }
}
