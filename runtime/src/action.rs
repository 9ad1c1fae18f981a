//! # Action: composable unit of work
//!
//! An `Action` pairs a body with a single-run activation guard and a [`Flow`].
//! Actions form a tree: attaching a child rebinds its whole subtree to the
//! parent's flow, so every node publishes into and consumes from one store.
//!
//! Activation is depth-first, pre-order: a node's own body runs before any
//! of its children, and children run in insertion order.
//!
//! ```rust,ignore
//! let base = Action::empty("checkout");
//! base.add(|action: &Action| { action.flow().define("price", 42); })?
//!     .add(PricingAction::new())?;
//! let total = base.activate().flow().consume("total");
//! ```

use crate::flow::Flow;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use topicflow_core::UsageError;
use uuid::Uuid;

/// The work an action does when activated.
pub trait ActionBody: Send + Sync + 'static {
    fn run(&self, action: &Action);
}

impl<F> ActionBody for F
where
    F: Fn(&Action) + Send + Sync + 'static,
{
    fn run(&self, action: &Action) {
        self(action)
    }
}

struct ActionInner {
    id: Uuid,
    label: String,
    body: Option<Box<dyn ActionBody>>,
    children: Mutex<Vec<Action>>,
    parent: Mutex<Option<Weak<ActionInner>>>,
    activated: AtomicBool,
    flow: RwLock<Flow>,
}

/// Handle to an action node. Clones refer to the same node.
#[derive(Clone)]
pub struct Action {
    inner: Arc<ActionInner>,
}

impl Action {
    pub fn new(label: impl Into<String>, body: impl ActionBody) -> Self {
        Self::build(Flow::new(), label.into(), Some(Box::new(body)))
    }

    /// A node with no body of its own, used to group children.
    pub fn empty(label: impl Into<String>) -> Self {
        Self::build(Flow::new(), label.into(), None)
    }

    /// A node bound to an existing flow instead of a fresh one.
    pub fn in_flow(flow: &Flow, label: impl Into<String>, body: impl ActionBody) -> Self {
        Self::build(Flow::import(flow), label.into(), Some(Box::new(body)))
    }

    fn build(flow: Flow, label: String, body: Option<Box<dyn ActionBody>>) -> Self {
        Action {
            inner: Arc::new(ActionInner {
                id: Uuid::new_v4(),
                label,
                body,
                children: Mutex::new(Vec::new()),
                parent: Mutex::new(None),
                activated: AtomicBool::new(false),
                flow: RwLock::new(flow),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// The flow this node is currently bound to.
    pub fn flow(&self) -> Flow {
        self.inner.flow.read().clone()
    }

    pub fn is_activated(&self) -> bool {
        self.inner.activated.load(Ordering::SeqCst)
    }

    pub fn children_len(&self) -> usize {
        self.inner.children.lock().len()
    }

    /// Attach `child`, rebinding its subtree to this node's flow.
    ///
    /// A node has at most one parent. Fails if the child was already
    /// activated, already belongs to another node, or is this node or one of
    /// its ancestors. Children may be added while this node is activating;
    /// once `activate` returned, new children have to be activated by the
    /// caller.
    pub fn add(&self, child: impl Into<Action>) -> Result<&Self, UsageError> {
        let child = child.into();
        self.check_child(&child)?;
        {
            let mut parent = child.inner.parent.lock();
            if parent.as_ref().is_some_and(|p| p.strong_count() > 0) {
                return Err(UsageError::AlreadyAttached {
                    label: child.label().to_string(),
                });
            }
            *parent = Some(Arc::downgrade(&self.inner));
        }
        child.rebind(&self.flow());
        tracing::debug!(parent = %self.label(), child = %child.label(), "action attached");
        self.inner.children.lock().push(child);
        Ok(self)
    }

    /// Attach several children in order. Nothing is attached if any of them
    /// would be rejected by [`add`](Self::add).
    pub fn add_all<I, C>(&self, children: I) -> Result<&Self, UsageError>
    where
        I: IntoIterator<Item = C>,
        C: Into<Action>,
    {
        let children: Vec<Action> = children.into_iter().map(Into::into).collect();
        for (index, child) in children.iter().enumerate() {
            self.check_child(child)?;
            let repeated = children[..index].iter().any(|c| c.ptr_eq(child));
            if repeated || child.has_parent() {
                return Err(UsageError::AlreadyAttached {
                    label: child.label().to_string(),
                });
            }
        }
        for child in children {
            self.add(child)?;
        }
        Ok(self)
    }

    /// True if both handles refer to the same node.
    pub fn ptr_eq(&self, other: &Action) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn has_parent(&self) -> bool {
        self.inner
            .parent
            .lock()
            .as_ref()
            .is_some_and(|p| p.strong_count() > 0)
    }

    fn check_child(&self, child: &Action) -> Result<(), UsageError> {
        if child.is_activated() {
            return Err(UsageError::AlreadyActivated {
                label: child.label().to_string(),
            });
        }
        // walk up from this node; meeting the child would close a cycle
        let mut node = Some(self.inner.clone());
        while let Some(current) = node {
            if Arc::ptr_eq(&current, &child.inner) {
                return Err(UsageError::Cycle {
                    label: child.label().to_string(),
                });
            }
            node = current.parent.lock().as_ref().and_then(Weak::upgrade);
        }
        Ok(())
    }

    /// Run this node's body, then activate every child in insertion order.
    /// A second call is a no-op.
    pub fn activate(&self) -> &Self {
        if self.inner.activated.swap(true, Ordering::SeqCst) {
            tracing::trace!(action = %self.label(), "already activated");
            return self;
        }
        tracing::debug!(action = %self.label(), id = %self.id(), "activate");

        if let Some(body) = &self.inner.body {
            body.run(self);
        }

        // children appended while iterating are picked up too
        let mut index = 0;
        loop {
            let next = self.inner.children.lock().get(index).cloned();
            let Some(child) = next else {
                break;
            };
            child.activate();
            index += 1;
        }
        self
    }

    fn rebind(&self, flow: &Flow) {
        *self.inner.flow.write() = Flow::import(flow);
        let children: Vec<Action> = self.inner.children.lock().clone();
        for child in &children {
            child.rebind(flow);
        }
    }
}

impl<F> From<F> for Action
where
    F: Fn(&Action) + Send + Sync + 'static,
{
    fn from(body: F) -> Self {
        Action::new("fn", body)
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("activated", &self.is_activated())
            .field("children", &self.children_len())
            .finish()
    }
}
