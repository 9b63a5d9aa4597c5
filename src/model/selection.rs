use std::cell::RefCell;
use std::rc::Rc;

use super::scene::NodeId;

/// Identity of one bridge instance, handed out by [`SharedSelection::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BridgeId(u64);

#[derive(Debug, Default)]
struct SelectionState {
    next_id: u64,
    foreground: Option<BridgeId>,
    /// Node ids are local to one scene, so the owner travels with the node
    selected: Option<(BridgeId, NodeId)>,
}

/// Process-wide edit selection and foreground ownership.
///
/// Cloning shares the same state. Construct one per host and hand clones to every
/// bridge, so at most one stage instance reacts to input and owns the selection.
#[derive(Debug, Clone, Default)]
pub struct SharedSelection {
    inner: Rc<RefCell<SelectionState>>,
}

impl SharedSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> BridgeId {
        let mut state = self.inner.borrow_mut();
        state.next_id += 1;
        BridgeId(state.next_id)
    }

    /// Make `id` the foreground instance. A previous owner loses its selection.
    pub fn claim_foreground(&self, id: BridgeId) {
        let mut state = self.inner.borrow_mut();
        if state.foreground != Some(id) {
            state.selected = None;
        }
        state.foreground = Some(id);
    }

    /// Give up the foreground if `id` holds it. No-op otherwise.
    pub fn release(&self, id: BridgeId) {
        let mut state = self.inner.borrow_mut();
        if state.foreground == Some(id) {
            state.foreground = None;
            state.selected = None;
        }
    }

    pub fn is_foreground(&self, id: BridgeId) -> bool {
        self.inner.borrow().foreground == Some(id)
    }

    /// The selected node, but only for the instance that selected it
    pub fn selected_by(&self, id: BridgeId) -> Option<NodeId> {
        self.inner
            .borrow()
            .selected
            .and_then(|(owner, node)| (owner == id).then_some(node))
    }

    /// Select `node` in the scene of `id`. Ignored unless `id` holds the foreground.
    pub fn select(&self, id: BridgeId, node: Option<NodeId>) {
        let mut state = self.inner.borrow_mut();
        if state.foreground == Some(id) {
            state.selected = node.map(|n| (id, n));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::scene::{SceneGraph, Transform};

    #[test]
    fn only_one_foreground_instance() {
        let shared = SharedSelection::new();
        let a = shared.register();
        let b = shared.register();
        assert_ne!(a, b);

        shared.claim_foreground(a);
        assert!(shared.is_foreground(a));
        shared.claim_foreground(b);
        assert!(!shared.is_foreground(a));
        assert!(shared.is_foreground(b));

        shared.release(a);
        assert!(shared.is_foreground(b), "releasing a non-owner changes nothing");
    }

    #[test]
    fn release_clears_selection() {
        let mut scene = SceneGraph::new();
        let node = scene.add_node("n", None, Transform::IDENTITY);
        let shared = SharedSelection::new();
        let id = shared.register();
        shared.claim_foreground(id);
        shared.clone().select(id, Some(node));
        assert_eq!(shared.selected_by(id), Some(node));
        shared.release(id);
        assert_eq!(shared.selected_by(id), None);
    }

    #[test]
    fn selection_is_visible_only_to_its_owner() {
        let mut scene = SceneGraph::new();
        let node = scene.add_node("n", None, Transform::IDENTITY);
        let shared = SharedSelection::new();
        let front = shared.register();
        let back = shared.register();
        shared.claim_foreground(front);

        shared.select(front, Some(node));
        assert_eq!(shared.selected_by(front), Some(node));
        assert_eq!(shared.selected_by(back), None);

        // a background instance can neither steal nor clear it
        shared.select(back, None);
        assert_eq!(shared.selected_by(front), Some(node));
    }
}
