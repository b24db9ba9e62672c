use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::collection::{CollectionHandle, CollectionKind, DrawableCollection};
use crate::pick_ids::{PickId, PickIds};

/// The two top-level groupings a collection can be attached to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SceneGroup {
    /// Terrain-clamped drawables, rendered in their own pass.
    Ground,
    Primitives,
}

/// Receives "something visible changed" notifications.
pub trait RepaintNotifier {
    fn request_repaint(&self);
}

/// Single-threaded scene graph root.
///
/// Collections are shared with their owner; the scene only keeps them attached
/// for rendering. All methods take `&self` so a `Rc<Scene>` can be handed to
/// every collaborator that needs one.
#[derive(Debug, Default)]
pub struct Scene {
    ground: RefCell<Vec<CollectionHandle>>,
    primitives: RefCell<Vec<CollectionHandle>>,
    pick_ids: RefCell<PickIds>,
    render_requests: Cell<u64>,
    frames_rendered: Cell<u64>,
    upload_latency_frames: u32,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generic primitives created for this scene need `frames` rendered
    /// frames before they are ready.
    pub fn with_upload_latency(frames: u32) -> Self {
        Self {
            upload_latency_frames: frames,
            ..Self::default()
        }
    }

    pub fn upload_latency_frames(&self) -> u32 {
        self.upload_latency_frames
    }

    pub fn create_collection(&self, kind: CollectionKind) -> CollectionHandle {
        Rc::new(RefCell::new(DrawableCollection::new(
            kind,
            self.upload_latency_frames,
        )))
    }

    /// Returns `false` if the collection was already attached to `group`.
    pub fn add(&self, group: SceneGroup, collection: &CollectionHandle) -> bool {
        let mut attached = self.group(group).borrow_mut();
        if attached.iter().any(|c| Rc::ptr_eq(c, collection)) {
            return false;
        }
        attached.push(Rc::clone(collection));
        true
    }

    pub fn remove(&self, group: SceneGroup, collection: &CollectionHandle) -> bool {
        let mut attached = self.group(group).borrow_mut();
        let before = attached.len();
        attached.retain(|c| !Rc::ptr_eq(c, collection));
        attached.len() != before
    }

    pub fn contains(&self, group: SceneGroup, collection: &CollectionHandle) -> bool {
        self.group(group)
            .borrow()
            .iter()
            .any(|c| Rc::ptr_eq(c, collection))
    }

    pub fn collection_count(&self, group: SceneGroup) -> usize {
        self.group(group).borrow().len()
    }

    pub fn request_render(&self) {
        self.render_requests.set(self.render_requests.get() + 1);
    }

    pub fn render_requests(&self) -> u64 {
        self.render_requests.get()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.get()
    }

    /// Renders one frame: every attached collection advances its uploads.
    pub fn render_frame(&self) {
        for group in [SceneGroup::Ground, SceneGroup::Primitives] {
            for collection in self.group(group).borrow().iter() {
                collection.borrow_mut().update();
            }
        }
        self.frames_rendered.set(self.frames_rendered.get() + 1);
    }

    pub fn allocate_pick_id(&self) -> PickId {
        self.pick_ids.borrow_mut().allocate()
    }

    pub fn live_pick_ids(&self) -> usize {
        self.pick_ids.borrow().len()
    }

    pub fn is_pick_id_allocated(&self, id: PickId) -> bool {
        self.pick_ids.borrow().contains(id)
    }

    /// Returns the ids to the allocator. Returns how many were allocated.
    pub fn release_pick_ids(&self, ids: &[PickId]) -> usize {
        let mut pick_ids = self.pick_ids.borrow_mut();
        ids.iter().filter(|id| pick_ids.release(**id)).count()
    }

    fn group(&self, group: SceneGroup) -> &RefCell<Vec<CollectionHandle>> {
        match group {
            SceneGroup::Ground => &self.ground,
            SceneGroup::Primitives => &self.primitives,
        }
    }
}

impl RepaintNotifier for Scene {
    fn request_repaint(&self) {
        self.request_render();
    }
}
