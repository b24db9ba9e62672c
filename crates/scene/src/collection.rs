use std::cell::RefCell;
use std::rc::Rc;

use foundation::arena::Arena;
use foundation::handles::Handle;

use crate::primitive::Drawable;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CollectionKind {
    Billboards,
    Labels,
    Polylines,
    Primitives,
    GroundPrimitives,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 5] = [
        CollectionKind::Billboards,
        CollectionKind::Labels,
        CollectionKind::Polylines,
        CollectionKind::Primitives,
        CollectionKind::GroundPrimitives,
    ];
}

pub type CollectionHandle = Rc<RefCell<DrawableCollection>>;

/// A backend collection of drawables of one family.
///
/// Generic primitives added here start their upload with the collection's
/// latency and become ready as frames are rendered.
#[derive(Debug)]
pub struct DrawableCollection {
    kind: CollectionKind,
    items: Arena<Drawable>,
    show: bool,
    destroy_primitives: bool,
    destroyed: bool,
    upload_latency_frames: u32,
}

impl DrawableCollection {
    pub fn new(kind: CollectionKind, upload_latency_frames: u32) -> Self {
        Self {
            kind,
            items: Arena::new(),
            show: true,
            destroy_primitives: false,
            destroyed: false,
            upload_latency_frames,
        }
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn show(&self) -> bool {
        self.show
    }

    pub fn set_show(&mut self, show: bool) {
        self.show = show;
    }

    pub fn destroy_primitives(&self) -> bool {
        self.destroy_primitives
    }

    /// When set, [`DrawableCollection::destroy`] also destroys every contained drawable.
    pub fn set_destroy_primitives(&mut self, destroy: bool) {
        self.destroy_primitives = destroy;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Adds `drawable`. A destroyed collection accepts nothing.
    pub fn add(&mut self, mut drawable: Drawable) -> Option<Handle> {
        if self.destroyed {
            return None;
        }
        drawable.begin_upload(self.upload_latency_frames);
        Some(self.items.insert(drawable))
    }

    /// Removes and destroys the drawable. Stale handles and destroyed
    /// collections return `false`.
    pub fn remove(&mut self, handle: Handle) -> bool {
        match self.items.remove(handle) {
            Some(mut drawable) => {
                drawable.destroy();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.items.contains(handle)
    }

    pub fn get(&self, handle: Handle) -> Option<&Drawable> {
        self.items.get(handle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Drawable> {
        self.items.get_mut(handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &Drawable)> + '_ {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut Drawable)> + '_ {
        self.items.iter_mut()
    }

    /// Advances GPU uploads by one frame.
    pub fn update(&mut self) {
        for (_, drawable) in self.items.iter_mut() {
            drawable.advance_upload();
        }
    }

    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        if self.destroy_primitives {
            for (_, drawable) in self.items.iter_mut() {
                drawable.destroy();
            }
            self.items.clear();
        }
        self.destroyed = true;
    }
}
