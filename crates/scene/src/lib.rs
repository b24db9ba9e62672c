pub mod collection;
pub mod icons;
pub mod pick_ids;
pub mod primitive;
pub mod scene;

pub use collection::*;
pub use icons::*;
pub use pick_ids::*;
pub use primitive::*;
pub use scene::*;
