pub mod feature;
pub mod layer;
pub mod source;
pub mod style;

pub use feature::*;
pub use layer::*;
pub use source::*;
pub use style::*;
