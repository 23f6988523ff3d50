//! Copy-on-write containers implementing the layer producer contract

mod bitmap;
mod boolean;
mod cell;
mod map;

pub use bitmap::{BitmapChanges, TransactionalBitmap};
pub use boolean::{BooleanChanges, TransactionalBoolean};
pub use cell::{CellChanges, TransactionalCell};
pub use map::{MapChanges, TransactionalMap};
