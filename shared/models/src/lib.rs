pub mod error;
pub mod events;
pub mod fields;
pub mod index;
pub mod record;
pub mod relations;
pub mod wheres;

pub use error::ModelError;
pub use events::{Event, EventQueue, RelationUpdateEvent, WaitingEvents};
pub use fields::{Field, Fields};
pub use index::{Index, TransformSpec};
pub use record::{DeleteRow, DocumentRow, Record};
pub use relations::{ForeignKey, Pivot, Relation, RelationId, RelationKind, RelationTree};
pub use wheres::{Where, Wheres};
