//! Custom attributes: the type catalog, per-type settings forms, the object
//! form and issue-level attribute values.

pub mod forms;
pub mod object_form;
pub mod registry;
pub mod values;

pub use forms::AttributeForm;
pub use object_form::{FormContext, FormState, ObjectForm, SubmitOutcome};
pub use registry::AttributeType;
pub use values::AttributeValues;
