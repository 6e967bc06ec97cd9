pub mod canvas_ops;
pub mod import;
pub mod selection;
pub mod transform;
