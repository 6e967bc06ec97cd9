pub mod colors;
pub mod history;
pub mod hotkeys;
pub mod tools;
