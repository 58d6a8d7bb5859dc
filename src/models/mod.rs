pub mod timestamp;
mod document;
mod chat;
mod render;
mod notice;

pub use document::*;
pub use chat::*;
pub use render::*;
pub use notice::*;
