pub mod auth_service;
pub mod chat_service;
pub mod config_service;
pub mod file_service;
#[cfg(feature = "mupdf")]
pub mod mupdf_decoder;
pub mod notes_client;
pub mod pdf_service;
pub mod resize_service;
pub mod workspace_service;
