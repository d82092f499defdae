pub mod audio;
pub mod config;
pub mod converter;
pub mod gemini;
pub mod history;
pub mod playback;
#[cfg(feature = "playback")]
pub mod rodio_backend;
pub mod runtime;
pub mod session;
pub mod store;
pub mod types;
pub mod virtual_backend;
pub mod wav;
